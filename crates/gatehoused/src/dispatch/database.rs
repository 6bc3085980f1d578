//! Process-wide database lock.
//!
//! Every worker reaches the shared database through [`SharedDatabase`], so at
//! most one request body builder touches it at a time. Content builders see a
//! [`DatabaseAccess`] handle that also stamps the request trace with lock
//! timings.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::warn;

use super::DISPATCH_TARGET;
use crate::content::ContentError;
use crate::trace::RequestTrace;

/// Shared handle to the single database instance.
#[derive(Debug)]
pub struct SharedDatabase<D> {
    inner: Arc<Mutex<D>>,
}

impl<D> Clone for SharedDatabase<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D> SharedDatabase<D> {
    /// Wraps `database` in the process-wide lock.
    pub fn new(database: D) -> Self {
        Self {
            inner: Arc::new(Mutex::new(database)),
        }
    }

    /// Runs `f` with exclusive access to the database.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a previous holder panicked. The poison
    /// flag is cleared so later requests proceed.
    pub fn with_database<F, R>(&self, f: F) -> Result<R, ContentError>
    where
        F: FnOnce(&mut D) -> R,
    {
        match self.inner.lock() {
            Ok(mut guard) => Ok(f(&mut guard)),
            Err(_) => {
                warn!(target: DISPATCH_TARGET, "database lock poisoned by a panicked worker");
                self.inner.clear_poison();
                Err(ContentError::internal("database lock poisoned"))
            }
        }
    }
}

/// Database handle given to a content builder for one request.
pub struct DatabaseAccess<'a, D> {
    database: &'a SharedDatabase<D>,
    trace: &'a mut RequestTrace,
    acquisitions: usize,
}

impl<'a, D> DatabaseAccess<'a, D> {
    pub(crate) fn new(database: &'a SharedDatabase<D>, trace: &'a mut RequestTrace) -> Self {
        Self {
            database,
            trace,
            acquisitions: 0,
        }
    }

    /// Runs `f` under the database lock and records the lock timings.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock was poisoned.
    pub fn with<F, R>(&mut self, f: F) -> Result<R, ContentError>
    where
        F: FnOnce(&mut D) -> R,
    {
        let trace = &mut *self.trace;
        let result = self.database.with_database(|database| {
            trace.mark_lock_acquired(Instant::now());
            let value = f(database);
            trace.mark_lock_released(Instant::now());
            value
        });
        self.acquisitions += 1;
        result
    }

    /// Number of times the lock was taken for this request.
    #[must_use]
    pub const fn acquisitions(&self) -> usize {
        self.acquisitions
    }
}
