//! Binding of connections to worker slots.
//!
//! A connection keeps the same slot from its first request until it closes,
//! so its requests are served in order by one thread. Freed slots are reused
//! lowest index first; a new thread is spawned only when none is free.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::POOL_TARGET;
use super::slot::ThreadSlot;
use crate::dispatch::{WorkHandler, WorkItem};
use crate::transport::ConnectionId;

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Index of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// Reasons a work item could not be queued.
#[derive(Debug, Error)]
pub enum AffinityError {
    /// [`ConnectionAffinity::shutdown`] has begun; no new work is taken.
    #[error("worker pool is shutting down")]
    ShuttingDown,
    /// Every slot is bound and the thread cap forbids another.
    #[error("all {limit} worker threads are bound to connections")]
    Exhausted {
        /// Configured maximum number of worker threads.
        limit: usize,
    },
    /// The operating system refused to start a worker thread.
    #[error("failed to spawn a worker thread: {source}")]
    Spawn {
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
}

/// A rejected submission; the item is handed back for an error reply.
#[derive(Debug, Error)]
#[error("work item rejected: {reason}")]
pub struct SubmitError {
    /// The item that was not queued.
    pub item: WorkItem,
    /// Why it was refused.
    #[source]
    pub reason: AffinityError,
}

/// Outcome of a bounded shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Threads that exited and were joined before the deadline.
    pub joined: usize,
    /// Threads still running when the deadline passed. They keep counting
    /// towards [`ConnectionAffinity::thread_count`] until they exit.
    pub abandoned: usize,
}

#[derive(Default)]
struct Registry {
    slots: Vec<ThreadSlot>,
    free: BTreeSet<usize>,
    bound: HashMap<ConnectionId, usize>,
    /// Workers that missed the shutdown deadline.
    abandoned: Vec<ThreadSlot>,
    shutting_down: bool,
}

/// Registry of worker slots keyed by connection.
pub struct ConnectionAffinity {
    registry: Mutex<Registry>,
    handler: Arc<dyn WorkHandler>,
    max_threads: Option<usize>,
}

impl ConnectionAffinity {
    /// Builds an empty pool. `max_threads` of `None` means unbounded.
    pub fn new(handler: Arc<dyn WorkHandler>, max_threads: Option<usize>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            handler,
            max_threads,
        }
    }

    /// Returns the slot bound to `connection`, binding one if needed.
    ///
    /// # Errors
    ///
    /// Fails during shutdown, when the thread cap is reached, or when a new
    /// thread cannot be spawned.
    pub fn assign(&self, connection: ConnectionId) -> Result<SlotId, AffinityError> {
        let mut registry = self.lock();
        self.assign_locked(&mut registry, connection)
    }

    /// Queues `item` on the slot bound to its connection.
    ///
    /// # Errors
    ///
    /// Hands the item back with the reason it could not be queued.
    pub fn submit(&self, item: WorkItem) -> Result<SlotId, SubmitError> {
        let mut registry = self.lock();
        let index = match self.assign_locked(&mut registry, item.connection()) {
            Ok(SlotId(index)) => index,
            Err(reason) => return Err(SubmitError { item, reason }),
        };
        let Some(slot) = registry.slots.get(index) else {
            return Err(SubmitError {
                item,
                reason: AffinityError::ShuttingDown,
            });
        };
        slot.enqueue(item).map_err(|returned| SubmitError {
            item: returned,
            reason: AffinityError::ShuttingDown,
        })?;
        Ok(SlotId(index))
    }

    /// Unbinds `connection`, returning its slot to the free set.
    ///
    /// Queued items for the connection still run; their responses are
    /// discarded by the event loop.
    pub fn release(&self, connection: ConnectionId) -> Option<SlotId> {
        let mut registry = self.lock();
        let index = registry.bound.remove(&connection)?;
        registry.free.insert(index);
        debug!(
            target: POOL_TARGET,
            connection = %connection,
            slot = index,
            "slot released"
        );
        Some(SlotId(index))
    }

    /// Slot currently bound to `connection`.
    pub fn slot_of(&self, connection: ConnectionId) -> Option<SlotId> {
        self.lock().bound.get(&connection).copied().map(SlotId)
    }

    /// Number of worker threads still running, including any abandoned by
    /// a shutdown that timed out.
    pub fn thread_count(&self) -> usize {
        let mut registry = self.lock();
        registry.abandoned.retain_mut(|slot| !slot.try_join());
        let live = registry.slots.iter().filter(|slot| slot.is_alive()).count();
        live + registry.abandoned.len()
    }

    /// Number of slots ever created.
    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    /// Items waiting across every slot.
    pub fn queued(&self) -> usize {
        self.lock().slots.iter().map(ThreadSlot::queued).sum()
    }

    /// Stops accepting work and joins every worker within `timeout`.
    ///
    /// Workers finish the items already queued before exiting. Threads still
    /// running at the deadline are abandoned: their handles are kept so they
    /// are still counted, but nothing waits for them.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let mut slots = {
            let mut registry = self.lock();
            registry.shutting_down = true;
            registry.bound.clear();
            registry.free.clear();
            std::mem::take(&mut registry.slots)
        };
        for slot in &slots {
            slot.signal_shutdown();
        }

        let deadline = Instant::now() + timeout;
        let mut joined = 0;
        loop {
            slots.retain_mut(|slot| {
                if slot.try_join() {
                    joined += 1;
                    false
                } else {
                    true
                }
            });
            if slots.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(JOIN_POLL);
        }

        let abandoned = slots.len();
        for slot in &slots {
            warn!(
                target: POOL_TARGET,
                slot = slot.index(),
                "worker did not finish before the shutdown deadline"
            );
        }
        self.lock().abandoned.extend(slots);
        info!(target: POOL_TARGET, joined, abandoned, "worker pool stopped");
        ShutdownReport { joined, abandoned }
    }

    fn assign_locked(
        &self,
        registry: &mut Registry,
        connection: ConnectionId,
    ) -> Result<SlotId, AffinityError> {
        if registry.shutting_down {
            return Err(AffinityError::ShuttingDown);
        }
        if let Some(&index) = registry.bound.get(&connection) {
            return Ok(SlotId(index));
        }
        let index = match registry.free.pop_first() {
            Some(index) => index,
            None => {
                let index = registry.slots.len();
                if let Some(limit) = self.max_threads
                    && index >= limit
                {
                    return Err(AffinityError::Exhausted { limit });
                }
                let slot = ThreadSlot::spawn(index, Arc::clone(&self.handler))
                    .map_err(|source| AffinityError::Spawn { source })?;
                registry.slots.push(slot);
                index
            }
        };
        registry.bound.insert(connection, index);
        debug!(
            target: POOL_TARGET,
            connection = %connection,
            slot = index,
            "slot assigned"
        );
        Ok(SlotId(index))
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionAffinity {
    fn drop(&mut self) {
        let live = self.lock().slots.len();
        if live > 0 {
            self.shutdown(Duration::ZERO);
        }
    }
}
