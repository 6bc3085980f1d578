//! One worker thread and its FIFO queue.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use super::POOL_TARGET;
use crate::dispatch::{WorkHandler, WorkItem};

#[derive(Default)]
struct SlotState {
    queue: VecDeque<WorkItem>,
    shutdown: bool,
}

struct SlotShared {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl SlotShared {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A worker thread that serves items strictly in arrival order.
pub(crate) struct ThreadSlot {
    index: usize,
    shared: Arc<SlotShared>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadSlot {
    /// Spawns the worker thread for slot `index`.
    pub(crate) fn spawn(index: usize, handler: Arc<dyn WorkHandler>) -> io::Result<Self> {
        let shared = Arc::new(SlotShared {
            state: Mutex::new(SlotState::default()),
            ready: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("gatehouse-worker-{index}"))
            .spawn(move || run_worker(index, &worker_shared, handler.as_ref()))?;
        debug!(target: POOL_TARGET, slot = index, "worker thread started");
        Ok(Self {
            index,
            shared,
            handle: Some(handle),
        })
    }

    pub(crate) const fn index(&self) -> usize {
        self.index
    }

    /// Queues an item, handing it back if the slot is shutting down.
    pub(crate) fn enqueue(&self, item: WorkItem) -> Result<(), WorkItem> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(item);
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Items queued but not yet picked up.
    pub(crate) fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Asks the worker to exit once its queue is empty.
    pub(crate) fn signal_shutdown(&self) {
        self.shared.lock().shutdown = true;
        self.shared.ready.notify_all();
    }

    /// Whether the thread is still running.
    pub(crate) fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Joins the thread if it has exited. Returns `true` once joined.
    pub(crate) fn try_join(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if handle.is_finished() => {
                if handle.join().is_err() {
                    error!(target: POOL_TARGET, slot = self.index, "worker thread panicked");
                }
                true
            }
            Some(handle) => {
                self.handle = Some(handle);
                false
            }
            None => true,
        }
    }
}

fn run_worker(index: usize, shared: &SlotShared, handler: &dyn WorkHandler) {
    loop {
        let item = {
            let mut state = shared.lock();
            loop {
                if let Some(item) = state.queue.pop_front() {
                    break Some(item);
                }
                if state.shutdown {
                    break None;
                }
                state = shared
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(item) = item else {
            debug!(target: POOL_TARGET, slot = index, "worker thread exiting");
            return;
        };
        let connection = item.connection();
        if panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item))).is_err() {
            error!(
                target: POOL_TARGET,
                slot = index,
                connection = %connection,
                "work handler panicked; response dropped"
            );
        }
    }
}
