//! Off-loop resolution of hostlist misses.
//!
//! The event loop asks the gate to screen each connection accepted on the
//! public listener. Cached verdicts are answered immediately; misses are
//! queued for a dedicated resolver thread, which posts the verdict back
//! through the loop's wake channel.
//!
//! Stopping the gate discards lookups still queued. A lookup already in
//! progress cannot be interrupted, so the resolver thread is joined against a
//! deadline and left running if it misses it.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select, unbounded};
use tracing::{debug, warn};

use super::ACL_TARGET;
use super::hostlist::HostlistCache;
use crate::transport::{ConnectionId, ResponseDelivery};

/// Immediate outcome of screening a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Screening {
    Accept,
    Reject,
    Pending,
}

struct Lookup {
    connection: ConnectionId,
    address: IpAddr,
}

/// Hostlist front end owned by the event loop.
pub(crate) struct AccessGate {
    cache: Arc<HostlistCache>,
    lookups: Option<Sender<Lookup>>,
    /// Dropped to tell the resolver thread to stop.
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AccessGate {
    /// Starts the resolver thread.
    pub(crate) fn start(cache: Arc<HostlistCache>, delivery: ResponseDelivery) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<Lookup>();
        let (stop, stopped) = bounded::<()>(0);
        let worker_cache = Arc::clone(&cache);
        let worker = thread::Builder::new()
            .name("gatehouse-resolver".to_owned())
            .spawn(move || resolve_until_stopped(&worker_cache, &receiver, &stopped, &delivery))?;
        Ok(Self {
            cache,
            lookups: Some(sender),
            stop: Some(stop),
            worker: Some(worker),
        })
    }

    /// Screens a new connection. `Pending` means a verdict will be posted.
    pub(crate) fn screen(&self, connection: ConnectionId, address: IpAddr) -> Screening {
        match self.cache.cached(address) {
            Some(true) => return Screening::Accept,
            Some(false) => return Screening::Reject,
            None => {}
        }
        let queued = self
            .lookups
            .as_ref()
            .is_some_and(|lookups| lookups.send(Lookup { connection, address }).is_ok());
        if queued {
            Screening::Pending
        } else {
            warn!(
                target: ACL_TARGET,
                address = %address,
                "resolver unavailable; rejecting"
            );
            Screening::Reject
        }
    }

    /// Stops the resolver thread, dropping queued lookups.
    ///
    /// Returns `false` when the thread was still inside a lookup at the
    /// deadline; it is then left to finish on its own.
    pub(crate) fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop.take();
        self.lookups.take();
        let Some(worker) = self.worker.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    target: ACL_TARGET,
                    "resolver thread still busy at the shutdown deadline; leaving it"
                );
                return false;
            }
            thread::sleep(JOIN_POLL);
        }
        if worker.join().is_err() {
            warn!(target: ACL_TARGET, "resolver thread panicked");
        }
        true
    }
}

impl Drop for AccessGate {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

const JOIN_POLL: Duration = Duration::from_millis(5);

fn resolve_until_stopped(
    cache: &HostlistCache,
    lookups: &Receiver<Lookup>,
    stopped: &Receiver<()>,
    delivery: &ResponseDelivery,
) {
    loop {
        let lookup = select! {
            recv(stopped) -> _ => break,
            recv(lookups) -> lookup => match lookup {
                Ok(lookup) => lookup,
                Err(_) => break,
            },
        };
        // Both channels may be ready at once; stopping wins.
        if !matches!(stopped.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }
        let accepted = cache.check(lookup.address);
        if delivery.post_verdict(lookup.connection, accepted).is_err() {
            debug!(target: ACL_TARGET, "event loop gone; resolver exiting");
            break;
        }
    }
    let dropped = lookups.len();
    if dropped > 0 {
        debug!(target: ACL_TARGET, dropped, "resolver stopped with lookups queued");
    }
}
