//! Per-request timing traces and the bounded archive that retains them.
//!
//! A [`RequestTrace`] is created when a request is parsed and travels with
//! the request through the worker and back to the event loop. Once the
//! response bytes are handed to the socket, the trace is completed and pushed
//! into the shared [`TraceBuffer`]. The buffer frees its oldest entries when
//! full. The event loop's housekeeping tick compacts it and, when printing is
//! enabled, logs the traces completed since the previous tick.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::info;

pub(crate) const TRACE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::trace");

/// Timing and outcome record for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTrace {
    method: String,
    uri: String,
    query: String,
    received: Instant,
    lock_acquired: Option<Instant>,
    lock_released: Option<Instant>,
    processed: Option<Instant>,
    sent: Option<Instant>,
    lock_acquisitions: u32,
    auth_ok: bool,
    completed: bool,
}

impl RequestTrace {
    /// Starts a trace for a request received now.
    #[must_use]
    pub fn new(method: impl Into<String>, uri: impl Into<String>, query: impl Into<String>) -> Self {
        Self::received_at(method, uri, query, Instant::now())
    }

    /// Starts a trace with an explicit arrival instant.
    #[must_use]
    pub fn received_at(
        method: impl Into<String>,
        uri: impl Into<String>,
        query: impl Into<String>,
        received: Instant,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            query: query.into(),
            received,
            lock_acquired: None,
            lock_released: None,
            processed: None,
            sent: None,
            lock_acquisitions: 0,
            auth_ok: false,
            completed: false,
        }
    }

    /// Request method as received.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target as received.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Raw query string.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Instant the request was parsed.
    #[must_use]
    pub const fn received(&self) -> Instant {
        self.received
    }

    /// Whether the request passed digest authentication.
    #[must_use]
    pub const fn auth_ok(&self) -> bool {
        self.auth_ok
    }

    /// Whether the trace has been closed off.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Instant the database lock was first acquired.
    #[must_use]
    pub const fn lock_acquired(&self) -> Option<Instant> {
        self.lock_acquired
    }

    /// Instant the database lock was last released.
    #[must_use]
    pub const fn lock_released(&self) -> Option<Instant> {
        self.lock_released
    }

    /// Instant the worker finished building the response.
    #[must_use]
    pub const fn processed(&self) -> Option<Instant> {
        self.processed
    }

    /// Instant the response was handed to the socket.
    #[must_use]
    pub const fn sent(&self) -> Option<Instant> {
        self.sent
    }

    pub(crate) const fn mark_authenticated(&mut self) {
        self.auth_ok = true;
    }

    /// Number of times the request took the database lock.
    #[must_use]
    pub const fn lock_acquisitions(&self) -> u32 {
        self.lock_acquisitions
    }

    /// Records a lock acquisition; only the first instant is kept.
    pub(crate) fn mark_lock_acquired(&mut self, at: Instant) {
        self.lock_acquisitions = self.lock_acquisitions.saturating_add(1);
        self.lock_acquired.get_or_insert(at);
    }

    /// Records a lock release; the latest one wins.
    pub(crate) const fn mark_lock_released(&mut self, at: Instant) {
        self.lock_released = Some(at);
    }

    pub(crate) fn mark_processed(&mut self) {
        self.processed = Some(Instant::now());
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = Some(Instant::now());
    }

    /// Closes the trace. Later calls are no-ops.
    pub(crate) const fn complete(&mut self) {
        self.completed = true;
    }

    /// Time spent waiting for the database lock.
    #[must_use]
    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_acquired
            .map(|acquired| acquired.saturating_duration_since(self.received))
    }

    /// Time the database lock was held.
    #[must_use]
    pub fn lock_held(&self) -> Option<Duration> {
        match (self.lock_acquired, self.lock_released) {
            (Some(acquired), Some(released)) => Some(released.saturating_duration_since(acquired)),
            _ => None,
        }
    }

    /// Time from arrival until the response was sent, or processed if it
    /// never reached the socket.
    #[must_use]
    pub fn total(&self) -> Option<Duration> {
        self.sent
            .or(self.processed)
            .map(|end| end.saturating_duration_since(self.received))
    }
}

/// Bounded archive of completed traces.
///
/// Entries are kept in arrival order. When the live count reaches capacity
/// the oldest entry is freed in place; freed slots are squeezed out by
/// [`TraceBuffer::compact`].
#[derive(Debug)]
pub struct TraceBuffer {
    slots: Mutex<Vec<Option<RequestTrace>>>,
    /// Completed since the last housekeeping tick; only filled when printing.
    unprinted: Mutex<Vec<RequestTrace>>,
    capacity: usize,
    print: bool,
}

impl TraceBuffer {
    /// Builds a buffer that retains at most `capacity` traces.
    #[must_use]
    pub fn new(capacity: usize, print: bool) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            unprinted: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            print,
        }
    }

    /// Archives a trace, completing it first if needed.
    pub fn push(&self, mut trace: RequestTrace) {
        trace.complete();
        if self.print {
            self.unprinted
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(trace.clone());
        }
        let mut slots = self.lock();
        let live = slots.iter().filter(|slot| slot.is_some()).count();
        if live >= self.capacity
            && let Some(oldest) = slots.iter_mut().find(|slot| slot.is_some())
        {
            *oldest = None;
        }
        if slots.len() >= self.capacity.saturating_mul(2) {
            slots.retain(Option::is_some);
        }
        slots.push(Some(trace));
    }

    /// Number of live traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns `true` when no traces are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots including freed ones.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.lock().len()
    }

    /// Clones the live traces in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RequestTrace> {
        self.lock().iter().flatten().cloned().collect()
    }

    /// Removes and returns every live trace, leaving freed slots behind.
    pub fn drain(&self) -> Vec<RequestTrace> {
        self.lock().iter_mut().filter_map(Option::take).collect()
    }

    /// Squeezes freed slots out of the buffer in place.
    pub fn compact(&self) {
        self.lock().retain(Option::is_some);
    }

    /// Periodic maintenance run by the event loop: logs the traces completed
    /// since the last tick, then compacts. Returns how many were logged.
    pub(crate) fn housekeeping(&self) -> usize {
        let pending = std::mem::take(
            &mut *self.unprinted.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for trace in &pending {
            log_trace(trace);
        }
        self.compact();
        pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<RequestTrace>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_trace(trace: &RequestTrace) {
    let as_millis = |duration: Option<Duration>| duration.map(|value| value.as_secs_f64() * 1000.0);
    info!(
        target: TRACE_TARGET,
        method = %trace.method(),
        uri = %trace.uri(),
        query = %trace.query(),
        auth_ok = trace.auth_ok(),
        lock_wait_ms = ?as_millis(trace.lock_wait()),
        lock_held_ms = ?as_millis(trace.lock_held()),
        total_ms = ?as_millis(trace.total()),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn trace(uri: &str) -> RequestTrace {
        RequestTrace::new("GET", uri, "")
    }

    #[rstest]
    fn push_completes_the_trace() {
        let buffer = TraceBuffer::new(4, false);
        buffer.push(trace("/a"));
        let stored = buffer.snapshot();
        assert_eq!(stored.len(), 1);
        assert!(stored.iter().all(RequestTrace::is_completed));
    }

    #[rstest]
    fn full_buffer_frees_the_oldest_entry() {
        let buffer = TraceBuffer::new(2, false);
        for uri in ["/a", "/b", "/c"] {
            buffer.push(trace(uri));
        }
        let uris: Vec<String> = buffer
            .snapshot()
            .iter()
            .map(|entry| entry.uri().to_owned())
            .collect();
        assert_eq!(uris, vec!["/b".to_owned(), "/c".to_owned()]);
        assert_eq!(buffer.slot_count(), 3);
    }

    #[rstest]
    fn compaction_preserves_order_and_drops_freed_slots() {
        let buffer = TraceBuffer::new(2, false);
        for uri in ["/a", "/b", "/c"] {
            buffer.push(trace(uri));
        }
        buffer.compact();
        assert_eq!(buffer.slot_count(), 2);
        let uris: Vec<String> = buffer
            .snapshot()
            .iter()
            .map(|entry| entry.uri().to_owned())
            .collect();
        assert_eq!(uris, vec!["/b".to_owned(), "/c".to_owned()]);
    }

    #[rstest]
    fn drain_frees_every_slot() {
        let buffer = TraceBuffer::new(4, false);
        buffer.push(trace("/a"));
        buffer.push(trace("/b"));
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.is_empty());
        buffer.compact();
        assert_eq!(buffer.slot_count(), 0);
    }

    #[rstest]
    fn lock_timings_keep_first_acquire_and_last_release() {
        let start = Instant::now();
        let mut entry = RequestTrace::received_at("GET", "/", "", start);
        let first = start + Duration::from_millis(2);
        let second = start + Duration::from_millis(5);
        entry.mark_lock_acquired(first);
        entry.mark_lock_released(first + Duration::from_millis(1));
        entry.mark_lock_acquired(second);
        entry.mark_lock_released(second + Duration::from_millis(1));
        assert_eq!(entry.lock_wait(), Some(Duration::from_millis(2)));
        assert_eq!(entry.lock_held(), Some(Duration::from_millis(4)));
        assert_eq!(entry.lock_acquisitions(), 2);
    }

    #[rstest]
    #[case(true, 2)]
    #[case(false, 0)]
    fn housekeeping_logs_new_traces_once_then_compacts(
        #[case] print: bool,
        #[case] logged: usize,
    ) {
        let buffer = TraceBuffer::new(1, print);
        buffer.push(trace("/a"));
        buffer.push(trace("/b"));
        assert_eq!(buffer.slot_count(), 2);

        assert_eq!(buffer.housekeeping(), logged);
        assert_eq!(buffer.slot_count(), 1);
        assert_eq!(buffer.housekeeping(), 0);
    }
}
