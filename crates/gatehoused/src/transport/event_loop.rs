//! Single-threaded network event loop.
//!
//! The loop owns every socket. It accepts connections, screens them through
//! the hostlist, frames requests, checks digest credentials, and hands work
//! items to the executor. Responses come back through the delivery inbox and
//! are written in per-connection sequence order. A one-second tick runs
//! trace housekeeping.

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use http::{Method, StatusCode};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionState, ConnectionTable};
use super::delivery::{DeliveryInbox, LoopEvent};
use super::http::{Frame, FrameError, MAX_HEAD_BYTES, MAX_REQUEST_BYTES, parse_frame};
use super::listener::BoundListener;
use super::{ConnectionId, ServerError, TRANSPORT_TARGET};
use crate::acl::{AccessGate, Screening};
use crate::auth::DigestAuthenticator;
use crate::dispatch::{DecodedRequest, Reply, ResponseMessage, WorkHandler, WorkItem};
use crate::pool::{ConnectionAffinity, SubmitError};
use crate::trace::{RequestTrace, TraceBuffer};

/// Token fired by the delivery waker.
pub(crate) const WAKER: Token = Token(usize::MAX);
const LISTENER_BASE: usize = usize::MAX - 1;
const TICK: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 16 * 1024;
const EVENT_CAPACITY: usize = 1024;

/// Where parsed requests are sent.
#[derive(Clone)]
pub(crate) enum Executor {
    /// One worker thread per connection.
    Pooled(Arc<ConnectionAffinity>),
    /// Served on the loop thread.
    Inline(Arc<dyn WorkHandler>),
}

/// Everything the loop needs, assembled by the server builder.
pub(crate) struct LoopParts {
    pub(crate) poll: Poll,
    pub(crate) listeners: Vec<BoundListener>,
    pub(crate) inbox: DeliveryInbox,
    pub(crate) gate: Option<AccessGate>,
    pub(crate) authenticator: Option<Arc<DigestAuthenticator>>,
    pub(crate) executor: Executor,
    pub(crate) traces: Arc<TraceBuffer>,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) shutdown_timeout: Duration,
}

enum ReadOutcome {
    Drained,
    BufferFull,
    Closed,
    Failed,
}

#[derive(Clone, Copy)]
struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    failed: bool,
}

pub(crate) struct EventLoop {
    poll: Poll,
    events: Events,
    listeners: Vec<BoundListener>,
    connections: ConnectionTable,
    inbox: DeliveryInbox,
    gate: Option<AccessGate>,
    authenticator: Option<Arc<DigestAuthenticator>>,
    executor: Executor,
    traces: Arc<TraceBuffer>,
    shutdown: Arc<AtomicBool>,
    shutdown_timeout: Duration,
    last_tick: Instant,
}

impl EventLoop {
    /// Registers the listeners with the poller.
    pub(crate) fn new(parts: LoopParts) -> Result<Self, ServerError> {
        let LoopParts {
            poll,
            mut listeners,
            inbox,
            gate,
            authenticator,
            executor,
            traces,
            shutdown,
            shutdown_timeout,
        } = parts;
        for (index, bound) in listeners.iter_mut().enumerate() {
            poll.registry()
                .register(&mut bound.listener, listener_token(index), Interest::READABLE)
                .map_err(|source| ServerError::Register { source })?;
        }
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            listeners,
            connections: ConnectionTable::default(),
            inbox,
            gate,
            authenticator,
            executor,
            traces,
            shutdown,
            shutdown_timeout,
            last_tick: Instant::now(),
        })
    }

    /// Runs until the shutdown flag is raised, then drains and stops.
    pub(crate) fn run(mut self) {
        info!(
            target: TRANSPORT_TARGET,
            listeners = self.listeners.len(),
            "event loop running"
        );
        while !self.shutdown.load(Ordering::SeqCst) {
            let timeout = TICK.saturating_sub(self.last_tick.elapsed());
            if let Err(error) = self.poll.poll(&mut self.events, Some(timeout)) {
                if error.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(target: TRANSPORT_TARGET, error = %error, "poll failed; stopping");
                break;
            }
            let ready: Vec<Readiness> = self
                .events
                .iter()
                .map(|event| Readiness {
                    token: event.token(),
                    readable: event.is_readable() || event.is_read_closed(),
                    writable: event.is_writable(),
                    failed: event.is_error(),
                })
                .collect();
            for readiness in ready {
                self.handle_readiness(readiness);
            }
            self.drain_inbox();
            if self.last_tick.elapsed() >= TICK {
                self.traces.housekeeping();
                self.last_tick = Instant::now();
            }
        }
        self.stop();
    }

    fn handle_readiness(&mut self, readiness: Readiness) {
        if readiness.token == WAKER {
            return;
        }
        if let Some(index) = listener_index(readiness.token, self.listeners.len()) {
            self.accept_all(index);
            return;
        }
        let Some(id) = self.connections.id_at(readiness.token.0) else {
            return;
        };
        if readiness.failed {
            self.close(id);
            return;
        }
        if readiness.readable {
            self.on_readable(id);
        }
        if readiness.writable {
            self.flush(id);
        }
    }

    fn accept_all(&mut self, index: usize) {
        loop {
            let Some(bound) = self.listeners.get(index) else {
                return;
            };
            let require_acl = bound.require_acl;
            match bound.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer, require_acl),
                Err(error) if error.kind() == ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(target: TRANSPORT_TARGET, error = %error, "accept failed");
                    return;
                }
            }
        }
    }

    fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr, require_acl: bool) {
        let id = self.connections.vacant_id();
        if let Err(error) = self.poll.registry().register(
            &mut stream,
            Token(id.index()),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(target: TRANSPORT_TARGET, peer = %peer, error = %error, "failed to register connection");
            return;
        }
        let screening = match (&self.gate, require_acl) {
            (Some(gate), true) => gate.screen(id, peer.ip()),
            _ => Screening::Accept,
        };
        if screening == Screening::Reject {
            info!(target: TRANSPORT_TARGET, peer = %peer, "connection rejected by hostlist");
            deregister(&self.poll, &mut stream);
            return;
        }
        let state = if screening == Screening::Pending {
            ConnectionState::AwaitingAcl
        } else {
            ConnectionState::Open
        };
        let inserted = self.connections.insert(stream, peer, state);
        debug!(
            target: TRANSPORT_TARGET,
            connection = %inserted,
            peer = %peer,
            awaiting_acl = state == ConnectionState::AwaitingAcl,
            "connection accepted"
        );
    }

    fn on_verdict(&mut self, id: ConnectionId, accepted: bool) {
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        if connection.state != ConnectionState::AwaitingAcl {
            return;
        }
        if accepted {
            connection.state = ConnectionState::Open;
            self.on_readable(id);
        } else {
            info!(
                target: TRANSPORT_TARGET,
                peer = %connection.peer,
                "connection rejected by hostlist"
            );
            self.close(id);
        }
    }

    fn on_readable(&mut self, id: ConnectionId) {
        loop {
            let outcome = self.read_available(id);
            if matches!(outcome, ReadOutcome::Failed) {
                self.close(id);
                return;
            }
            self.parse_requests(id);
            if !matches!(outcome, ReadOutcome::BufferFull) {
                break;
            }
            let still_open = self
                .connections
                .get_mut(id)
                .is_some_and(|connection| connection.state == ConnectionState::Open);
            if !still_open {
                break;
            }
        }
        self.close_if_finished(id);
    }

    fn read_available(&mut self, id: ConnectionId) -> ReadOutcome {
        let Some(connection) = self.connections.get_mut(id) else {
            return ReadOutcome::Failed;
        };
        let limit = if connection.state == ConnectionState::AwaitingAcl {
            MAX_HEAD_BYTES
        } else {
            MAX_REQUEST_BYTES
        };
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if connection.read_buffer.len() >= limit {
                return ReadOutcome::BufferFull;
            }
            match (&connection.stream).read(&mut chunk) {
                Ok(0) => {
                    connection.peer_closed = true;
                    return ReadOutcome::Closed;
                }
                Ok(read) => {
                    if let Some(bytes) = chunk.get(..read) {
                        connection.read_buffer.extend_from_slice(bytes);
                    }
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    return ReadOutcome::Drained;
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        connection = %id,
                        error = %error,
                        "read failed"
                    );
                    return ReadOutcome::Failed;
                }
            }
        }
    }

    fn parse_requests(&mut self, id: ConnectionId) {
        loop {
            let Some(connection) = self.connections.get_mut(id) else {
                return;
            };
            if connection.state != ConnectionState::Open {
                return;
            }
            match parse_frame(&connection.read_buffer) {
                Ok(None) => return,
                Ok(Some((frame, used))) => {
                    connection.read_buffer.drain(..used);
                    let sequence = connection.take_sequence();
                    if !frame.keep_alive {
                        connection.state = ConnectionState::Closing;
                    }
                    self.handle_frame(id, sequence, frame);
                }
                Err(failure) => {
                    connection.read_buffer.clear();
                    connection.state = ConnectionState::Closing;
                    let sequence = connection.take_sequence();
                    let status = match failure {
                        FrameError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                        FrameError::Chunked => StatusCode::NOT_IMPLEMENTED,
                        FrameError::Malformed(_) => StatusCode::BAD_REQUEST,
                    };
                    debug!(
                        target: TRANSPORT_TARGET,
                        connection = %id,
                        error = %failure,
                        "request rejected before dispatch"
                    );
                    let trace = RequestTrace::new("-", "-", "");
                    let reply = Reply::text(status, status.canonical_reason().unwrap_or("error"));
                    self.reply_local(id, sequence, &reply.closing(), true, trace);
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, id: ConnectionId, sequence: u64, frame: Frame) {
        let close = !frame.keep_alive;
        let query = frame
            .target
            .split_once('?')
            .map_or("", |(_, query)| query)
            .to_owned();
        let mut trace = RequestTrace::new(frame.method.as_str(), frame.target.as_str(), query);

        let mut username = None;
        if let Some(authenticator) = self.authenticator.clone() {
            match authenticator.authenticate(&frame.method, &frame.target, frame.header("authorization")) {
                Ok(user) => {
                    trace.mark_authenticated();
                    username = Some(user);
                }
                Err(failure) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        connection = %id,
                        uri = %frame.target,
                        reason = %failure,
                        "digest authentication failed"
                    );
                    let headers = [("WWW-Authenticate".to_owned(), authenticator.challenge())];
                    let reply = Reply::text(StatusCode::UNAUTHORIZED, "authentication required")
                        .with_headers(&headers);
                    self.reply_local(id, sequence, &reply, close, trace);
                    return;
                }
            }
        }

        let Ok(method) = Method::from_bytes(frame.method.as_bytes()) else {
            let reply = Reply::text(StatusCode::BAD_REQUEST, "invalid method");
            self.reply_local(id, sequence, &reply, close, trace);
            return;
        };
        let request = DecodedRequest::decode(method, &frame.target, &frame.headers, frame.body)
            .with_username(username);
        let item = WorkItem::new(id, sequence, request, close, trace);

        match self.executor.clone() {
            Executor::Pooled(pool) => {
                if let Err(SubmitError { item, reason }) = pool.submit(item) {
                    warn!(
                        target: TRANSPORT_TARGET,
                        connection = %id,
                        reason = %reason,
                        "no worker available"
                    );
                    let trace = item.into_parts().trace;
                    let reply =
                        Reply::text(StatusCode::SERVICE_UNAVAILABLE, "server busy").closing();
                    self.reply_local(id, sequence, &reply, true, trace);
                }
            }
            Executor::Inline(handler) => handler.handle(item),
        }
    }

    fn reply_local(
        &mut self,
        id: ConnectionId,
        sequence: u64,
        reply: &Reply<'_>,
        close: bool,
        mut trace: RequestTrace,
    ) {
        trace.mark_processed();
        let message = ResponseMessage::render(id, sequence, reply, close, trace);
        self.apply_response(message);
    }

    fn drain_inbox(&mut self) {
        while let Some(event) = self.inbox.try_next() {
            match event {
                LoopEvent::Response(message) => self.apply_response(message),
                LoopEvent::AclVerdict {
                    connection,
                    accepted,
                } => self.on_verdict(connection, accepted),
            }
        }
    }

    /// Queues a response behind any earlier ones still outstanding.
    fn apply_response(&mut self, message: ResponseMessage) {
        let id = message.connection();
        let Some(connection) = self.connections.get_mut(id) else {
            debug!(
                target: TRANSPORT_TARGET,
                connection = %id,
                "dropping response for a closed connection"
            );
            self.traces.push(message.into_trace());
            return;
        };
        connection.pending.insert(message.sequence(), message);
        while let Some(next) = connection.pending.remove(&connection.next_response) {
            connection.next_response += 1;
            if connection.close_after_flush {
                self.traces.push(next.into_trace());
                continue;
            }
            for segment in next.segments() {
                connection.write_buffer.extend_from_slice(segment);
            }
            if next.close_after_send() {
                connection.close_after_flush = true;
                connection.state = ConnectionState::Closing;
            }
            let mut trace = next.into_trace();
            trace.mark_sent();
            self.traces.push(trace);
        }
        self.flush(id);
    }

    fn flush(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.get_mut(id) else {
            return;
        };
        let mut failed = false;
        while !connection.write_buffer.is_empty() {
            match (&connection.stream).write(&connection.write_buffer) {
                Ok(0) => {
                    failed = true;
                    break;
                }
                Ok(written) => {
                    connection.write_buffer.drain(..written);
                }
                Err(error) if error.kind() == ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    debug!(
                        target: TRANSPORT_TARGET,
                        connection = %id,
                        error = %error,
                        "write failed"
                    );
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            self.close(id);
        } else {
            self.close_if_finished(id);
        }
    }

    fn close_if_finished(&mut self, id: ConnectionId) {
        let finished = self
            .connections
            .get_mut(id)
            .is_some_and(|connection| connection.is_finished());
        if finished {
            self.close(id);
        }
    }

    fn close(&mut self, id: ConnectionId) {
        let Some(mut connection) = self.connections.remove(id) else {
            return;
        };
        deregister(&self.poll, &mut connection.stream);
        for (_, message) in std::mem::take(&mut connection.pending) {
            self.traces.push(message.into_trace());
        }
        if let Executor::Pooled(pool) = &self.executor {
            pool.release(id);
        }
        debug!(
            target: TRANSPORT_TARGET,
            connection = %id,
            peer = %connection.peer,
            "connection closed"
        );
    }

    fn stop(mut self) {
        info!(target: TRANSPORT_TARGET, "event loop stopping");
        for bound in &mut self.listeners {
            if let Err(error) = self.poll.registry().deregister(&mut bound.listener) {
                debug!(target: TRANSPORT_TARGET, error = %error, "listener deregistration failed");
            }
        }
        self.listeners.clear();
        let deadline = Instant::now() + self.shutdown_timeout;
        if let Some(gate) = self.gate.as_mut() {
            gate.shutdown(self.shutdown_timeout);
        }
        if let Executor::Pooled(pool) = &self.executor {
            pool.shutdown(deadline.saturating_duration_since(Instant::now()));
        }
        self.drain_inbox();
        for id in self.connections.ids() {
            self.flush(id);
            self.close(id);
        }
        self.traces.housekeeping();
        info!(target: TRANSPORT_TARGET, "event loop stopped");
    }
}

const fn listener_token(index: usize) -> Token {
    Token(LISTENER_BASE - index)
}

fn listener_index(token: Token, count: usize) -> Option<usize> {
    let index = LISTENER_BASE.checked_sub(token.0)?;
    (index < count).then_some(index)
}

fn deregister(poll: &Poll, stream: &mut TcpStream) {
    if let Err(error) = poll.registry().deregister(stream) {
        debug!(target: TRANSPORT_TARGET, error = %error, "connection deregistration failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Token(usize::MAX - 1), 2, Some(0))]
    #[case(Token(usize::MAX - 2), 2, Some(1))]
    #[case(Token(usize::MAX - 3), 2, None)]
    #[case(WAKER, 2, None)]
    #[case(Token(0), 2, None)]
    fn maps_tokens_to_listeners(
        #[case] token: Token,
        #[case] count: usize,
        #[case] expected: Option<usize>,
    ) {
        assert_eq!(listener_index(token, count), expected);
    }
}
