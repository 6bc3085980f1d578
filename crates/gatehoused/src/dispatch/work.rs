//! Unit of work travelling from the event loop to a worker.

use std::time::Instant;

use super::request::DecodedRequest;
use crate::trace::RequestTrace;
use crate::transport::ConnectionId;

/// A parsed request bound to the connection it arrived on.
///
/// Owned by exactly one queue or thread at a time; the trace moves with it
/// and comes back inside the [`super::ResponseMessage`].
#[derive(Debug)]
pub struct WorkItem {
    connection: ConnectionId,
    sequence: u64,
    request: DecodedRequest,
    close_after_send: bool,
    arrived: Instant,
    trace: RequestTrace,
}

impl WorkItem {
    /// Builds a work item.
    #[must_use]
    pub fn new(
        connection: ConnectionId,
        sequence: u64,
        request: DecodedRequest,
        close_after_send: bool,
        trace: RequestTrace,
    ) -> Self {
        Self {
            connection,
            sequence,
            request,
            close_after_send,
            arrived: trace.received(),
            trace,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Position of the request within its connection.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn request(&self) -> &DecodedRequest {
        &self.request
    }

    /// Whether the connection closes once this response is written.
    #[must_use]
    pub const fn close_after_send(&self) -> bool {
        self.close_after_send
    }

    #[must_use]
    pub const fn arrived(&self) -> Instant {
        self.arrived
    }

    #[must_use]
    pub const fn trace(&self) -> &RequestTrace {
        &self.trace
    }

    /// Splits the item into its owned parts.
    pub(crate) fn into_parts(self) -> WorkParts {
        WorkParts {
            connection: self.connection,
            sequence: self.sequence,
            request: self.request,
            close_after_send: self.close_after_send,
            trace: self.trace,
        }
    }
}

pub(crate) struct WorkParts {
    pub(crate) connection: ConnectionId,
    pub(crate) sequence: u64,
    pub(crate) request: DecodedRequest,
    pub(crate) close_after_send: bool,
    pub(crate) trace: RequestTrace,
}
