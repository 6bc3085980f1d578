//! Serialised responses travelling from workers back to the event loop.

use http::StatusCode;

use crate::trace::RequestTrace;
use crate::transport::ConnectionId;

/// Fixed reply written when no content path exists for a request.
pub(crate) const NOT_IMPLEMENTED_RESPONSE: &[u8] =
    b"HTTP/1.1 501 Not Implemented\r\nContent-Length: 0\r\n\r\n";

/// Response bytes addressed to one connection.
///
/// The event loop writes the segments only if the addressed connection is
/// still the one that produced the request.
#[derive(Debug)]
pub struct ResponseMessage {
    connection: ConnectionId,
    sequence: u64,
    head: Vec<u8>,
    body: Vec<u8>,
    close_after_send: bool,
    send_501: bool,
    trace: RequestTrace,
}

impl ResponseMessage {
    /// Builds a message from a rendered head and body.
    #[must_use]
    pub fn new(
        connection: ConnectionId,
        sequence: u64,
        head: Vec<u8>,
        body: Vec<u8>,
        close_after_send: bool,
        trace: RequestTrace,
    ) -> Self {
        Self {
            connection,
            sequence,
            head,
            body,
            close_after_send,
            send_501: false,
            trace,
        }
    }

    /// Message asking the event loop to write the canned 501 reply.
    #[must_use]
    pub fn not_implemented(
        connection: ConnectionId,
        sequence: u64,
        close_after_send: bool,
        trace: RequestTrace,
    ) -> Self {
        Self {
            connection,
            sequence,
            head: Vec::new(),
            body: Vec::new(),
            close_after_send,
            send_501: true,
            trace,
        }
    }

    /// Renders a complete response in one step.
    #[must_use]
    pub fn render(
        connection: ConnectionId,
        sequence: u64,
        reply: &Reply<'_>,
        close_after_send: bool,
        trace: RequestTrace,
    ) -> Self {
        let close = close_after_send || reply.close;
        Self::new(
            connection,
            sequence,
            reply.head(close),
            reply.body.to_vec(),
            close,
            trace,
        )
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn close_after_send(&self) -> bool {
        self.close_after_send
    }

    #[must_use]
    pub const fn is_not_implemented(&self) -> bool {
        self.send_501
    }

    #[must_use]
    pub const fn trace(&self) -> &RequestTrace {
        &self.trace
    }

    /// Bytes to write, in order.
    #[must_use]
    pub fn segments(&self) -> [&[u8]; 2] {
        if self.send_501 {
            [NOT_IMPLEMENTED_RESPONSE, &[][..]]
        } else {
            [self.head.as_slice(), self.body.as_slice()]
        }
    }

    /// Releases the trace once the bytes have been queued.
    pub(crate) fn into_trace(self) -> RequestTrace {
        self.trace
    }
}

/// Status line, headers, and body of a response before framing.
#[derive(Debug, Clone)]
pub struct Reply<'a> {
    pub status: StatusCode,
    pub content_type: &'a str,
    pub headers: &'a [(String, String)],
    pub body: &'a [u8],
    pub close: bool,
}

impl<'a> Reply<'a> {
    /// Plain-text reply with no extra headers.
    #[must_use]
    pub fn text(status: StatusCode, body: &'a str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            headers: &[],
            body: body.as_bytes(),
            close: false,
        }
    }

    /// Marks the reply as closing the connection.
    #[must_use]
    pub const fn closing(mut self) -> Self {
        self.close = true;
        self
    }

    /// Adds extra headers.
    #[must_use]
    pub const fn with_headers(mut self, headers: &'a [(String, String)]) -> Self {
        self.headers = headers;
        self
    }

    fn head(&self, close: bool) -> Vec<u8> {
        let reason = self.status.canonical_reason().unwrap_or("Unknown");
        let mut head = format!(
            "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status.as_u16(),
            self.content_type,
            self.body.len()
        );
        for (name, value) in self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if close {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }
}
