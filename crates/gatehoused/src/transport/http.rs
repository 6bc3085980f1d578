//! HTTP/1.x request framing.
//!
//! Requests are delimited by the header terminator plus `Content-Length`
//! body bytes. Several requests may sit in one read buffer (pipelining);
//! [`parse_frame`] consumes one at a time.

use thiserror::Error;

/// Header count accepted per request.
pub(crate) const MAX_HEADERS: usize = 64;
/// Bytes of request head accepted before the terminator must appear.
pub(crate) const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Largest accepted request, head plus body.
pub(crate) const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;

/// One complete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    /// Whether the connection stays open after the response.
    pub(crate) keep_alive: bool,
}

impl Frame {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reasons a request cannot be framed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum FrameError {
    /// The head does not parse; answered with 400.
    #[error("malformed request: {0}")]
    Malformed(String),
    /// Head or body is over the size limit; answered with 413.
    #[error("request exceeds {limit} bytes")]
    TooLarge {
        /// Limit in bytes.
        limit: usize,
    },
    /// Chunked request bodies are answered with 501.
    #[error("chunked transfer encoding is not supported")]
    Chunked,
}

/// Parses the first request in `buffer`.
///
/// Returns the frame and the number of bytes it occupied, or `None` when more
/// bytes are needed.
pub(crate) fn parse_frame(buffer: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    parse_frame_with_limit(buffer, MAX_REQUEST_BYTES)
}

pub(crate) fn parse_frame_with_limit(
    buffer: &[u8],
    limit: usize,
) -> Result<Option<(Frame, usize)>, FrameError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);
    let head_len = match request.parse(buffer) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buffer.len() > MAX_HEAD_BYTES.min(limit) {
                return Err(FrameError::TooLarge {
                    limit: MAX_HEAD_BYTES.min(limit),
                });
            }
            return Ok(None);
        }
        Err(error) => return Err(FrameError::Malformed(error.to_string())),
    };

    let method = request.method.unwrap_or_default().to_owned();
    let target = request.path.unwrap_or_default().to_owned();
    let version = request.version.unwrap_or(1);
    let headers: Vec<(String, String)> = request
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_owned(),
                String::from_utf8_lossy(header.value).trim().to_owned(),
            )
        })
        .collect();

    let find = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    };
    if find("transfer-encoding").is_some_and(|value| value.to_ascii_lowercase().contains("chunked"))
    {
        return Err(FrameError::Chunked);
    }
    let content_length = match find("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| FrameError::Malformed(format!("invalid content-length '{value}'")))?,
        None => 0,
    };
    let total = head_len.saturating_add(content_length);
    if total > limit {
        return Err(FrameError::TooLarge { limit });
    }
    let Some(body) = buffer.get(head_len..total) else {
        return Ok(None);
    };

    let keep_alive = keep_alive(version, find("connection"));
    Ok(Some((
        Frame {
            method,
            target,
            body: body.to_vec(),
            headers,
            keep_alive,
        },
        total,
    )))
}

/// HTTP/1.1 defaults to keep-alive; HTTP/1.0 must ask for it.
fn keep_alive(version: u8, connection: Option<&str>) -> bool {
    let has = |token: &str| {
        connection.is_some_and(|value| {
            value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token))
        })
    };
    if version >= 1 { !has("close") } else { has("keep-alive") }
}
