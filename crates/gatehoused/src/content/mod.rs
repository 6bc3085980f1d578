//! Content generation seam between the dispatcher and the database.
//!
//! A [`ContentBuilder`] turns a decoded request into a response body while
//! reaching the database only through [`DatabaseAccess`]. The server ships
//! with [`StoreContentBuilder`] over an in-memory [`MemoryStore`].

mod builder;
mod rpc;
mod store;

use http::StatusCode;
use thiserror::Error;

use crate::dispatch::{DatabaseAccess, DecodedRequest, RequestKind};

pub use builder::StoreContentBuilder;
pub use rpc::{RpcError, RpcRequest, RpcResponse};
pub use store::MemoryStore;

/// A generated response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub status: StatusCode,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Closes the connection after this response.
    pub close: bool,
}

impl Content {
    /// Response with the given status, type, and body.
    #[must_use]
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            headers: Vec::new(),
            body,
            close: false,
        }
    }

    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new(
            StatusCode::OK,
            "application/json",
            value.to_string().into_bytes(),
        )
    }
}

/// Result of asking a builder to serve a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Content(Content),
    /// No route matched; the server answers 501.
    NotHandled,
}

/// Failure while building content; mapped to an error status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct ContentError {
    /// Status sent to the client.
    pub status: StatusCode,
    /// Plain-text body sent to the client.
    pub message: String,
}

impl ContentError {
    /// Error answered with `status`.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// `400 Bad Request`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// `404 Not Found`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// `500 Internal Server Error`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

/// Produces response content for requests, holding the database lock only
/// through the supplied [`DatabaseAccess`].
pub trait ContentBuilder<D>: Send + Sync {
    /// Builds the response for `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`ContentError`] that the dispatcher renders as an error
    /// response.
    fn build(
        &self,
        request: &DecodedRequest,
        kind: RequestKind,
        database: &mut DatabaseAccess<'_, D>,
    ) -> Result<Outcome, ContentError>;
}
