//! HTTP digest authentication.
//!
//! Credentials are loaded once at start-up from a `user:realm:hash` table and
//! shared read-only with the event loop, which verifies each request's
//! `Authorization` header before handing the request to a worker.

mod credentials;
mod digest;
mod header;

pub use credentials::{AuthEntry, CredentialsError, load_credentials};
pub use digest::{AuthFailure, DigestAuthenticator, client_response, issue_nonce};
