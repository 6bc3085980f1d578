//! Request dispatch from worker threads.
//!
//! The event loop decodes each request into a [`WorkItem`] and hands it to a
//! [`WorkHandler`]. The [`Dispatcher`] classifies the request, runs the
//! content builder under the process-wide database lock, renders the
//! [`ResponseMessage`], and posts it back to the loop for writing.

mod database;
mod dispatcher;
mod request;
mod response;
mod work;

pub use database::{DatabaseAccess, SharedDatabase};
pub use dispatcher::{Dispatcher, WorkHandler};
pub use request::{Cookies, DecodedRequest, JSON_RPC_QUERY, RequestKind};
pub use response::{Reply, ResponseMessage};
pub(crate) use response::NOT_IMPLEMENTED_RESPONSE;
pub use work::WorkItem;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");
