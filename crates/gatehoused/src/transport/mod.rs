//! Network transport: listeners, the event loop, and response delivery.
//!
//! All socket I/O happens on one event loop thread. Workers never touch a
//! socket; they post [`ResponseMessage`](crate::dispatch::ResponseMessage)s
//! through [`ResponseDelivery`], which wakes the loop to write them.

mod connection;
mod delivery;
mod errors;
mod event_loop;
mod http;
mod listener;
mod server;

pub use self::connection::ConnectionId;
pub use self::delivery::{DeliveryError, ResponseDelivery};
pub use self::errors::{ListenerError, ServerError};
pub use self::server::{ServerBuilder, ServerHandle};

#[cfg(test)]
pub(crate) use self::delivery::{DeliveryInbox, LoopEvent, delivery_channel};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
