//! Worker threads with per-connection affinity.
//!
//! Each connection is bound to one [`ConnectionAffinity`] slot for its
//! lifetime; the slot's thread drains a FIFO queue, so responses on one
//! connection are produced in request order.

mod affinity;
mod slot;

pub use affinity::{AffinityError, ConnectionAffinity, ShutdownReport, SlotId, SubmitError};

pub(crate) const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");
