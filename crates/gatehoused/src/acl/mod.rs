//! Host-based access control for the public listener.
//!
//! A peer is admitted when its reverse-resolved name is `localhost`,
//! `localhost.localdomain`, or one of the configured allowed hosts. Verdicts
//! are cached per address so repeated connections skip resolution.

mod gate;
mod hostlist;
mod resolver;

pub(crate) use gate::{AccessGate, Screening};
pub use hostlist::{HostlistCache, HostlistEntry};
pub use resolver::{ResolveError, ReverseResolver, SystemResolver};

pub(crate) const ACL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::acl");
