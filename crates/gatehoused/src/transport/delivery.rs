//! Thread-safe hand-off from workers to the event loop.
//!
//! Posting pushes onto an unbounded channel and wakes the poller, so the
//! loop drains responses on its next iteration without blocking the sender.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use mio::{Registry, Token, Waker};
use thiserror::Error;
use tracing::warn;

use super::{ConnectionId, TRANSPORT_TARGET};
use crate::dispatch::ResponseMessage;

/// Messages the event loop receives from other threads.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    Response(ResponseMessage),
    AclVerdict {
        connection: ConnectionId,
        accepted: bool,
    },
}

/// The event loop has stopped; the message was not queued.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The event loop has stopped; the undelivered message is handed back.
    #[error("event loop is no longer accepting responses")]
    Closed(ResponseMessage),
    /// The event loop has stopped before a hostlist verdict could reach it.
    #[error("event loop is no longer accepting verdicts")]
    VerdictDropped,
}

/// Cloneable sender used by workers and the resolver thread.
#[derive(Clone)]
pub struct ResponseDelivery {
    sender: Sender<LoopEvent>,
    waker: Arc<Waker>,
}

impl std::fmt::Debug for ResponseDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseDelivery").finish_non_exhaustive()
    }
}

impl ResponseDelivery {
    /// Queues a response and wakes the event loop.
    ///
    /// # Errors
    ///
    /// Returns the message inside [`DeliveryError::Closed`] if the loop has
    /// gone away.
    pub fn post(&self, message: ResponseMessage) -> Result<(), DeliveryError> {
        self.sender
            .send(LoopEvent::Response(message))
            .map_err(|error| match error.into_inner() {
                LoopEvent::Response(message) => DeliveryError::Closed(message),
                LoopEvent::AclVerdict { .. } => DeliveryError::VerdictDropped,
            })?;
        self.wake();
        Ok(())
    }

    pub(crate) fn post_verdict(
        &self,
        connection: ConnectionId,
        accepted: bool,
    ) -> Result<(), DeliveryError> {
        self.sender
            .send(LoopEvent::AclVerdict {
                connection,
                accepted,
            })
            .map_err(|_| DeliveryError::VerdictDropped)?;
        self.wake();
        Ok(())
    }

    pub(crate) fn wake(&self) {
        // A failed wake leaves the event queued; the housekeeping tick
        // drains it.
        if let Err(error) = self.waker.wake() {
            warn!(target: TRANSPORT_TARGET, error = %error, "failed to wake event loop");
        }
    }
}

/// Receiving half owned by the event loop.
#[derive(Debug)]
pub(crate) struct DeliveryInbox {
    receiver: Receiver<LoopEvent>,
}

impl DeliveryInbox {
    /// Takes the next queued event without blocking.
    pub(crate) fn try_next(&self) -> Option<LoopEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Builds a connected delivery pair whose waker fires `token` on `registry`.
pub(crate) fn delivery_channel(
    registry: &Registry,
    token: Token,
) -> std::io::Result<(ResponseDelivery, DeliveryInbox)> {
    let waker = Arc::new(Waker::new(registry, token)?);
    let (sender, receiver) = unbounded();
    Ok((
        ResponseDelivery { sender, waker },
        DeliveryInbox { receiver },
    ))
}
