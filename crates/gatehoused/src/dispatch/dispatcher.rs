//! Worker-side execution of a work item.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use tracing::{debug, error};

use super::DISPATCH_TARGET;
use super::database::{DatabaseAccess, SharedDatabase};
use super::request::RequestKind;
use super::response::{Reply, ResponseMessage};
use super::work::{WorkItem, WorkParts};
use crate::content::{ContentBuilder, Outcome};
use crate::trace::TraceBuffer;
use crate::transport::{DeliveryError, ResponseDelivery};

/// Consumes work items on a worker thread.
pub trait WorkHandler: Send + Sync {
    /// Serves one item and posts its response to the event loop.
    fn handle(&self, item: WorkItem);
}

/// Runs the content builder for each item and posts the response.
pub struct Dispatcher<D> {
    database: SharedDatabase<D>,
    content: Arc<dyn ContentBuilder<D>>,
    delivery: ResponseDelivery,
    traces: Arc<TraceBuffer>,
}

impl<D> Dispatcher<D> {
    /// Builds a dispatcher over the shared database.
    pub fn new(
        database: SharedDatabase<D>,
        content: Arc<dyn ContentBuilder<D>>,
        delivery: ResponseDelivery,
        traces: Arc<TraceBuffer>,
    ) -> Self {
        Self {
            database,
            content,
            delivery,
            traces,
        }
    }

    /// Builds the response for `item` without posting it.
    pub fn execute(&self, item: WorkItem) -> ResponseMessage {
        let WorkParts {
            connection,
            sequence,
            request,
            close_after_send,
            mut trace,
        } = item.into_parts();

        let kind = request.kind();
        if kind == RequestKind::Unroutable {
            trace.mark_processed();
            return ResponseMessage::not_implemented(connection, sequence, close_after_send, trace);
        }

        let built = {
            let mut access = DatabaseAccess::new(&self.database, &mut trace);
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.content.build(&request, kind, &mut access)
            }))
        };
        trace.mark_processed();

        match built {
            Ok(Ok(Outcome::Content(content))) => {
                let reply = Reply {
                    status: content.status,
                    content_type: &content.content_type,
                    headers: &content.headers,
                    body: &content.body,
                    close: content.close,
                };
                ResponseMessage::render(connection, sequence, &reply, close_after_send, trace)
            }
            Ok(Ok(Outcome::NotHandled)) => {
                ResponseMessage::not_implemented(connection, sequence, close_after_send, trace)
            }
            Ok(Err(failure)) => {
                debug!(
                    target: DISPATCH_TARGET,
                    uri = %request.uri(),
                    status = failure.status.as_u16(),
                    message = %failure.message,
                    "content builder reported an error"
                );
                let reply = Reply::text(failure.status, &failure.message);
                ResponseMessage::render(connection, sequence, &reply, close_after_send, trace)
            }
            Err(payload) => {
                error!(
                    target: DISPATCH_TARGET,
                    uri = %request.uri(),
                    panic = %panic_message(payload.as_ref()),
                    "content builder panicked"
                );
                let reply = Reply::text(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
                ResponseMessage::render(connection, sequence, &reply, close_after_send, trace)
            }
        }
    }
}

impl<D: Send> WorkHandler for Dispatcher<D> {
    fn handle(&self, item: WorkItem) {
        let message = self.execute(item);
        if let Err(DeliveryError::Closed(message)) = self.delivery.post(message) {
            debug!(
                target: DISPATCH_TARGET,
                "event loop gone; archiving trace from the worker"
            );
            self.traces.push(message.into_trace());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
