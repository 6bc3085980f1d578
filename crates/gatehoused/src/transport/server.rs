//! Server assembly and the handle used to stop it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gatehouse_config::{DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_TRACE_CAPACITY, ListenEndpoint};
use mio::Poll;
use tracing::info;

use super::delivery::{ResponseDelivery, delivery_channel};
use super::event_loop::{EventLoop, Executor, LoopParts, WAKER};
use super::listener::BoundListener;
use super::{ServerError, TRANSPORT_TARGET};
use crate::acl::{AccessGate, HostlistCache};
use crate::auth::DigestAuthenticator;
use crate::content::ContentBuilder;
use crate::dispatch::{Dispatcher, SharedDatabase, WorkHandler};
use crate::pool::ConnectionAffinity;
use crate::trace::TraceBuffer;

/// Configures and starts the event loop and its workers.
pub struct ServerBuilder<D> {
    database: SharedDatabase<D>,
    content: Arc<dyn ContentBuilder<D>>,
    endpoints: Vec<(ListenEndpoint, bool)>,
    authenticator: Option<Arc<DigestAuthenticator>>,
    hostlist: Option<Arc<HostlistCache>>,
    multithread: bool,
    max_worker_threads: Option<usize>,
    shutdown_timeout: Duration,
    traces: Arc<TraceBuffer>,
}

impl<D: Send + 'static> ServerBuilder<D> {
    /// Starts a builder serving `content` over `database`.
    pub fn new(database: SharedDatabase<D>, content: Arc<dyn ContentBuilder<D>>) -> Self {
        Self {
            database,
            content,
            endpoints: Vec::new(),
            authenticator: None,
            hostlist: None,
            multithread: true,
            max_worker_threads: None,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            traces: Arc::new(TraceBuffer::new(DEFAULT_TRACE_CAPACITY, false)),
        }
    }

    /// Adds a listener. `require_acl` subjects its connections to the
    /// hostlist.
    #[must_use]
    pub fn listen(mut self, endpoint: ListenEndpoint, require_acl: bool) -> Self {
        self.endpoints.push((endpoint, require_acl));
        self
    }

    /// Enforces digest authentication on every request.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Option<Arc<DigestAuthenticator>>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Screens connections on ACL listeners through `hostlist`.
    #[must_use]
    pub fn hostlist(mut self, hostlist: Option<Arc<HostlistCache>>) -> Self {
        self.hostlist = hostlist;
        self
    }

    /// Chooses between per-connection worker threads and inline dispatch.
    #[must_use]
    pub const fn multithread(mut self, enabled: bool) -> Self {
        self.multithread = enabled;
        self
    }

    #[must_use]
    pub const fn max_worker_threads(mut self, limit: Option<usize>) -> Self {
        self.max_worker_threads = limit;
        self
    }

    #[must_use]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn traces(mut self, traces: Arc<TraceBuffer>) -> Self {
        self.traces = traces;
        self
    }

    /// Binds every listener and spawns the event loop thread.
    ///
    /// # Errors
    ///
    /// Fails if a listener cannot be bound, the poller cannot be created, or
    /// a thread cannot be spawned.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        let poll = Poll::new().map_err(|source| ServerError::Poll { source })?;
        let (delivery, inbox) =
            delivery_channel(poll.registry(), WAKER).map_err(|source| ServerError::Poll { source })?;

        let listeners = self
            .endpoints
            .iter()
            .map(|(endpoint, require_acl)| BoundListener::bind(endpoint, *require_acl))
            .collect::<Result<Vec<_>, _>>()?;
        let local_addrs: Vec<SocketAddr> =
            listeners.iter().map(|bound| bound.local_addr).collect();

        let dispatcher: Arc<dyn WorkHandler> = Arc::new(Dispatcher::new(
            self.database,
            self.content,
            delivery.clone(),
            Arc::clone(&self.traces),
        ));
        let (executor, pool) = if self.multithread {
            let pool = Arc::new(ConnectionAffinity::new(dispatcher, self.max_worker_threads));
            (Executor::Pooled(Arc::clone(&pool)), Some(pool))
        } else {
            (Executor::Inline(dispatcher), None)
        };
        let gate = self
            .hostlist
            .map(|cache| AccessGate::start(cache, delivery.clone()))
            .transpose()
            .map_err(|source| ServerError::Spawn {
                role: "resolver",
                source,
            })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let event_loop = EventLoop::new(LoopParts {
            poll,
            listeners,
            inbox,
            gate,
            authenticator: self.authenticator,
            executor,
            traces: Arc::clone(&self.traces),
            shutdown: Arc::clone(&shutdown),
            shutdown_timeout: self.shutdown_timeout,
        })?;
        let thread = thread::Builder::new()
            .name("gatehouse-event-loop".to_owned())
            .spawn(move || event_loop.run())
            .map_err(|source| ServerError::Spawn {
                role: "event loop",
                source,
            })?;
        info!(
            target: TRANSPORT_TARGET,
            addresses = ?local_addrs,
            multithread = pool.is_some(),
            "server started"
        );
        Ok(ServerHandle {
            local_addrs,
            shutdown,
            delivery,
            thread: Some(thread),
            pool,
            traces: self.traces,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    local_addrs: Vec<SocketAddr>,
    shutdown: Arc<AtomicBool>,
    delivery: ResponseDelivery,
    thread: Option<JoinHandle<()>>,
    pool: Option<Arc<ConnectionAffinity>>,
    traces: Arc<TraceBuffer>,
}

impl ServerHandle {
    /// Bound addresses, in listener order.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Asks the event loop to stop. Returns immediately.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.delivery.wake();
    }

    /// Waits for the event loop to finish its shutdown sequence. Later calls
    /// return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ThreadPanic`] if the loop thread panicked.
    pub fn join(&mut self) -> Result<(), ServerError> {
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| ServerError::ThreadPanic),
            None => Ok(()),
        }
    }

    /// Worker threads still running.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(0, |pool| pool.thread_count())
    }

    /// Archive of completed request traces.
    #[must_use]
    pub fn traces(&self) -> &Arc<TraceBuffer> {
        &self.traces
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.delivery.wake();
    }
}
