use crate::{
    config::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    errors::ErrorKind,
    http::{
        request::Request,
        response::{Handled, Response},
        types::StatusCode,
    },
    instrument::{Instrumenter, NullInstrumenter},
    server::{
        connection::{ConnectionData, HttpConnection},
        reaper::Reaper,
        tls::{MaybeTlsStream, TlsMaterial},
    },
    ConnectionFilter,
};
use std::{
    future::Future,
    marker::{PhantomData, Send, Sync},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
};
use tokio_rustls::TlsAcceptor;

/// A trait for handling HTTP requests and generating responses.
///
/// You can use:
/// - `&self` for shared immutable data (e.g. database connection pool, router configuration)
/// - `&mut S` for connection-specific mutable state (e.g. authentication tokens, session data)
///
/// # Examples
///
/// Basic Request Handler
/// ```
/// use embers::{Handler, Request, Response, Handled, StatusCode};
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), req: &Request, resp: &mut Response) -> Handled {
///         // Simple echo handler
///         if req.url().target() == b"/echo" {
///             resp.status(StatusCode::Ok).body("Echo response")
///         } else {
///             resp.status(StatusCode::NotFound).body("Not found :(")
///         }
///     }
/// }
/// ```
/// Handler with [`ConnectionData`]
/// ```
/// use embers::{Handler, ConnectionData, Request, Response, Handled, StatusCode};
///
/// struct CountingHandler;
///
/// impl Handler<State> for CountingHandler {
///     async fn handle(&self, data: &mut State, req: &Request, resp: &mut Response) -> Handled {
///         data.request_count += 1;
///
///         resp.status(StatusCode::Ok)
///             .body(format!("Request #{}", data.request_count))
///     }
/// }
///
/// struct State {
///     request_count: usize,
/// }
///
/// impl ConnectionData for State {
///     fn new() -> Self {
///         Self { request_count: 0 }
///     }
///
///     fn reset(&mut self) {
///         self.request_count = 0;
///     }
/// }
/// ```
pub trait Handler<S = ()>
where
    Self: Sync + Send + 'static,
    S: ConnectionData,
{
    /// Processes an HTTP request and generates a response.
    ///
    /// # Parameters
    ///
    /// - `connection_data`: Mutable reference to connection-specific state
    /// - `req`: Immutable reference to the parsed HTTP request
    /// - `resp`: Mutable response builder for constructing the response
    ///
    /// # Returns
    ///
    /// `Handled` indicating the response is fully built.
    ///
    /// # Panics
    ///
    /// A panicking handler only takes down the connection currently being
    /// served — each connection runs on its own task — but any response it
    /// was mid-way through building is lost; the client sees the connection
    /// drop.
    fn handle(
        &self,
        connection_data: &mut S,
        request: &Request,
        response: &mut Response,
    ) -> impl Future<Output = Handled> + Send;
}

/// Decision returned by an [`ExpectValidator`] for a request carrying
/// `Expect: 100-continue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectDecision {
    /// Send the `100 Continue` interim response and read the body.
    Continue,
    /// Send this final status instead and close the connection without
    /// reading the body (the client's body bytes are presumed unread and
    /// worthless to drain).
    Reject(StatusCode),
}

/// Callback invoked for every request with `Expect: 100-continue`, deciding
/// whether the connection worker proceeds to read the body or rejects it
/// outright (for example: unsupported content type, missing auth, body would
/// exceed a route-specific ceiling).
pub type ExpectValidator = dyn Fn(&Request) -> ExpectDecision + Send + Sync;

pub(crate) fn default_expect_validator() -> Arc<ExpectValidator> {
    Arc::new(|_: &Request| ExpectDecision::Continue)
}

/// One bound socket this server accepts connections on, with optional TLS
/// termination.
struct ListenerHandle {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

/// An HTTP server that processes incoming connections and requests.
///
/// Each accepted connection is driven by its own lightweight task (see §5 of
/// the design notes): there is no fixed worker pool to size. [`ServerLimits`]
/// governs admission and shutdown instead.
///
/// # Examples
///
/// ```no_run
/// use embers::{Server, Handler, Request, Response, Handled, StatusCode};
/// use tokio::net::TcpListener;
///
/// struct MyHandler;
///
/// impl Handler for MyHandler {
///     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("Hello world!")
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     Server::builder()
///         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
///         .handler(MyHandler)
///         .build()
///         .launch()
///         .await
/// }
/// ```
pub struct Server<H: Handler<S>, S: ConnectionData = (), F: ConnectionFilter = ()> {
    listeners: Vec<ListenerHandle>,
    handler: Arc<H>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,

    base_dir: Option<Arc<Path>>,
    context_path: Option<Arc<str>>,
    expect_validator: Arc<ExpectValidator>,
    instrumenter: Arc<dyn Instrumenter>,

    reaper: Reaper,
}

impl<H: Handler<S>, S: ConnectionData, F: ConnectionFilter> Server<H, S, F> {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder<NH, NS>() -> ServerBuilder<NH, NS, ()>
    where
        NH: Handler<NS>,
        NS: ConnectionData,
    {
        ServerBuilder {
            listeners: Vec::new(),
            handler: None,
            connection_filter: Arc::new(()),
            _marker: PhantomData,

            server_limits: None,
            conn_limits: None,
            req_limits: None,
            resp_limits: None,

            base_dir: None,
            context_path: None,
            expect_validator: default_expect_validator(),
            unexpected_exception_handler: None,
            instrumenter: Arc::new(NullInstrumenter),
        }
    }

    /// Starts the server: one acceptor task per listener, plus the reaper,
    /// until every acceptor's socket closes (see
    /// [`shutdown`](ServerHandle::shutdown)) and the shutdown grace period
    /// elapses.
    #[inline]
    pub async fn launch(self) {
        let handle = self.spawn();
        handle.shutdown.notified().await;
    }

    /// Spawns the acceptors and reaper in the background and returns a
    /// handle that can trigger a graceful shutdown.
    ///
    /// [`launch`](Self::launch) is `spawn(self).wait_forever()`'s simpler
    /// sibling for programs that never need to stop the server themselves.
    pub fn spawn(self) -> ServerHandle {
        let shutdown = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));

        let reaper_task = tokio::spawn({
            let reaper = self.reaper.clone();
            let conn_limits = self.conn_limits.clone();
            let shutdown = shutdown.clone();
            async move { reaper.run(conn_limits, shutdown).await }
        });

        let mut acceptor_tasks = Vec::with_capacity(self.listeners.len());
        for listener_handle in self.listeners {
            acceptor_tasks.push(tokio::spawn(accept_loop(
                listener_handle,
                self.handler.clone(),
                self.connection_filter.clone(),
                self.server_limits.clone(),
                self.conn_limits.clone(),
                self.req_limits.clone(),
                self.resp_limits.clone(),
                self.expect_validator.clone(),
                self.instrumenter.clone(),
                self.reaper.clone(),
                active.clone(),
                shutdown.clone(),
                self.base_dir.clone(),
                self.context_path.clone(),
            )));
        }

        ServerHandle {
            shutdown,
            shutdown_duration: self.server_limits.shutdown_duration,
            acceptor_tasks,
            reaper_task,
        }
    }
}

/// Returned by [`Server::spawn`]; lets a caller request a graceful shutdown
/// instead of running forever.
pub struct ServerHandle {
    shutdown: Arc<Notify>,
    shutdown_duration: std::time::Duration,
    acceptor_tasks: Vec<tokio::task::JoinHandle<()>>,
    reaper_task: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting new connections, gives in-flight connections up to
    /// `shutdown_duration` to finish on their own, then forces the rest
    /// closed (per §5: sockets are force-closed, not the tasks themselves —
    /// the task unwinds once its read/write fails).
    pub async fn shutdown(self) {
        self.shutdown.notify_waiters();
        tokio::time::sleep(self.shutdown_duration).await;

        for task in self.acceptor_tasks {
            task.abort();
        }
        self.reaper_task.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop<H: Handler<S>, S: ConnectionData, F: ConnectionFilter>(
    mut listener_handle: ListenerHandle,
    handler: Arc<H>,
    connection_filter: Arc<F>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
    resp_limits: RespLimits,
    expect_validator: Arc<ExpectValidator>,
    instrumenter: Arc<dyn Instrumenter>,
    reaper: Reaper,
    active: Arc<AtomicUsize>,
    shutdown: Arc<Notify>,
    base_dir: Option<Arc<Path>>,
    context_path: Option<Arc<str>>,
) {
    let scheme: &'static str = if listener_handle.acceptor.is_some() {
        "https"
    } else {
        "http"
    };
    let mut reject_response = Response::new(&resp_limits);

    loop {
        let accepted = tokio::select! {
            biased;
            result = listener_handle.listener.accept() => result,
            _ = shutdown.notified() => break,
        };

        let Ok((stream, client_addr)) = accepted else {
            continue;
        };
        let Ok(server_addr) = stream.local_addr() else {
            continue;
        };

        if let Some(max) = server_limits.max_connections {
            if active.load(Ordering::Relaxed) >= max {
                let mut stream = stream;
                let bytes =
                    ErrorKind::ServiceUnavailable.as_http(crate::Version::Http11, server_limits.json_errors);
                let _ = tokio::io::AsyncWriteExt::write_all(&mut stream, bytes).await;
                continue;
            }
        }

        reject_response.reset(&resp_limits);
        if connection_filter
            .filter(client_addr, server_addr, &mut reject_response)
            .is_err()
            || connection_filter
                .filter_async(client_addr, server_addr, &mut reject_response)
                .await
                .is_err()
        {
            let mut stream = stream;
            let _ = tokio::io::AsyncWriteExt::write_all(&mut stream, reject_response.buffer()).await;
            continue;
        }

        let mut stream = match MaybeTlsStream::accept(stream, listener_handle.acceptor.as_ref()).await {
            Ok(stream) => stream,
            Err(_) => continue,
        };

        let (worker_id, worker) = reaper.register();
        instrumenter.accepted_connection();
        active.fetch_add(1, Ordering::Relaxed);

        let handler = handler.clone();
        let reaper = reaper.clone();
        let active = active.clone();
        let instrumenter = instrumenter.clone();
        let mut conn = HttpConnection::new(
            handler,
            server_limits.clone(),
            conn_limits.clone(),
            req_limits.clone(),
            resp_limits.clone(),
            expect_validator.clone(),
            instrumenter.clone(),
            worker,
            base_dir.clone(),
            context_path.clone(),
        );

        instrumenter.worker_started();
        tokio::spawn(async move {
            let _ = conn.run(&mut stream, client_addr, server_addr, scheme).await;

            reaper.deregister(worker_id);
            active.fetch_sub(1, Ordering::Relaxed);
            instrumenter.worker_stopped();
        });
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H, S = (), F = ()>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    listeners: Vec<ListenerHandle>,
    handler: Option<Arc<H>>,
    connection_filter: Arc<F>,
    _marker: PhantomData<S>,

    server_limits: Option<ServerLimits>,
    conn_limits: Option<ConnLimits>,
    req_limits: Option<ReqLimits>,
    resp_limits: Option<RespLimits>,

    base_dir: Option<Arc<Path>>,
    context_path: Option<Arc<str>>,
    expect_validator: Arc<ExpectValidator>,
    unexpected_exception_handler: Option<Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>>,
    instrumenter: Arc<dyn Instrumenter>,
}

impl<H, S, F> ServerBuilder<H, S, F>
where
    H: Handler<S>,
    S: ConnectionData,
    F: ConnectionFilter,
{
    /// Adds a plaintext TCP listener. Callable more than once to serve
    /// several sockets from one server.
    ///
    /// **At least one listener is required.**
    #[inline(always)]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listeners.push(ListenerHandle {
            listener,
            acceptor: None,
        });
        self
    }

    /// Adds a TLS-terminated listener, building the `rustls::ServerConfig`
    /// once up front.
    ///
    /// # Errors
    ///
    /// Returns the `rustls::Error` if the certificate/key pair is invalid.
    #[inline]
    pub fn tls_listener(
        mut self,
        listener: TcpListener,
        material: TlsMaterial,
    ) -> Result<Self, rustls::Error> {
        let acceptor = material.into_acceptor()?;
        self.listeners.push(ListenerHandle {
            listener,
            acceptor: Some(acceptor),
        });
        Ok(self)
    }

    /// Sets the request handler that will process incoming requests.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Installs a connection filter to check incoming TCP connections
    /// before using it.
    ///
    /// Allows early rejection of unwanted IP addresses (before the
    /// first read). Can be used for DDoS protection, geobanning, etc.
    ///
    /// For more information, see [`ConnectionFilter`](crate::ConnectionFilter).
    #[inline(always)]
    pub fn conn_filter<NewF>(self, filter: NewF) -> ServerBuilder<H, S, NewF>
    where
        NewF: ConnectionFilter,
    {
        ServerBuilder {
            listeners: self.listeners,
            handler: self.handler,
            connection_filter: Arc::new(filter),
            _marker: self._marker,
            server_limits: self.server_limits,
            conn_limits: self.conn_limits,
            req_limits: self.req_limits,
            resp_limits: self.resp_limits,
            base_dir: self.base_dir,
            context_path: self.context_path,
            expect_validator: self.expect_validator,
            unexpected_exception_handler: self.unexpected_exception_handler,
            instrumenter: self.instrumenter,
        }
    }

    /// Configures server-level admission and shutdown behavior.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures connection-level timeouts and throughput floors.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = Some(limits);
        self
    }

    /// Configures response processing limits.
    #[inline(always)]
    pub fn response_limits(mut self, limits: RespLimits) -> Self {
        self.resp_limits = Some(limits);
        self
    }

    /// Sets the filesystem root handlers may use for static resource lookup.
    ///
    /// Purely a convention passed through to the application: the connection
    /// worker has no filesystem concept of its own.
    #[inline(always)]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(Arc::from(dir.into()));
        self
    }

    /// Sets the URL prefix reported alongside every request.
    #[inline(always)]
    pub fn context_path(mut self, path: impl Into<String>) -> Self {
        self.context_path = Some(Arc::from(path.into()));
        self
    }

    /// Installs the callback consulted for every `Expect: 100-continue`
    /// request (default: always continue).
    #[inline(always)]
    pub fn expect_validator<Fun>(mut self, validator: Fun) -> Self
    where
        Fun: Fn(&Request) -> ExpectDecision + Send + Sync + 'static,
    {
        self.expect_validator = Arc::new(validator);
        self
    }

    /// Installs a hook for handler panics that escape a connection task.
    ///
    /// Each connection already runs on its own task, so a panic here only
    /// takes down the one connection being served; this hook exists purely
    /// for observability (logging, metrics) and never changes that outcome.
    #[inline(always)]
    pub fn unexpected_exception_handler<Fun>(mut self, hook: Fun) -> Self
    where
        Fun: Fn(&dyn std::any::Any) + Send + Sync + 'static,
    {
        self.unexpected_exception_handler = Some(Arc::new(hook));
        self
    }

    /// Installs an [`Instrumenter`] to observe server-lifecycle and
    /// per-connection events.
    #[inline(always)]
    pub fn instrumenter<I: Instrumenter>(mut self, instrumenter: I) -> Self {
        self.instrumenter = Arc::new(instrumenter);
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// - No [`listener`](Self::listener)/[`tls_listener`](Self::tls_listener) was added.
    /// - [`handler`](Self::handler) was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, S, F> {
        assert!(
            !self.listeners.is_empty(),
            "at least one `listener`/`tls_listener` must be added to build a Server"
        );
        let handler = self
            .handler
            .expect("The `handler` method must be called to create");

        Server {
            listeners: self.listeners,
            handler,
            connection_filter: self.connection_filter,
            _marker: PhantomData,

            server_limits: self.server_limits.unwrap_or_default(),
            conn_limits: self.conn_limits.unwrap_or_default(),
            req_limits: self.req_limits.unwrap_or_default().precalculate(),
            resp_limits: self.resp_limits.unwrap_or_default(),

            base_dir: self.base_dir,
            context_path: self.context_path,
            expect_validator: self.expect_validator,
            instrumenter: self.instrumenter,

            reaper: Reaper::new(),
        }
    }
}
