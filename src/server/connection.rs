use crate::{
    config::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    errors::{ErrorAction, ErrorKind},
    http::{
        body::BodyReader,
        request::{Parser, Request},
        response::Response,
    },
    instrument::Instrumenter,
    server::{
        reaper::{Phase, WorkerHandle},
        server_impl::{ExpectDecision, ExpectValidator, Handler},
    },
    Handled,
};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::sleep,
};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,
    pub(crate) body_reader: BodyReader,
    body_buf: Box<[u8]>,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,

    expect_validator: Arc<ExpectValidator>,
    instrumenter: Arc<dyn Instrumenter>,
    worker: Arc<WorkerHandle>,

    base_dir: Option<Arc<Path>>,
    context_path: Option<Arc<str>>,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handler: Arc<H>,
        server_limits: ServerLimits,
        conn_limits: ConnLimits,
        req_limits: ReqLimits,
        resp_limits: RespLimits,
        expect_validator: Arc<ExpectValidator>,
        instrumenter: Arc<dyn Instrumenter>,
        worker: Arc<WorkerHandle>,
        base_dir: Option<Arc<Path>>,
        context_path: Option<Arc<str>>,
    ) -> Self {
        let body_buf = vec![0; req_limits.request_buffer_size].into_boxed_slice();

        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&req_limits),
            request: Request::new(&req_limits),
            response: Response::new(&resp_limits),
            body_reader: BodyReader::None,
            body_buf,

            server_limits,
            conn_limits,
            req_limits,
            resp_limits,

            expect_validator,
            instrumenter,
            worker,

            base_dir,
            context_path,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
        self.body_reader = BodyReader::None;
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Drives one connection to completion: repeated `ParsePreamble → [Expect]
    /// → ReadBody → Dispatch → Drain → Emit` cycles per §4.5, until the
    /// connection closes (peer EOF, `Connection: close`, the per-connection
    /// request ceiling, or an unrecoverable error).
    #[inline]
    pub(crate) async fn run<St: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut St,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        scheme: &'static str,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;
        self.request.scheme = scheme;
        self.request.base_dir = self.base_dir.clone();
        self.request.context_path = self.context_path.clone();

        let result = match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(error) => self.handle_run_error(stream, error).await,
        };

        self.instrumenter.connection_closed();
        result
    }

    async fn handle_run_error<St: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut St,
        error: ErrorKind,
    ) -> Result<(), io::Error> {
        match error.classify() {
            ErrorAction::RespondAndClose => {
                self.instrumenter.bad_request();
                let bytes =
                    error.as_http(self.request.version(), self.server_limits.json_errors);
                let _ = stream.write_all(bytes).await;
                Ok(())
            }
            ErrorAction::CloseSilently | ErrorAction::CloseTimedOut => match error {
                ErrorKind::Io(e) => Err(e.0),
                _ => Ok(()),
            },
        }
    }

    #[inline]
    pub(crate) async fn impl_run<St: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        stream: &mut St,
    ) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        loop {
            self.reset_request_response();

            let first_request = self.connection.request_count == 0;
            self.worker.set_phase(if first_request {
                Phase::InitialRead
            } else {
                Phase::KeepAliveIdle
            });
            let timeout = if first_request {
                self.conn_limits.initial_read_timeout
            } else {
                self.conn_limits.keep_alive_timeout
            };

            let n = self.parser.fill_buffer(stream, timeout, &self.worker.kill).await?;
            if n == 0 {
                break;
            }
            self.instrumenter.read_from_client(n);
            self.worker.throughput.record_read(n);
            self.worker.touch();

            self.worker.set_phase(Phase::Processing);
            self.response.version = self.parse()?;
            self.instrumenter.accepted_request();

            if self.request.expect_continue() {
                match self.handle_expect(stream).await? {
                    ExpectOutcome::Rejected => break,
                    ExpectOutcome::Continued => {}
                }
            }
            self.select_body_reader()?;
            self.read_body(stream).await?;

            self.worker.set_phase(Phase::Processing);
            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            self.drain_body(stream).await?;
            self.write_response(stream).await?;

            if !self.response.keep_alive
                || self.connection.request_count + 1 >= self.conn_limits.max_requests_per_connection
            {
                break;
            }
            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Validates a pending `Expect: 100-continue`. On acceptance, writes the
    /// interim `100 Continue` line (outside the buffered [`Response`] model,
    /// since interim responses never carry framing) and lets the caller
    /// proceed to read the body. On rejection, builds and sends the final
    /// response itself and the connection always closes without reading the
    /// body (resolved Open Question: a rejected `Expect` is never worth
    /// draining).
    async fn handle_expect<St: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut St,
    ) -> Result<ExpectOutcome, ErrorKind> {
        match (self.expect_validator)(&self.request) {
            ExpectDecision::Continue => {
                stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
                self.worker.touch();
                Ok(ExpectOutcome::Continued)
            }
            ExpectDecision::Reject(status) => {
                self.response.status(status).close().body("");
                self.write_response(stream).await?;
                Ok(ExpectOutcome::Rejected)
            }
        }
    }

    /// Keeps feeding the body reader from the socket until it reports done.
    /// `select_body_reader` (called by [`impl_run`](Self::impl_run) only once
    /// any pending `Expect: 100-continue` has resolved to `Continue`) already
    /// primed it with whatever body bytes the preamble read captured past the
    /// headers; this only covers what's left.
    async fn read_body<St: AsyncRead + Unpin>(&mut self, stream: &mut St) -> Result<(), ErrorKind> {
        if self.body_reader.is_done() {
            return Ok(());
        }
        self.worker.set_phase(Phase::ReadingBody);
        let max_body = self.request.max_body();

        while !self.body_reader.is_done() {
            let n = self
                .fill_body_buf(stream, self.conn_limits.processing_timeout)
                .await?;
            if n == 0 {
                return Err(ErrorKind::PrematureEof);
            }
            self.body_reader
                .feed(&self.body_buf[..n], self.request.body_mut(), max_body)?;
        }

        Ok(())
    }

    /// Discards up to `max_bytes_to_drain` of an under-read body before
    /// reusing the connection. Skipped entirely when the connection is
    /// already closing for another reason (§4.5's resolved Open Question).
    async fn drain_body<St: AsyncRead + Unpin>(&mut self, stream: &mut St) -> Result<(), ErrorKind> {
        if self.body_reader.is_done() || !self.response.keep_alive {
            return Ok(());
        }

        let mut drained = 0usize;
        let mut sink = Vec::new();
        while !self.body_reader.is_done() {
            let n = self
                .fill_body_buf(stream, self.conn_limits.processing_timeout)
                .await?;
            if n == 0 {
                return Err(ErrorKind::PrematureEof);
            }
            let consumed = self.body_reader.feed(&self.body_buf[..n], &mut sink, usize::MAX)?;
            drained += consumed;
            sink.clear();

            if drained > self.conn_limits.max_bytes_to_drain {
                self.response.keep_alive = false;
                return Ok(());
            }
        }

        Ok(())
    }

    async fn fill_body_buf<St: AsyncRead + Unpin>(
        &mut self,
        stream: &mut St,
        time: Duration,
    ) -> Result<usize, ErrorKind> {
        tokio::select! {
            biased;

            result = stream.read(&mut self.body_buf) => {
                let n = result?;
                self.instrumenter.read_from_client(n);
                self.worker.throughput.record_read(n);
                self.worker.touch();
                Ok(n)
            }
            _ = sleep(time) => Err(ErrorKind::RequestTimeout),
            _ = self.worker.kill.notified() => Err(ErrorKind::RequestTimeout),
        }
    }

    /// Finalizes compression, then emits the response: buffered as-is when
    /// it fits under `response_buffer_size`, re-framed as
    /// `Transfer-Encoding: chunked` otherwise.
    async fn write_response<St: AsyncWrite + Unpin>(&mut self, stream: &mut St) -> Result<(), ErrorKind> {
        self.worker.set_phase(Phase::Writing);

        self.response.finalize_compression(
            self.resp_limits.compress_by_default,
            self.request.accept_encodings(),
        );

        let body_len = self.response.buffer().len() - self.response.body_boundary();
        let stream_chunked = match self.resp_limits.response_buffer_size {
            None => true,
            Some(limit) => body_len > limit,
        };

        if stream_chunked {
            self.write_chunked(stream).await
        } else {
            self.write_buffered(stream).await
        }
    }

    async fn write_buffered<St: AsyncWrite + Unpin>(&mut self, stream: &mut St) -> Result<(), ErrorKind> {
        let buf = self.response.buffer();
        stream.write_all(buf).await?;

        self.instrumenter.wrote_to_client(buf.len());
        self.worker.throughput.record_write(buf.len());
        self.worker.touch();
        Ok(())
    }

    async fn write_chunked<St: AsyncWrite + Unpin>(&mut self, stream: &mut St) -> Result<(), ErrorKind> {
        self.instrumenter.chunked_response();

        let head_end = self.response.content_length_line_start();
        let body_start = self.response.body_boundary();
        let buf = self.response.buffer();

        let head = &buf[..head_end];
        let body = &buf[body_start..];
        let mut written = head.len();

        stream.write_all(head).await?;
        stream.write_all(b"transfer-encoding: chunked\r\n\r\n").await?;

        for chunk in body.chunks(self.resp_limits.max_response_chunk_size) {
            let size_line = format!("{:x}\r\n", chunk.len()).into_bytes();
            stream.write_all(&size_line).await?;
            stream.write_all(chunk).await?;
            stream.write_all(b"\r\n").await?;
            written += size_line.len() + chunk.len() + 2;
        }
        stream.write_all(b"0\r\n\r\n").await?;
        written += 5;

        self.instrumenter.wrote_to_client(written);
        self.worker.throughput.record_write(written);
        self.worker.touch();
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ExpectOutcome {
    Continued,
    Rejected,
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use embers::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use embers::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use embers::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds. Executes asynchronously within
    /// the Tokio runtime.
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{
        instrument::NullInstrumenter,
        server::{reaper::Reaper, server_impl::default_expect_validator},
        Handled, StatusCode,
    };

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();
            let (_, worker) = Reaper::new().register();
            let body_buf = vec![0; req_limits.request_buffer_size].into_boxed_slice();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),
                body_reader: BodyReader::None,
                body_buf,

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,

                expect_validator: default_expect_validator(),
                instrumenter: Arc::new(NullInstrumenter),
                worker,

                base_dir: None,
                context_path: None,
            }
        }
    }
}

#[cfg(test)]
mod connection_tests {
    use super::*;
    use crate::{instrument::NullInstrumenter, StatusCode};
    use tokio::io::duplex;

    #[tokio::test]
    async fn handle_expect_continue_writes_interim_response() {
        let mut t = HttpConnection::from_req("");
        let (mut client, mut server) = duplex(256);

        let outcome = t.handle_expect(&mut server).await.unwrap();
        assert_eq!(outcome, ExpectOutcome::Continued);

        drop(server);
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn handle_expect_reject_sends_final_response_and_closes() {
        let mut t = HttpConnection::from_req("");
        t.expect_validator = Arc::new(|_: &Request| ExpectDecision::Reject(StatusCode::ExpectationFailed));
        let (mut client, mut server) = duplex(256);

        let outcome = t.handle_expect(&mut server).await.unwrap();
        assert_eq!(outcome, ExpectOutcome::Rejected);
        assert!(!t.response.keep_alive);

        drop(server);
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.starts_with(b"HTTP/1.1 417 Expectation Failed"));
    }

    #[tokio::test]
    async fn write_response_stays_buffered_under_the_limit() {
        let mut t = HttpConnection::from_req("");
        t.resp_limits.response_buffer_size = Some(1024);
        t.response.status(StatusCode::Ok).body("short body");
        let (mut client, mut server) = duplex(4096);

        t.write_response(&mut server).await.unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.windows(6).all(|w| w != b"chunke"));
        assert!(received.ends_with(b"short body"));
    }

    #[tokio::test]
    async fn write_response_streams_chunked_past_the_limit() {
        let mut t = HttpConnection::from_req("");
        t.resp_limits.response_buffer_size = Some(4);
        t.resp_limits.max_response_chunk_size = 4;
        t.response.status(StatusCode::Ok).body("a longer body than the limit");
        let (mut client, mut server) = duplex(4096);

        t.write_response(&mut server).await.unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received
            .windows(b"transfer-encoding: chunked".len())
            .any(|w| w == b"transfer-encoding: chunked"));
        assert!(received.ends_with(b"0\r\n\r\n"));
    }

    #[tokio::test]
    async fn write_response_none_limit_always_streams_chunked() {
        let mut t = HttpConnection::from_req("");
        t.resp_limits.response_buffer_size = None;
        t.response.status(StatusCode::Ok).body("tiny");
        let (mut client, mut server) = duplex(4096);

        t.write_response(&mut server).await.unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received
            .windows(b"transfer-encoding: chunked".len())
            .any(|w| w == b"transfer-encoding: chunked"));
    }

    #[tokio::test]
    async fn drain_body_skips_when_connection_already_closing() {
        let mut t = HttpConnection::from_req("");
        t.response.keep_alive = false;
        t.body_reader = BodyReader::Fixed { remaining: 5 };
        let (_client, mut server) = duplex(64);

        t.drain_body(&mut server).await.unwrap();
        assert!(matches!(t.body_reader, BodyReader::Fixed { remaining: 5 }));
    }

    #[tokio::test]
    async fn drain_body_skips_when_already_fully_read() {
        let mut t = HttpConnection::from_req("");
        t.response.keep_alive = true;
        t.body_reader = BodyReader::None;
        let (_client, mut server) = duplex(64);

        assert!(t.drain_body(&mut server).await.is_ok());
    }

    #[tokio::test]
    async fn run_serves_one_request_then_closes_on_connection_close() {
        let mut t = HttpConnection::from_req("");
        t.instrumenter = Arc::new(NullInstrumenter);
        let (mut client, mut server) = duplex(4096);

        client
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let client_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let server_addr: SocketAddr = "127.0.0.1:2".parse().unwrap();
        t.run(&mut server, client_addr, server_addr, "http").await.unwrap();
        drop(server);

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.starts_with(b"HTTP/1.1 200"));
    }
}
