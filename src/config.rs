//! Server configuration: tuning knobs, timeouts, and buffer sizing.
//!
//! # Security-first defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request buffer`](ReqLimits#memory-allocation-strategy) +
//!           [`Response buffer`](RespLimits#buffer-management) +
//!           `Runtime overhead`
//!
//! # Examples
//!
//! ```no_run
//! # embers::impt_default_handler!{MyHandler}
//! use embers::{Server, config::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_pending_socket_connections: 512,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             initial_read_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 18,
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Server-level admission and shutdown behavior.
///
/// Unlike a fixed worker-pool server, each accepted connection gets its own
/// task (see [`crate::Server`]); `ServerLimits` therefore governs admission
/// (backlog, optional concurrency ceiling) and the shutdown grace period
/// rather than a worker count.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Listen backlog: OS-level queue of pending, not-yet-accepted connections
    /// (default: `250`).
    pub max_pending_socket_connections: usize,

    /// Optional ceiling on concurrently active connections (default: `None`,
    /// unbounded).
    ///
    /// When set, connections beyond the ceiling are sent an immediate `503
    /// Service Unavailable` (or silently dropped if
    /// [`json_errors`](Self::json_errors) handling itself fails) and closed,
    /// rather than being accepted and then starved.
    pub max_connections: Option<usize>,

    /// Grace period given to in-flight workers during shutdown before their
    /// sockets are forcibly closed (default: `10 seconds`).
    pub shutdown_duration: Duration,

    /// Format for the body of server-generated error responses (default: `false`).
    ///
    /// Server-generated errors carry an empty body by default. Set to `true`
    /// to opt into a small JSON body with a machine-readable code instead.
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_pending_socket_connections: 250,
            max_connections: None,
            shutdown_duration: Duration::from_secs(10),
            json_errors: false,
            _priv: (),
        }
    }
}

/// Connection-level timeouts, throughput floors, and request limits.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Time allowed from accept to the first preamble byte (default: `2 seconds`).
    ///
    /// The primary defense against a connection that is opened and then never
    /// used (a slow-loris opening move).
    pub initial_read_timeout: Duration,

    /// Idle time allowed between keep-alive requests on the same connection
    /// (default: `20 seconds`).
    pub keep_alive_timeout: Duration,

    /// Time allowed from the last request byte to the first response byte
    /// (default: `10 seconds`).
    ///
    /// Bounds how long a handler (and any body-draining it triggers) may run
    /// before the reaper considers the worker stuck.
    pub processing_timeout: Duration,

    /// Minimum sustained read throughput, bytes/sec, enforced once
    /// [`read_throughput_delay`](Self::read_throughput_delay) has elapsed
    /// since the first body byte (default: `16 KiB/s`; `None` disables).
    pub min_read_throughput: Option<u64>,
    /// Warm-up window before [`min_read_throughput`](Self::min_read_throughput)
    /// is enforced (default: `5 seconds`).
    pub read_throughput_delay: Duration,

    /// Minimum sustained write throughput, bytes/sec, enforced once
    /// [`write_throughput_delay`](Self::write_throughput_delay) has elapsed
    /// since the first response byte (default: `16 KiB/s`; `None` disables).
    pub min_write_throughput: Option<u64>,
    /// Warm-up window before [`min_write_throughput`](Self::min_write_throughput)
    /// is enforced (default: `5 seconds`).
    pub write_throughput_delay: Duration,

    /// Maximum number of requests served on one connection before it is
    /// closed regardless of keep-alive (default: `100_000`).
    pub max_requests_per_connection: usize,

    /// Body bytes the worker will read and discard between keep-alive
    /// requests if the handler under-read the previous body (default: `256 KiB`).
    ///
    /// Skipped entirely when the connection is already closing for another
    /// reason (see [`crate::errors::ErrorAction`] and the connection worker's
    /// keep-alive decision) — draining is only useful as a prelude to reuse.
    pub max_bytes_to_drain: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            initial_read_timeout: Duration::from_secs(2),
            keep_alive_timeout: Duration::from_secs(20),
            processing_timeout: Duration::from_secs(10),
            min_read_throughput: Some(16 * 1024),
            read_throughput_delay: Duration::from_secs(5),
            min_write_throughput: Some(16 * 1024),
            write_throughput_delay: Duration::from_secs(5),
            max_requests_per_connection: 100_000,
            max_bytes_to_drain: 256 * 1024,
            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// **Security-first defaults.** These limits are intentionally conservative to
/// prevent resource exhaustion and various parsing attacks. You may need to
/// raise them if legitimate traffic trips `413`/`414`/`431` responses.
///
/// # Memory allocation strategy
///
/// Each connection pre-allocates a fixed-size preamble buffer sized from
/// these limits (see [`estimated_buffer_size`](Self::estimated_buffer_size));
/// the body itself streams through a separate, independently sized buffer
/// (see [`chunked_buffer_size`](Self::chunked_buffer_size) and
/// [`request_buffer_size`](Self::request_buffer_size)) rather than being
/// folded into the preamble buffer, since bodies may be arbitrarily large and
/// the preamble buffer must stay small and fixed.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in the URL (default: `8`).
    pub url_parts: usize,
    /// Maximum query string length in bytes, including the leading `?` (default: `128`).
    pub url_query_size: usize,
    /// Maximum number of `key=value` query pairs (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `16`).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64`).
    pub header_name_size: usize,
    /// Maximum header value length in bytes (default: `512`).
    pub header_value_size: usize,
    /// Cumulative cap on preamble bytes consumed (request-line + all header
    /// lines), enforced by the preamble FSM independently of the per-field
    /// limits above (default: `128 KiB`; `None` disables).
    pub max_request_header_size: Option<usize>,

    /// Read buffer used while streaming a request body (default: `16 KiB`).
    pub request_buffer_size: usize,
    /// Scratch buffer used by the chunked body decoder to hold one chunk's
    /// size line and trailing CRLF bookkeeping (default: `4 KiB`).
    pub chunked_buffer_size: usize,

    /// Maximum request body size in bytes, keyed by `Content-Type`.
    ///
    /// See [`BodySizeLimits`]; default is `128 MiB` for `"*"` and `10 MiB`
    /// for `application/x-www-form-urlencoded`.
    pub max_request_body_size: BodySizeLimits,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: 16,
            header_name_size: 64,
            header_value_size: 512,
            max_request_header_size: Some(128 * 1024),

            request_buffer_size: 16 * 1024,
            chunked_buffer_size: 4 * 1024,

            max_request_body_size: BodySizeLimits::default(),

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated preamble-buffer size required per connection.
    ///
    /// This covers only the request line and headers; the body is streamed
    /// separately and is not part of this figure.
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n"
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2
    }

    #[inline(always)]
    // CONNECT /url/test HTTP/1.1\r\n -> Method(7) + " " + URL + " " + Version(8) + "\r\n"
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Name: Value\r\n -> Name + ": " + Value + "\r\n"
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) h_line: usize,
}

/// Per-`Content-Type` request body size ceiling.
///
/// Checked by both body readers (fixed and chunked) against the number of
/// bytes actually read, with `"*"` as the fallback applied when no entry
/// matches the request's content type.
#[derive(Debug, Clone)]
pub struct BodySizeLimits {
    entries: Vec<(&'static str, usize)>,
}

impl Default for BodySizeLimits {
    fn default() -> Self {
        Self {
            entries: vec![
                ("*", 128 * 1024 * 1024),
                ("application/x-www-form-urlencoded", 10 * 1024 * 1024),
            ],
        }
    }
}

impl BodySizeLimits {
    /// Replaces or inserts the byte ceiling for a `Content-Type`.
    pub fn set(&mut self, content_type: &'static str, max_bytes: usize) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| *k == content_type) {
            Some((_, v)) => *v = max_bytes,
            None => self.entries.push((content_type, max_bytes)),
        }
        self
    }

    /// Resolves the byte ceiling for a request's content type, falling back
    /// to the `"*"` entry. Returns `usize::MAX` if neither is configured.
    pub(crate) fn resolve(&self, content_type: Option<&str>) -> usize {
        if let Some(ct) = content_type {
            if let Some((_, v)) = self.entries.iter().find(|(k, _)| *k == ct) {
                return *v;
            }
        }
        self.entries
            .iter()
            .find(|(k, _)| *k == "*")
            .map(|(_, v)| *v)
            .unwrap_or(usize::MAX)
    }
}

/// Configuration for response processing and memory allocation limits.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity kept between requests; larger
    /// allocations are freed rather than retained (default: `8192 B`).
    pub max_capacity: usize,
    /// Response buffering ceiling (default: `64 KiB`; `None` disables
    /// buffering, so every response streams as `Transfer-Encoding: chunked`).
    ///
    /// A response whose buffered body would exceed the ceiling is re-framed
    /// as chunked instead of being sent with its computed `Content-Length`.
    pub response_buffer_size: Option<usize>,
    /// Maximum size of one emitted chunk when streaming a
    /// `Transfer-Encoding: chunked` response (default: `16 KiB`).
    pub max_response_chunk_size: usize,
    /// Compress responses by default when the client accepts `gzip` or
    /// `deflate` (default: `true`). Overridable per response with
    /// [`Response::compress`](crate::Response::compress) before any byte is
    /// written.
    pub compress_by_default: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,
            response_buffer_size: Some(64 * 1024),
            max_response_chunk_size: 16 * 1024,
            compress_by_default: true,
            _priv: (),
        }
    }
}
