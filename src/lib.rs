//! embers - High-performance, zero-allocation HTTP/1.1 server for microservices
//!
//! A performance-oriented HTTP server with comprehensive configuration
//! for memory management, connection handling, and protocol support.
//! Designed for microservices requiring fine-grained control over resources.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1**: Full protocol with persistent connections, chunked encoding,
//!   and `Expect: 100-continue`.
//! - **HTTP/1.0**: Basic protocol support for legacy clients and simple requests.
//! - **TLS**: Optional per-listener termination via [`config::TlsMaterial`
//!   ](crate::server::tls::TlsMaterial) (`rustls`/`tokio-rustls`).
//!
//! # Features
//!
//! ## 🔒 Security & Protection
//! - **Built-in DoS/DDoS protection** - enabled by default, with no performance penalty.
//! - **Fully configurable limits and timeouts** for requests, responses, and connections.
//! - **Custom connection filtering** - implement the [`ConnectionFilter`] trait to
//!   reject unwanted connections at the TCP level.
//!
//! ## 🚀 Performance & Memory
//! - **Zero-allocation steady state** - preamble and body buffers are pre-sized per connection.
//! - **One lightweight task per connection** - no fixed worker pool to size.
//!
//! ## 🌐 Protocol & Management
//! - **Automatic protocol detection for each request** - keep-alive eliminates
//!   the need for manual protocol selection.
//! - **Storing data between requests** - ability to store data between requests in a
//!   single connection using the [`ConnectionData`] trait.
//!
//! ## 🏭 Production Ready
//! - **Graceful performance degradation** - automatic 503 responses when overloaded.
//! - **Custom error format** - structured JSON (with codes/descriptions) or a plain HTTP response.
//! - **Resource protection** - a background reaper force-closes connections stuck past
//!   their timeout or sustaining a read/write rate below the configured floor.
//!
//! # Quick Start
//!
//! ## 1. Installation
//!
//! Add `embers` and [`tokio`](https://crates.io/crates/tokio) to your `Cargo.toml`:
//!
//! ```bash
//! cargo add embers tokio --features tokio/full
//! ```
//! Or manually:
//! ```toml
//! [dependencies]
//! embers = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## 2. Usage example
//! ```no_run
//! use embers::{Server, Handler, Request, Response, Handled, StatusCode};
//! use tokio::net::TcpListener;
//!
//! struct MyHandler;
//!
//! impl Handler for MyHandler {
//!     async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
//!         resp.status(StatusCode::Ok).body("Hello World!")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! # Use Cases
//!
//! - **High-throughput microservices** - configurable for specific workloads
//! - **Resource-constrained environments** - predictable memory usage
//! - **Internal APIs** - security-conscious defaults
//! - **Performance-critical applications** - zero-allocation steady state
pub(crate) mod http {
    pub(crate) mod accept;
    pub(crate) mod body;
    pub(crate) mod cookie;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod reaper;
    pub(crate) mod server_impl;
    pub(crate) mod throughput;
    pub mod tls;
}
pub(crate) mod errors;
pub mod config;
pub mod instrument;

pub use crate::{
    http::{
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Handled, Response,
        },
        types::{Method, StatusCode, Url, Version},
    },
    instrument::Instrumenter,
    server::{
        connection::{ConnectionData, ConnectionFilter},
        server_impl::{ExpectDecision, ExpectValidator, Handler, Server, ServerBuilder, ServerHandle},
        tls::TlsMaterial,
    },
};

#[doc(hidden)]
pub fn run_test<F: FnOnce(&Request, &mut Response) -> Handled>(f: F) {
    f(
        &Request::new(&crate::config::ReqLimits::default()),
        &mut Response::new(&crate::config::RespLimits::default()),
    );
}

#[doc(hidden)]
#[macro_export]
macro_rules! impt_default_handler {
    ($name:ident) => {
        use embers::{Handled, Handler, Request, Response, StatusCode};
        struct $name;

        // `<()>` to check functionality
        impl Handler<()> for $name {
            async fn handle(&self, _: &mut (), _: &Request, resp: &mut Response) -> Handled {
                resp.status(StatusCode::Ok).body("Hello world!")
            }
        }
    };
}
