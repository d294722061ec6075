//! TLS adapter: makes the connection worker generic over "maybe-TLS".
//!
//! `rustls`/`tokio-rustls` already perform the handshake state machine,
//! buffer growth, and handshake/application-data demuxing described in
//! §4.9; this module's job is narrower: build a `ServerConfig` once at
//! startup and present the same `AsyncRead + AsyncWrite` surface the
//! plaintext path uses.

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::{io, pin::Pin, sync::Arc, task::{Context, Poll}};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

/// Certificate chain and private key for one listener's TLS termination.
pub struct TlsMaterial {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl TlsMaterial {
    /// Builds the `rustls::ServerConfig` (and wraps it as a `TlsAcceptor`)
    /// once; every accepted connection on this listener reuses it.
    pub(crate) fn into_acceptor(self) -> Result<TlsAcceptor, rustls::Error> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.cert_chain, self.private_key)?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Either a plaintext TCP socket or a completed TLS session over one.
///
/// Implements `AsyncRead + AsyncWrite` so `HttpConnection` never needs to
/// know which listener it came from.
pub(crate) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl MaybeTlsStream {
    /// Drives the handshake (if `acceptor` is `Some`) to completion,
    /// returning a stream ready for the request-parsing loop.
    pub(crate) async fn accept(
        stream: TcpStream,
        acceptor: Option<&TlsAcceptor>,
    ) -> io::Result<Self> {
        match acceptor {
            None => Ok(MaybeTlsStream::Plain(stream)),
            Some(acceptor) => {
                let tls = acceptor.accept(stream).await?;
                Ok(MaybeTlsStream::Tls(Box::new(tls)))
            }
        }
    }

    pub(crate) const fn is_tls(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
