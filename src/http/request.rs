use crate::{
    config::ReqLimits,
    errors::*,
    http::{
        accept,
        body::BodyReader,
        cookie::CookieJar,
        query,
        types::{self, Header, HeaderMap},
    },
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{
    io, mem,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};
use tokio::{io::AsyncRead, io::AsyncReadExt, sync::Notify, time::sleep};

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance. Everything
/// derived directly from the wire (method, URL, header names/values) is
/// zero-copy, referenced from the connection's read buffer; header decode
/// side-effects that need percent-decoding or reassembly (query parameters,
/// cookies, the body) own their storage.
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,

    content_length: Option<usize>,
    transfer_encoding_chunked: bool,
    content_type: Option<&'static [u8]>,
    charset: Option<&'static [u8]>,
    multipart_boundary: Option<&'static [u8]>,
    cookies: CookieJar,
    locales: Vec<&'static [u8]>,
    accept_encodings: Vec<&'static [u8]>,
    content_encodings: Vec<&'static [u8]>,
    host: Option<&'static [u8]>,
    port: Option<u16>,
    pub(crate) expect_continue: bool,

    body: Vec<u8>,
    max_body: usize,

    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
    pub(crate) scheme: &'static str,
    pub(crate) base_dir: Option<Arc<Path>>,
    pub(crate) context_path: Option<Arc<str>>,
}

const UNSPECIFIED_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),

            content_length: None,
            transfer_encoding_chunked: false,
            content_type: None,
            charset: None,
            multipart_boundary: None,
            cookies: CookieJar::default(),
            locales: Vec::new(),
            accept_encodings: Vec::new(),
            content_encodings: Vec::new(),
            host: None,
            port: None,
            expect_continue: false,

            body: Vec::new(),
            max_body: 0,

            client_addr: UNSPECIFIED_ADDR,
            server_addr: UNSPECIFIED_ADDR,
            scheme: "http",
            base_dir: None,
            context_path: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();

        self.content_length = None;
        self.transfer_encoding_chunked = false;
        self.content_type = None;
        self.charset = None;
        self.multipart_boundary = None;
        self.cookies.clear();
        self.locales.clear();
        self.accept_encodings.clear();
        self.content_encodings.clear();
        self.host = None;
        self.port = None;
        self.expect_continue = false;

        self.body.clear();
        self.max_body = 0;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns every value for a header name, insertion order preserved.
    #[inline(always)]
    pub fn header_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> {
        self.headers.get_all(name)
    }

    /// Returns every `(name, value)` header pair, insertion order preserved.
    #[inline(always)]
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers.iter()
    }

    /// Returns the value of the `Content-Length` header if present.
    ///
    /// Kept for inspection even when `Transfer-Encoding: chunked` wins the
    /// framing decision (per the chunked-vs-Content-Length resolution);
    /// always consistent with the raw header value, never with body framing.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Returns `true` if the request used chunked transfer encoding.
    #[inline(always)]
    pub const fn is_chunked(&self) -> bool {
        self.transfer_encoding_chunked
    }

    /// Returns the raw `Content-Type` header value, if present.
    #[inline(always)]
    pub const fn content_type(&self) -> Option<&[u8]> {
        self.content_type
    }

    /// Returns the `charset` parameter of `Content-Type`, if present.
    #[inline(always)]
    pub const fn charset(&self) -> Option<&[u8]> {
        self.charset
    }

    /// Returns the `boundary` parameter of a multipart `Content-Type`, if present.
    #[inline(always)]
    pub const fn multipart_boundary(&self) -> Option<&[u8]> {
        self.multipart_boundary
    }

    /// Returns the cookie with the given name, if any.
    #[inline(always)]
    pub fn cookie(&self, name: &[u8]) -> Option<&crate::http::cookie::Cookie> {
        self.cookies.get(name)
    }

    /// Returns every cookie sent with the request, in header order.
    #[inline(always)]
    pub fn cookies(&self) -> &[crate::http::cookie::Cookie] {
        &self.cookies.cookies
    }

    /// Returns the `Accept-Language` locales, ordered by weight descending.
    #[inline(always)]
    pub fn locales(&self) -> &[&[u8]] {
        &self.locales
    }

    /// Returns the `Accept-Encoding` values, ordered by weight descending.
    #[inline(always)]
    pub fn accept_encodings(&self) -> &[&[u8]] {
        &self.accept_encodings
    }

    /// Returns the `Content-Encoding` values (encodings already applied to
    /// the request body), ordered by weight descending.
    #[inline(always)]
    pub fn content_encodings(&self) -> &[&[u8]] {
        &self.content_encodings
    }

    /// Returns the `Host` header's hostname component.
    #[inline(always)]
    pub const fn host(&self) -> Option<&[u8]> {
        self.host
    }

    /// Returns the `Host` header's port component, if explicit.
    #[inline(always)]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the client's socket address.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Returns the server-side local socket address that accepted this connection.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Returns `"http"` or `"https"` depending on whether this connection is TLS-terminated.
    #[inline(always)]
    pub const fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Returns the filesystem root configured via
    /// [`ServerBuilder::base_dir`](crate::ServerBuilder::base_dir), if any.
    ///
    /// Purely a convention passed through to the application: this crate has
    /// no filesystem concept of its own and never reads from this path.
    #[inline(always)]
    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    /// Returns the URL prefix configured via
    /// [`ServerBuilder::context_path`](crate::ServerBuilder::context_path), if any.
    ///
    /// Surfaced as-is; the handler is responsible for stripping it from
    /// [`url().path()`](Url::path) if desired.
    #[inline(always)]
    pub fn context_path(&self) -> Option<&str> {
        self.context_path.as_deref()
    }

    /// Returns the request body, if any was read.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether the client sent `Expect: 100-continue`.
    #[inline(always)]
    pub const fn expect_continue(&self) -> bool {
        self.expect_continue
    }
}

impl Request {
    #[inline(always)]
    pub(crate) fn max_body(&self) -> usize {
        self.max_body
    }

    #[inline(always)]
    pub(crate) fn body_mut(&mut self) -> &mut Vec<u8> {
        &mut self.body
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;

        self.parse_headers()?;

        Ok(self.request.version)
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let posit = self
            .parser
            .find_char(self.req_limits.url_size, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;
        let start = self.parser.position + 1;

        let query_parts_limit = self.req_limits.url_query_parts;
        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char(posit, b'?') {
            Some(q_pos) => {
                let slice = parser
                    .get_slice_static(q_pos, (range[0] + range[1]).saturating_sub(q_pos))
                    .ok_or(ErrorKind::InvalidUrl)?;

                query::decode_into_url(url, slice, query_parts_limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::InvalidUrl)?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        let version = Version::from_bytes(&slice[..8])?;
        self.response.version = version;
        self.response.keep_alive = version == Version::Http11;
        self.request.version = version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            self.apply_header_side_effects(&header)?;
            self.request.headers.push(header.name, header.value);
        }

        Err(ErrorKind::TooManyHeaders)
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    /// Applies the header decode side-effects named in §4.1 so derived
    /// `Request` attributes stay consistent with the raw header value at the
    /// moment of insertion.
    #[inline]
    fn apply_header_side_effects(&mut self, header: &Header) -> Result<(), ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            b"transfer-encoding" => self.parse_transfer_encoding(header.value),
            b"content-type" => self.parse_content_type(header.value),
            b"cookie" => {
                self.request.cookies.parse_header(header.value);
                Ok(())
            }
            b"accept-encoding" => {
                accept::parse_weighted(header.value, &mut self.request.accept_encodings);
                Ok(())
            }
            b"content-encoding" => {
                accept::parse_weighted(header.value, &mut self.request.content_encodings);
                Ok(())
            }
            b"accept-language" => {
                accept::parse_weighted(header.value, &mut self.request.locales);
                Ok(())
            }
            b"host" => self.parse_host(header.value),
            b"expect" => {
                self.request.expect_continue = header.value.eq_ignore_ascii_case(b"100-continue");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        self.request.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if value.eq_ignore_ascii_case(b"keep-alive") {
            self.response.keep_alive = true;
        } else if value.eq_ignore_ascii_case(b"close") {
            self.response.keep_alive = false;
        } else {
            return Err(ErrorKind::InvalidConnection);
        }

        Ok(())
    }

    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if value.eq_ignore_ascii_case(b"chunked") {
            self.request.transfer_encoding_chunked = true;
        }
        Ok(())
    }

    #[inline]
    fn parse_content_type(&mut self, value: &'static [u8]) -> Result<(), ErrorKind> {
        self.request.content_type = Some(value);

        for param in value.split(|&b| b == b';').skip(1) {
            let param = trim(param);
            if let Some(eq) = memchr(b'=', param) {
                let key = trim(&param[..eq]);
                let val = trim(&param[eq + 1..]);
                if key.eq_ignore_ascii_case(b"charset") {
                    self.request.charset = Some(val);
                } else if key.eq_ignore_ascii_case(b"boundary") {
                    self.request.multipart_boundary = Some(val);
                }
            }
        }

        Ok(())
    }

    #[inline]
    fn parse_host(&mut self, value: &'static [u8]) -> Result<(), ErrorKind> {
        match memchr(b':', value) {
            Some(pos) => {
                self.request.host = Some(&value[..pos]);
                self.request.port = types::slice_to_usize(&value[pos + 1..]).map(|p| p as u16);
            }
            None => self.request.host = Some(value),
        }
        Ok(())
    }
}

#[inline(always)]
fn trim(src: &'static [u8]) -> &'static [u8] {
    let start = src.iter().position(|b| *b != b' ' && *b != b'\t');
    let Some(start) = start else {
        return b"";
    };
    let end = src.iter().rposition(|b| *b != b' ' && *b != b'\t').unwrap();
    &src[start..=end]
}

// Select and prime body reader
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Selects the body framing per §4.1's precedence (chunked wins over
    /// Content-Length) and feeds whatever body bytes already sit past the
    /// headers in the preamble buffer. The connection run loop keeps feeding
    /// the reader from the socket until [`BodyReader::is_done`].
    #[inline]
    pub(crate) fn select_body_reader(&mut self) -> Result<(), ErrorKind> {
        let content_type = self
            .request
            .content_type
            .map(|ct| {
                let end = memchr(b';', ct).unwrap_or(ct.len());
                std::str::from_utf8(&ct[..end]).unwrap_or("")
            });
        let max_body = self.req_limits.max_request_body_size.resolve(content_type);
        self.request.max_body = max_body;

        self.body_reader = if self.request.transfer_encoding_chunked {
            BodyReader::Chunked(crate::http::body::ChunkedDecoder::new())
        } else if let Some(len) = self.request.content_length {
            if len == 0 {
                BodyReader::None
            } else {
                BodyReader::Fixed { remaining: len }
            }
        } else {
            BodyReader::None
        };

        let parser = &self.parser;
        let available = &parser.buffer[parser.position..parser.len];
        let consumed = self
            .body_reader
            .feed(available, &mut self.request.body, max_body)?;
        let leftover_nonempty = !available[..consumed].is_empty();
        self.parser.position += consumed;

        if matches!(self.body_reader, BodyReader::None) && leftover_nonempty {
            // Fixed/Chunked readers that finished consumed exactly their
            // body; anything unconsumed belongs to a pipelined next request
            // and is left in place for the following parse cycle.
        }

        Ok(())
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }

    #[inline(always)]
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.buffer[self.position..self.len]
    }

    #[inline(always)]
    pub(crate) fn buffer_capacity(&self) -> usize {
        self.buffer.len()
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
        time: Duration,
        kill: &Notify,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
            _ = kill.notified() => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "killed by reaper"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references tied to this
    // connection's preamble buffer. The buffer is heap-allocated once per
    // connection slot and lives for the task's full lifetime; it is only
    // ever overwritten (never freed) between requests, and `Request::reset`
    // runs before the next `fill_buffer` call, so no live reference survives
    // into the next request's parse.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t = HttpConnection::from_req("OPTIONS /qwe&q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse(), Ok(Version::Http10));
        t.request.reset();

        let fresh = Request::new(&limits);
        assert_eq!(fresh.method(), t.request.method());
        assert_eq!(fresh.body(), t.request.body());
    }

    #[test]
    fn base_dir_and_context_path_default_to_unset() {
        let limits = ReqLimits::default();
        let req = Request::new(&limits);

        assert_eq!(req.base_dir(), None);
        assert_eq!(req.context_path(), None);
    }

    #[test]
    fn base_dir_and_context_path_reflect_what_the_connection_assigned() {
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        req.base_dir = Some(Arc::from(Path::new("/srv/www")));
        req.context_path = Some(Arc::from("/api"));

        assert_eq!(req.base_dir(), Some(Path::new("/srv/www")));
        assert_eq!(req.context_path(), Some("/api"));
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/?/ ",           Some((vec!["?"], vec![]))),

            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            ("/api//user/// ", Some((vec!["api", "user"], vec![]))),

            ("/api ",          Some((vec!["api"], vec![]))),
            ("///api ",        Some((vec!["api"], vec![]))),

            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?a=1&a=2&a=3 ",
                Some((vec![], vec![("a", "1")]))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((url, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn parse_url_percent_decodes_query() {
        let mut t = HttpConnection::from_req("/search?q=a+b&name=%4Aohn ");
        assert_eq!(t.parse_url(), Ok(()));

        assert_eq!(str(t.request.url().query(b"q")), Some("a b"));
        assert_eq!(str(t.request.url().query(b"name")), Some("John"));
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.response.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);
                assert_eq!(t.response.keep_alive, version == Version::Http11);
            } else if let Err(e) = expected {
                assert_eq!(t.check_version(), Err(e));
            }
        }
    }

    #[test]
    fn parse_headers_basic() {
        let mut t = HttpConnection::from_req(
            "HEADER: value\r\nQwE: value\r\nasd: value\r\n\r\n",
        );

        assert_eq!(t.parse_headers(), Ok(()));
        for name in ["header", "qwe", "asd"] {
            assert_eq!(str(t.request.header(name.as_bytes())), Some("value"));
        }
    }

    #[test]
    fn multi_value_headers_preserve_order() {
        let mut t = HttpConnection::from_req("Multi: value1\r\nMulti: value2\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));

        let all: Vec<&str> = t
            .request
            .header_all(b"multi")
            .map(|v| std::str::from_utf8(v).unwrap())
            .collect();
        assert_eq!(all, vec!["value1", "value2"]);
        assert_eq!(str(t.request.header(b"multi")), Some("value1"));
    }

    #[test]
    fn cookie_header_populates_jar() {
        let mut t = HttpConnection::from_req("Cookie: a=1; b=2\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));

        assert_eq!(t.request.cookie(b"a").unwrap().value(), b"1");
        assert_eq!(t.request.cookie(b"b").unwrap().value(), b"2");
    }

    #[test]
    fn accept_encoding_sorted_by_weight() {
        let mut t = HttpConnection::from_req("Accept-Encoding: gzip;q=0.5, br;q=1.0\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));

        assert_eq!(
            t.request.accept_encodings(),
            &[b"br".as_ref(), b"gzip".as_ref()]
        );
    }

    #[test]
    fn host_header_splits_port() {
        let mut t = HttpConnection::from_req("Host: example.com:8080\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));

        assert_eq!(t.request.host(), Some(b"example.com".as_ref()));
        assert_eq!(t.request.port(), Some(8080));
    }

    #[test]
    fn content_type_parses_charset_and_boundary() {
        let mut t = HttpConnection::from_req(
            "Content-Type: text/plain; charset=utf-8\r\n\r\n",
        );
        assert_eq!(t.parse_headers(), Ok(()));
        assert_eq!(t.request.charset(), Some(b"utf-8".as_ref()));

        let mut t2 = HttpConnection::from_req(
            "Content-Type: multipart/form-data; boundary=----abc\r\n\r\n",
        );
        assert_eq!(t2.parse_headers(), Ok(()));
        assert_eq!(t2.request.multipart_boundary(), Some(b"----abc".as_ref()));
    }

    #[test]
    fn parse_valid_request_with_body() {
        let mut t = HttpConnection::from_req("GET /file HTTP/1.1\ncontent-length: 12\n\nHello world!");
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.select_body_reader(), Ok(()));
        assert_eq!(t.request.body(), b"Hello world!");
    }

    #[test]
    fn parse_request_without_body() {
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.select_body_reader(), Ok(()));
        assert_eq!(t.request.body(), b"");
    }

    #[test]
    fn chunked_body_decoded_eagerly_from_buffer() {
        let mut t = HttpConnection::from_req(
            "POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.select_body_reader(), Ok(()));
        assert_eq!(t.request.body(), b"hello");
        assert!(t.body_reader.is_done());
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let mut t = HttpConnection::from_req(
            "POST /echo HTTP/1.1\r\nContent-Length: 999\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.select_body_reader(), Ok(()));
        assert_eq!(t.request.body(), b"abc");
        assert_eq!(t.request.content_length(), Some(999));
    }

    #[test]
    fn expect_continue_rejection_never_attaches_a_body_reader() {
        let mut t = HttpConnection::from_req(
            "POST /echo HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 12\r\n\r\n",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert!(t.request.expect_continue());
        assert!(matches!(t.body_reader, BodyReader::None));
    }
}

#[cfg(test)]
mod parser {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);

        parser.position = 5;
        parser.len = 10;
        parser.has_crlf = true;
        parser.buffer[0] = b'X';

        parser.reset();

        assert_eq!(Parser::new(&limits), parser);
    }

    #[test]
    fn find_slice() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1");

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"GET");
        assert_eq!(parser.position, 4);

        let slice = parser.find_slice(10, b' ').unwrap();
        assert_eq!(slice, b"/");
    }

    #[test]
    fn find_char() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"hello world\nnext line");

        assert_eq!(parser.find_char(20, b' '), Some(5));
        assert_eq!(parser.find_char(20, b'\n'), Some(11));
        assert_eq!(parser.find_char(5, b'x'), None);
    }

    #[test]
    fn get_slice() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"test data here");

        assert_eq!(str(parser.get_slice(0, 4)), Some("test"));
        assert_eq!(str(parser.get_slice(5, 4)), Some("data"));
    }

    #[test]
    fn get_slice_mut() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"original");

        {
            let slice = parser.get_slice_mut(0, 8).unwrap();
            slice.copy_from_slice(b"modified");
        }

        assert_eq!(parser.get_slice(0, 8), Some(b"modified".as_ref()));
    }

    #[test]
    fn update_position() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"some data");

        let old_pos = parser.update_position(4);
        assert_eq!(old_pos, 0);
        assert_eq!(parser.position, 5);
    }
}
