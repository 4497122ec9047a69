/*
 * connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tether, a keep-alive HTTP/1.1 client library.
 *
 * Tether is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tether is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tether.  If not, see <http://www.gnu.org/licenses/>.
 */

//! HTTP connection: one TCP or TLS stream, wrapped for byte accounting, and
//! the HTTP/1.1 parser driving it. Knows when it may be reused.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;
use url::{Host, Url};

use crate::config::ClientOptions;
use crate::net;
use crate::protocol::http::content::HttpContent;
use crate::protocol::http::error::{HttpError, Result};
use crate::protocol::http::h1::{BodyMode, H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::headers::HeaderMap;
use crate::protocol::http::progress::{CountingStream, ProgressCounter, SharedProgress};
use crate::protocol::http::proxy::ProxyConnector;
use crate::protocol::http::request::Method;
use crate::protocol::http::response::ResponseHead;
use crate::protocol::http::stream::HttpStream;

const READ_CHUNK: usize = 8192;

/// Stale reason that a successful drain clears.
pub(crate) const BODY_UNREAD: &str = "previous body unread";

/// Scheme, host and port a connection talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) secure: bool,
}

impl Endpoint {
    pub(crate) fn from_url(url: &Url) -> Result<Self> {
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(HttpError::argument("address", "address has no host")),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| HttpError::argument("address", "address has no port"))?;
        Ok(Self {
            host,
            port,
            secure: url.scheme() == "https",
        })
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")),
    }
}

fn same_proxy(a: Option<&Arc<dyn ProxyConnector>>, b: Option<&Arc<dyn ProxyConnector>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const (),
        _ => false,
    }
}

/// Errors that mean the peer went away rather than answered badly.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// Collects the status line and headers of one response.
#[derive(Default)]
struct HeadCollector {
    status: Option<(u16, Option<String>)>,
    headers: HeaderMap,
}

impl H1ResponseHandler for HeadCollector {
    fn status(&mut self, code: u16, reason: Option<&str>) {
        self.status = Some((code, reason.map(str::to_string)));
    }

    fn header(&mut self, name: &str, value: &str) {
        self.headers.append(name, value);
    }

    fn body_chunk(&mut self, _data: &[u8]) {}

    fn complete(&mut self) {}
}

#[derive(Default)]
struct BodyCollector {
    out: BytesMut,
}

impl H1ResponseHandler for BodyCollector {
    fn status(&mut self, _code: u16, _reason: Option<&str>) {}

    fn header(&mut self, _name: &str, _value: &str) {}

    fn body_chunk(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    fn complete(&mut self) {}
}

/// One transport connection owned by a client.
pub(crate) struct Connection {
    stream: CountingStream<HttpStream>,
    read_buf: BytesMut,
    parser: ResponseParser,
    endpoint: Endpoint,
    proxy: Option<Arc<dyn ProxyConnector>>,
    io_timeout: Duration,
    idle_since: Instant,
    request_count: u32,
    /// Set when the connection must not carry another request.
    reusable: bool,
    /// Set when an exchange on this connection ended in a transport or framing error.
    failed: bool,
    /// Set when a response on this connection had a 4xx or 5xx status.
    error_response: bool,
    server_idle_timeout: Option<Duration>,
    server_maximum_requests: Option<u32>,
}

impl Connection {
    /// Connect (directly or through the configured proxy) and layer TLS for `https`.
    pub(crate) async fn open(endpoint: Endpoint, options: &ClientOptions) -> Result<Self> {
        let proxy = options.proxy.clone();
        let stream = Self::connect(&endpoint, proxy.as_ref(), options)
            .await
            .map_err(|source| HttpError::ConnectFailure {
                host: endpoint.host.clone(),
                source,
            })?;
        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            secure = endpoint.secure,
            proxied = proxy.is_some(),
            peer = ?stream.tcp().peer_addr().ok(),
            "connection established"
        );
        Ok(Self {
            stream: CountingStream::new(stream),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            parser: ResponseParser::new(),
            endpoint,
            proxy,
            io_timeout: options.read_write_timeout,
            idle_since: Instant::now(),
            request_count: 0,
            reusable: true,
            failed: false,
            error_response: false,
            server_idle_timeout: None,
            server_maximum_requests: None,
        })
    }

    async fn connect(
        endpoint: &Endpoint,
        proxy: Option<&Arc<dyn ProxyConnector>>,
        options: &ClientOptions,
    ) -> io::Result<HttpStream> {
        let limit = options.connect_timeout;
        let tcp = match proxy {
            Some(proxy) => {
                proxy
                    .connect(&endpoint.host, endpoint.port, endpoint.secure, limit)
                    .await?
            }
            None => {
                with_timeout(
                    limit,
                    TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
                )
                .await?
            }
        };
        tcp.set_nodelay(true)?;
        if !endpoint.secure {
            return Ok(HttpStream::Plain(tcp));
        }
        let tls = with_timeout(
            limit,
            net::tls_handshake(tcp, &endpoint.host, &options.certificate_validator),
        )
        .await?;
        Ok(HttpStream::Tls(Box::new(tls)))
    }

    pub(crate) fn host(&self) -> &str {
        &self.endpoint.host
    }

    /// Requests go out in absolute form with `Proxy-Connection`.
    pub(crate) fn uses_absolute_form(&self) -> bool {
        self.proxy
            .as_ref()
            .is_some_and(|p| p.uses_absolute_form(self.endpoint.secure))
    }

    pub(crate) fn proxy_authorization(&self) -> Option<String> {
        self.proxy.as_ref().and_then(|p| p.authorization())
    }

    pub(crate) fn body_pending(&self) -> bool {
        self.parser.body_pending()
    }

    /// Why this connection cannot carry a request to `endpoint`, if it cannot.
    /// An unread body is reported last, as [`BODY_UNREAD`]: only then is
    /// draining it worth the read.
    pub(crate) fn stale_reason(
        &self,
        endpoint: &Endpoint,
        proxy: Option<&Arc<dyn ProxyConnector>>,
        options: &ClientOptions,
    ) -> Option<&'static str> {
        if self.endpoint != *endpoint {
            return Some("address changed");
        }
        if !same_proxy(self.proxy.as_ref(), proxy) {
            return Some("proxy changed");
        }
        if self.failed {
            return Some("previous exchange failed");
        }
        if self.error_response {
            return Some("previous response was an error");
        }
        if !self.reusable {
            return Some("connection not reusable");
        }
        let limit = self
            .server_maximum_requests
            .unwrap_or(options.maximum_keep_alive_requests);
        if self.request_count >= limit {
            return Some("keep-alive request limit reached");
        }
        let idle_limit = self.server_idle_timeout.unwrap_or(options.keep_alive_timeout);
        if self.idle_since.elapsed() >= idle_limit {
            return Some("keep-alive idle timeout");
        }
        if self.body_pending() {
            return Some(BODY_UNREAD);
        }
        None
    }

    /// Drop progress callbacks left from the previous exchange.
    pub(crate) fn clear_progress(&mut self) {
        self.stream.set_read_callback(None);
        self.stream.set_write_callback(None);
        self.stream.set_write_chunk_size(None);
    }

    /// Write the request head and, when present, the body.
    pub(crate) async fn send(
        &mut self,
        head: &[u8],
        content: Option<&dyn HttpContent>,
        upload: Option<&SharedProgress>,
        options: &ClientOptions,
    ) -> Result<()> {
        self.io_timeout = options.read_write_timeout;
        self.request_count += 1;
        if !options.keep_alive {
            self.reusable = false;
        }
        let body = content.filter(|c| c.content_length() > 0);
        if let Some(handler) = upload {
            let total = head.len() as u64 + body.map_or(0, |c| c.content_length());
            let counter = ProgressCounter::new(handler.clone(), Some(total), 0);
            self.stream.set_write_callback(Some(counter.callback()));
            self.stream.set_write_chunk_size(Some(options.send_chunk_size));
        }
        let result = self.write_request(head, body).await;
        self.stream.set_write_callback(None);
        self.stream.set_write_chunk_size(None);
        result.map_err(|source| {
            self.failed = true;
            HttpError::SendFailure {
                host: self.endpoint.host.clone(),
                source,
            }
        })
    }

    async fn write_request(&mut self, head: &[u8], body: Option<&dyn HttpContent>) -> io::Result<()> {
        let limit = self.io_timeout;
        with_timeout(limit, self.stream.write_all(head)).await?;
        if let Some(body) = body {
            with_timeout(limit, body.write_to(&mut self.stream)).await?;
        }
        with_timeout(limit, self.stream.flush()).await
    }

    async fn fill(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(READ_CHUNK);
        let limit = self.io_timeout;
        with_timeout(limit, self.stream.read_buf(&mut self.read_buf)).await
    }

    fn receive_error(&mut self, e: io::Error, empty_message_body: bool) -> HttpError {
        self.failed = true;
        if e.kind() == io::ErrorKind::InvalidData {
            HttpError::malformed(&self.endpoint.host, e.to_string())
        } else {
            HttpError::ReceiveFailure {
                host: self.endpoint.host.clone(),
                source: e,
                empty_message_body,
            }
        }
    }

    /// Read the response head, skipping interim 1xx responses. The body stays
    /// on the wire. A close before any byte arrives is an empty message body.
    pub(crate) async fn read_head(
        &mut self,
        method: Method,
        address: &Url,
        download: Option<&SharedProgress>,
    ) -> Result<ResponseHead> {
        let mut got_byte = !self.read_buf.is_empty();
        loop {
            self.parser.reset();
            let mut collector = HeadCollector::default();
            while self.parser.state() != ParseState::HeadersComplete {
                if let Err(e) = self.parser.receive(&mut self.read_buf, &mut collector) {
                    return Err(self.receive_error(e, false));
                }
                if self.parser.state() == ParseState::HeadersComplete {
                    break;
                }
                match self.fill().await {
                    Ok(0) => {
                        let e = io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed before the response head",
                        );
                        return Err(self.receive_error(e, !got_byte));
                    }
                    Ok(_) => got_byte = true,
                    Err(e) => {
                        let empty = !got_byte && is_disconnect(&e);
                        return Err(self.receive_error(e, empty));
                    }
                }
            }

            let Some((status, reason)) = collector.status.take() else {
                let e = io::Error::new(io::ErrorKind::InvalidData, "missing status line");
                return Err(self.receive_error(e, false));
            };
            let head = match ResponseHead::parse(status, reason, collector.headers, address.clone(), method) {
                Ok(head) => head,
                Err(message) => {
                    let e = io::Error::new(io::ErrorKind::InvalidData, message);
                    return Err(self.receive_error(e, false));
                }
            };
            self.parser.set_body_mode(head.body_mode());
            if head.is_interim() {
                debug!(status, "skipping interim response");
                continue;
            }

            self.server_idle_timeout = head.keep_alive_timeout();
            self.server_maximum_requests = head.maximum_keep_alive_requests();
            if head.connection_close() || head.body_mode() == BodyMode::UntilClose || status == 101 {
                self.reusable = false;
            }
            if head.has_error() {
                self.error_response = true;
            }
            self.idle_since = Instant::now();
            if let Some(handler) = download.filter(|_| self.parser.body_pending()) {
                self.arm_download(handler, &head);
            }
            return Ok(head);
        }
    }

    fn arm_download(&mut self, handler: &SharedProgress, head: &ResponseHead) {
        let head_bytes = self.parser.head_bytes() as u64;
        let total = head.content_length().map(|length| head_bytes + length);
        let buffered = self.read_buf.len() as u64;
        let buffered = match head.body_mode() {
            BodyMode::Length(length) => buffered.min(length),
            _ => buffered,
        };
        let counter = ProgressCounter::new(handler.clone(), total, head_bytes + buffered);
        counter.emit();
        self.stream.set_read_callback(Some(counter.callback()));
    }

    fn finish_body(&mut self) {
        self.idle_since = Instant::now();
        self.stream.set_read_callback(None);
    }

    /// Next piece of the current body, `None` once it is complete.
    pub(crate) async fn read_body_chunk(&mut self) -> Result<Option<Bytes>> {
        let mut sink = BodyCollector::default();
        loop {
            if !self.parser.body_pending() {
                return Ok(None);
            }
            if let Err(e) = self.parser.receive(&mut self.read_buf, &mut sink) {
                return Err(self.receive_error(e, false));
            }
            if !self.parser.body_pending() {
                self.finish_body();
            }
            if !sink.out.is_empty() {
                return Ok(Some(std::mem::take(&mut sink.out).freeze()));
            }
            if !self.parser.body_pending() {
                return Ok(None);
            }
            match self.fill().await {
                Ok(0) => {
                    // Completes a read-until-close body; anything else was cut short.
                    if let Err(e) = self.parser.finish(&mut sink) {
                        return Err(self.receive_error(e, false));
                    }
                    self.reusable = false;
                    self.finish_body();
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => return Err(self.receive_error(e, false)),
            }
        }
    }

    /// Read and discard the rest of the current body.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        while self.read_body_chunk().await?.is_some() {}
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn endpoints_from_urls() {
        let e = Endpoint::from_url(&Url::parse("https://example.com/x").unwrap()).unwrap();
        assert_eq!(e, Endpoint { host: "example.com".into(), port: 443, secure: true });
        let e = Endpoint::from_url(&Url::parse("http://[::1]:8080/").unwrap()).unwrap();
        assert_eq!(e.host, "::1");
        assert_eq!(e.port, 8080);
        assert!(!e.secure);
    }

    async fn serve_once(response: &'static [u8]) -> (u16, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(response).await.unwrap();
        });
        (port, task)
    }

    fn endpoint(port: u16) -> Endpoint {
        Endpoint { host: "127.0.0.1".into(), port, secure: false }
    }

    #[tokio::test]
    async fn exchange_and_limits() {
        let (port, task) = serve_once(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nKeep-Alive: timeout=5, max=1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), None);
        conn.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n", None, None, &options)
            .await
            .unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let head = conn.read_head(Method::Get, &url, None).await.unwrap();
        assert_eq!(head.status(), 200);
        assert!(conn.body_pending());
        assert_eq!(conn.read_body_chunk().await.unwrap().unwrap(), &b"hello"[..]);
        assert!(conn.read_body_chunk().await.unwrap().is_none());
        assert_eq!(
            conn.stale_reason(&endpoint(port), None, &options),
            Some("keep-alive request limit reached")
        );
        assert_eq!(conn.stale_reason(&endpoint(port + 1), None, &options), Some("address changed"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unread_body_reported_last() {
        let (port, task) = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabc").await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n", None, None, &options).await.unwrap();
        let url = Url::parse("http://127.0.0.1/").unwrap();
        conn.read_head(Method::Get, &url, None).await.unwrap();
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), Some(BODY_UNREAD));
        assert_eq!(conn.stale_reason(&endpoint(port + 1), None, &options), Some("address changed"));
        conn.drain().await.unwrap();
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn error_status_ends_reuse() {
        let (port, task) = serve_once(b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n").await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n", None, None, &options).await.unwrap();
        let url = Url::parse("http://127.0.0.1/").unwrap();
        let head = conn.read_head(Method::Get, &url, None).await.unwrap();
        assert!(head.has_error());
        assert_eq!(
            conn.stale_reason(&endpoint(port), None, &options),
            Some("previous response was an error")
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn server_request_limit_counts_sent_requests() {
        let (port, task) = serve_once(
            b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=5, max=2\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n", None, None, &options).await.unwrap();
        let url = Url::parse("http://127.0.0.1/").unwrap();
        conn.read_head(Method::Get, &url, None).await.unwrap();
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), None);
        conn.request_count = 2;
        assert_eq!(
            conn.stale_reason(&endpoint(port), None, &options),
            Some("keep-alive request limit reached")
        );
        task.await.unwrap();
    }

    #[tokio::test]
    async fn close_before_answer_is_empty_message() {
        let (port, task) = serve_once(b"").await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n", None, None, &options).await.unwrap();
        task.await.unwrap();
        let url = Url::parse("http://127.0.0.1/").unwrap();
        let err = conn.read_head(Method::Get, &url, None).await.unwrap_err();
        assert!(err.is_empty_message_body());
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), Some("previous exchange failed"));
    }

    #[tokio::test]
    async fn until_close_body_ends_reuse() {
        let (port, task) = serve_once(b"HTTP/1.0 200 OK\r\n\r\nstreamed").await;
        let options = ClientOptions::default();
        let mut conn = Connection::open(endpoint(port), &options).await.unwrap();
        conn.send(b"GET / HTTP/1.1\r\n\r\n", None, None, &options).await.unwrap();
        let url = Url::parse("http://127.0.0.1/").unwrap();
        conn.read_head(Method::Get, &url, None).await.unwrap();
        task.await.unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = conn.read_body_chunk().await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"streamed");
        assert_eq!(conn.stale_reason(&endpoint(port), None, &options), Some("connection not reusable"));
    }

    #[tokio::test]
    async fn refused_connect_is_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = Connection::open(endpoint(port), &ClientOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HttpError::ConnectFailure { .. }));
    }
}
