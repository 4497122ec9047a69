/*
 * proxy.rs
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

//! Proxy traversal. A connector hands back a TCP stream on which the client
//! can speak to the target directly (or through an HTTP forwarding proxy).

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send + 'a>>;

/// Opens transport connections on behalf of a client.
pub trait ProxyConnector: fmt::Debug + Send + Sync {
    /// Connect to `host:port`. `secure` is set when TLS will be layered on
    /// the returned stream, so the stream must reach the target end to end.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        secure: bool,
        timeout: Duration,
    ) -> ConnectFuture<'a>;

    /// Whether requests carry the absolute URI and `Proxy-Connection`.
    fn uses_absolute_form(&self, _secure: bool) -> bool {
        false
    }

    /// `Proxy-Authorization` value for forwarded requests.
    fn authorization(&self) -> Option<String> {
        None
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{} timed out", what))
}

/// HTTP proxy: forwards plain requests, tunnels TLS with `CONNECT`.
#[derive(Clone)]
pub struct HttpProxy {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
}

impl fmt::Debug for HttpProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProxy")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

impl HttpProxy {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn tunnel(&self, mut tcp: TcpStream, host: &str, port: u16) -> io::Result<TcpStream> {
        let authority = format!("{}:{}", host, port);
        let mut request = format!(
            "CONNECT {0} HTTP/1.1\r\nHost: {0}\r\nProxy-Connection: keep-alive\r\n",
            authority
        );
        if let Some(auth) = self.authorization() {
            request.push_str(&format!("Proxy-Authorization: {}\r\n", auth));
        }
        request.push_str("\r\n");
        tcp.write_all(request.as_bytes()).await?;

        // Nothing follows the proxy's answer until the client speaks again.
        let mut response = Vec::with_capacity(256);
        let mut buf = [0u8; 512];
        while !response.windows(4).any(|w| w == b"\r\n\r\n") {
            if response.len() > MAX_CONNECT_RESPONSE {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "CONNECT response too long"));
            }
            let n = tcp.read(&mut buf).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed the connection during CONNECT",
                ));
            }
            response.extend_from_slice(&buf[..n]);
        }
        let status = connect_status(&response)?;
        if !(200..300).contains(&status) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("proxy refused CONNECT to {} with status {}", authority, status),
            ));
        }
        Ok(tcp)
    }
}

fn connect_status(response: &[u8]) -> io::Result<u16> {
    let line_end = response
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(response.len());
    std::str::from_utf8(&response[..line_end])
        .ok()
        .filter(|line| line.starts_with("HTTP/"))
        .and_then(|line| line.split(' ').nth(1))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "invalid CONNECT response"))
}

impl ProxyConnector for HttpProxy {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        secure: bool,
        limit: Duration,
    ) -> ConnectFuture<'a> {
        Box::pin(async move {
            let attempt = async {
                let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
                if secure {
                    self.tunnel(tcp, host, port).await
                } else {
                    Ok(tcp)
                }
            };
            timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(timed_out("proxy connect")))
        })
    }

    fn uses_absolute_form(&self, secure: bool) -> bool {
        !secure
    }

    fn authorization(&self) -> Option<String> {
        let (user, password) = self.credentials.as_ref()?;
        Some(format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", user, password))
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn basic_authorization() {
        let proxy = HttpProxy::new("127.0.0.1", 3128).with_credentials("Aladdin", "open sesame");
        assert_eq!(
            proxy.authorization().as_deref(),
            Some("Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==")
        );
        assert!(HttpProxy::new("p", 1).authorization().is_none());
        assert!(proxy.uses_absolute_form(false));
        assert!(!proxy.uses_absolute_form(true));
        assert!(!format!("{:?}", proxy).contains("sesame"));
    }

    #[test]
    fn connect_status_line() {
        assert_eq!(connect_status(b"HTTP/1.1 200 Connection established\r\n\r\n").unwrap(), 200);
        assert!(connect_status(b"garbage\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn connect_tunnel_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            request
        });
        let proxy = HttpProxy::new("127.0.0.1", port).with_credentials("u", "p");
        proxy
            .connect("example.com", 443, true, Duration::from_secs(5))
            .await
            .unwrap();
        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dTpw\r\n"));
    }

    #[tokio::test]
    async fn refused_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await;
            let _ = sock
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await;
        });
        let err = HttpProxy::new("127.0.0.1", port)
            .connect("example.com", 443, true, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }
}
