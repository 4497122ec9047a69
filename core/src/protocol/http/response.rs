/*
 * response.rs
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

//! Responses: the parsed head and the lazily read body.

use std::io::Read;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use url::Url;

use crate::protocol::http::connection::Connection;
use crate::protocol::http::error::{HttpError, Result};
use crate::protocol::http::h1::BodyMode;
use crate::protocol::http::headers::HeaderMap;
use crate::protocol::http::request::Method;
use crate::uri;

/// Status line and headers of a response, with the connection-management
/// values derived from them.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: u16,
    reason: Option<String>,
    headers: HeaderMap,
    address: Url,
    method: Method,
    reconnect_count: u32,
    keep_alive_timeout: Option<Duration>,
    maximum_keep_alive_requests: Option<u32>,
    connection_close: bool,
    location: Option<Url>,
    content_length: Option<u64>,
    body_mode: BodyMode,
}

/// Parse `Keep-Alive: timeout=5, max=100`.
fn keep_alive_params(value: &str) -> (Option<Duration>, Option<u32>) {
    let mut timeout = None;
    let mut max = None;
    for param in value.split(',') {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let val = val.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "timeout" => timeout = val.parse::<u64>().ok().map(Duration::from_secs),
            "max" => max = val.parse::<u32>().ok(),
            _ => {}
        }
    }
    (timeout, max)
}

fn has_token(value: &str, token: &str) -> bool {
    value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token))
}

impl ResponseHead {
    pub(crate) fn parse(
        status: u16,
        reason: Option<String>,
        headers: HeaderMap,
        address: Url,
        method: Method,
    ) -> std::result::Result<Self, String> {
        let (keep_alive_timeout, maximum_keep_alive_requests) = headers
            .get("Keep-Alive")
            .map(keep_alive_params)
            .unwrap_or((None, None));
        let connection_close = headers
            .get_all("Connection")
            .chain(headers.get_all("Proxy-Connection"))
            .any(|v| has_token(v, "close"));

        let location = if (300..400).contains(&status) && status != 304 {
            headers
                .get("Location")
                .and_then(|l| uri::resolve_location(&address, l))
        } else {
            None
        };

        let content_length = match headers.get("Content-Length") {
            Some(v) => Some(
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| format!("invalid Content-Length `{}`", v))?,
            ),
            None => None,
        };
        let chunked = headers
            .get_all("Transfer-Encoding")
            .any(|v| has_token(v, "chunked"));

        let body_mode = if method == Method::Head
            || (100..200).contains(&status)
            || status == 204
            || status == 304
        {
            BodyMode::Empty
        } else if chunked {
            BodyMode::Chunked
        } else if let Some(length) = content_length {
            BodyMode::Length(length)
        } else {
            BodyMode::UntilClose
        };

        Ok(Self {
            status,
            reason,
            headers,
            address,
            method,
            reconnect_count: 0,
            keep_alive_timeout,
            maximum_keep_alive_requests,
            connection_close,
            location,
            content_length: if chunked { None } else { content_length },
            body_mode,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Address that produced this response (the last hop of a redirect chain).
    pub fn address(&self) -> &Url {
        &self.address
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Transparent reconnects made while obtaining this response.
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub(crate) fn set_reconnect_count(&mut self, count: u32) {
        self.reconnect_count = count;
    }

    /// 4xx or 5xx.
    pub fn has_error(&self) -> bool {
        self.status >= 400
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        self.location.is_some()
    }

    /// Resolved redirect target of a 3xx response.
    pub fn redirect_location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    /// Idle timeout advertised by the server in `Keep-Alive`.
    pub fn keep_alive_timeout(&self) -> Option<Duration> {
        self.keep_alive_timeout
    }

    /// Remaining requests advertised by the server in `Keep-Alive`.
    pub fn maximum_keep_alive_requests(&self) -> Option<u32> {
        self.maximum_keep_alive_requests
    }

    /// Server asked to close the connection after this response.
    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.headers.get("Content-Encoding")
    }

    pub(crate) fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    /// Interim 1xx response to skip (101 ends the exchange instead).
    pub(crate) fn is_interim(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }
}

fn decode_gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoded = Vec::new();
    flate2::read::GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}

/// Undo `Content-Encoding`. Unknown codings are passed through.
pub(crate) fn decode_body(encoding: Option<&str>, body: Bytes) -> std::io::Result<Bytes> {
    match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        Some("gzip") | Some("x-gzip") => decode_gzip(&body),
        Some("deflate") => decode_deflate(&body),
        _ => Ok(body),
    }
}

/// A response whose body is still on the connection.
///
/// The body is read on demand. A response dropped before its body is read
/// leaves the rest on the wire; the client discards it before the next request.
pub struct Response<'a> {
    head: ResponseHead,
    connection: &'a mut Connection,
    decode: bool,
}

impl<'a> Response<'a> {
    pub(crate) fn new(head: ResponseHead, connection: &'a mut Connection, decode: bool) -> Self {
        Self {
            head,
            connection,
            decode,
        }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status(&self) -> u16 {
        self.head.status()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn address(&self) -> &Url {
        self.head.address()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.head.reconnect_count()
    }

    /// Whether the body has been read to its end.
    pub fn is_body_loaded(&self) -> bool {
        !self.connection.body_pending()
    }

    /// Next piece of the raw body (still content-encoded), `None` at the end.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.connection.read_body_chunk().await
    }

    /// Whole body, decoded when content decoding is enabled.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut body = BytesMut::with_capacity(self.head.content_length().unwrap_or(0).min(1 << 20) as usize);
        while let Some(chunk) = self.chunk().await? {
            body.extend_from_slice(&chunk);
        }
        let body = body.freeze();
        if !self.decode {
            return Ok(body);
        }
        decode_body(self.head.content_encoding(), body).map_err(|e| {
            HttpError::malformed(
                self.connection.host(),
                format!("cannot decode {} body: {}", self.head.content_encoding().unwrap_or("encoded"), e),
            )
        })
    }

    /// Body as text; invalid UTF-8 sequences are replaced.
    pub async fn text(self) -> Result<String> {
        let body = self.bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let host = self.connection.host().to_string();
        let body = self.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| HttpError::malformed(&host, format!("invalid JSON body: {}", e)))
    }

    /// Read and drop the body, keeping the connection usable.
    pub async fn discard(self) -> Result<ResponseHead> {
        self.connection.drain().await?;
        Ok(self.head)
    }

    /// Keep the head only. The body is discarded before the next request.
    pub fn into_head(self) -> ResponseHead {
        self.head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn head(status: u16, method: Method, headers: &[(&str, &str)]) -> ResponseHead {
        let mut map = HeaderMap::new();
        for (n, v) in headers {
            map.append(*n, *v);
        }
        ResponseHead::parse(
            status,
            None,
            map,
            Url::parse("http://example.com/a/b").unwrap(),
            method,
        )
        .unwrap()
    }

    #[test]
    fn keep_alive_header() {
        let h = head(
            200,
            Method::Get,
            &[("Keep-Alive", "timeout=5, max=99"), ("Content-Length", "0")],
        );
        assert_eq!(h.keep_alive_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(h.maximum_keep_alive_requests(), Some(99));
        assert!(!h.connection_close());
        let h = head(200, Method::Get, &[("Connection", "Close")]);
        assert!(h.connection_close());
        assert_eq!(h.keep_alive_timeout(), None);
    }

    #[test]
    fn body_modes() {
        assert_eq!(head(200, Method::Head, &[("Content-Length", "10")]).body_mode(), BodyMode::Empty);
        assert_eq!(head(204, Method::Get, &[]).body_mode(), BodyMode::Empty);
        assert_eq!(head(304, Method::Get, &[]).body_mode(), BodyMode::Empty);
        assert_eq!(head(200, Method::Get, &[("Content-Length", "7")]).body_mode(), BodyMode::Length(7));
        let h = head(
            200,
            Method::Get,
            &[("Transfer-Encoding", "gzip, chunked"), ("Content-Length", "7")],
        );
        assert_eq!(h.body_mode(), BodyMode::Chunked);
        assert_eq!(h.content_length(), None);
        assert_eq!(head(200, Method::Get, &[]).body_mode(), BodyMode::UntilClose);
        let mut map = HeaderMap::new();
        map.set("Content-Length", "abc");
        let url = Url::parse("http://h/").unwrap();
        assert!(ResponseHead::parse(200, None, map, url, Method::Get).is_err());
    }

    #[test]
    fn redirects_resolve_against_request() {
        let h = head(302, Method::Post, &[("Location", "../c?d=1")]);
        assert!(h.is_redirect());
        assert_eq!(h.redirect_location().unwrap().as_str(), "http://example.com/c?d=1");
        assert!(!head(304, Method::Get, &[("Location", "/x")]).is_redirect());
        assert!(!head(201, Method::Post, &[("Location", "/x")]).is_redirect());
        assert!(!head(301, Method::Get, &[]).is_redirect());
    }

    #[test]
    fn interim_responses() {
        assert!(head(100, Method::Get, &[]).is_interim());
        assert!(!head(101, Method::Get, &[]).is_interim());
        assert!(!head(200, Method::Get, &[]).is_interim());
    }

    #[test]
    fn content_decoding() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"compressed text").unwrap();
        let body = Bytes::from(gz.finish().unwrap());
        assert_eq!(decode_body(Some("gzip"), body).unwrap(), &b"compressed text"[..]);

        let mut z = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        z.write_all(b"zlib wrapped").unwrap();
        let body = Bytes::from(z.finish().unwrap());
        assert_eq!(decode_body(Some("Deflate"), body).unwrap(), &b"zlib wrapped"[..]);

        let mut raw = flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        raw.write_all(b"raw deflate").unwrap();
        let body = Bytes::from(raw.finish().unwrap());
        assert_eq!(decode_body(Some("deflate"), body).unwrap(), &b"raw deflate"[..]);

        let plain = Bytes::from_static(b"as is");
        assert_eq!(decode_body(Some("br"), plain.clone()).unwrap(), plain);
        assert!(decode_body(Some("gzip"), Bytes::from_static(b"not gzip")).is_err());
    }
}
