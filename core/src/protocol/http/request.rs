/*
 * request.rs
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

//! Request encoding: method, parameters, computed headers and the request head.

use std::fmt;

use url::Url;

use crate::config::ClientOptions;
use crate::protocol::http::content::HttpContent;
use crate::protocol::http::headers::HeaderMap;
use crate::uri;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Other(&'static str),
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other(s) => s,
        }
    }

    /// Only these methods send a body; content passed with any other method is ignored.
    pub fn can_contain_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key/value parameters for a query string or a form body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    /// `k1=v1&k2=v2`, percent-encoded.
    pub fn to_query_string(&self) -> String {
        uri::to_query_string(self.iter())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Headers the client computes for every request. `via_proxy` selects
/// `Proxy-Connection` over `Connection`.
pub(crate) fn computed_headers(
    method: Method,
    address: &Url,
    options: &ClientOptions,
    content: Option<&dyn HttpContent>,
    via_proxy: bool,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.set("Host", uri::host_header(address));
    let connection = if options.keep_alive { "keep-alive" } else { "close" };
    let connection_header = if via_proxy { "Proxy-Connection" } else { "Connection" };
    headers.set(connection_header, connection);
    if options.enable_encoding_content {
        headers.set("Accept-Encoding", "gzip,deflate");
    }
    if let Some(language) = options.language_header() {
        headers.set("Accept-Language", language);
    }
    if let Some(charset) = options.charset_header() {
        headers.set("Accept-Charset", charset);
    }
    if method.can_contain_body() {
        let length = content.map_or(0, |c| c.content_length());
        if let Some(content) = content.filter(|_| length > 0) {
            headers.set("Content-Type", content.content_type());
        }
        headers.set("Content-Length", length.to_string());
    }
    headers
}

/// Request line and header block. Origin-form target (`/path?query`) unless
/// `absolute_form`, which HTTP proxies expect.
pub(crate) fn encode_head(
    method: Method,
    address: &Url,
    absolute_form: bool,
    headers: &HeaderMap,
) -> Vec<u8> {
    let target = if absolute_form {
        uri::absolute_uri(address)
    } else {
        uri::path_and_query(address)
    };
    let mut head = String::with_capacity(256);
    head.push_str(method.as_str());
    head.push(' ');
    head.push_str(target);
    head.push_str(" HTTP/1.1\r\n");
    for (name, value) in headers.iter() {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    head.into_bytes()
}
