/*
 * uri.rs
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

//! Request addresses: base address normalization, resolution of relative
//! addresses, and percent-encoded query/form strings.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{Position, Url};

use crate::protocol::http::error::{HttpError, Result};

/// Query/form component set: everything but unreserved characters is encoded.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn is_http_scheme(url: &Url) -> bool {
    url.scheme() == "http" || url.scheme() == "https"
}

fn parse_http(address: &str, name: &'static str) -> Result<Url> {
    let url = Url::parse(address).map_err(|e| HttpError::argument(name, e.to_string()))?;
    if !is_http_scheme(&url) {
        return Err(HttpError::argument(
            name,
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(HttpError::argument(name, "address has no host"));
    }
    Ok(url)
}

/// Parse a base address, prefixing `http://` when no HTTP scheme is present.
pub fn base_address(address: &str) -> Result<Url> {
    if address.is_empty() {
        return Err(HttpError::argument("base_address", "must not be empty"));
    }
    if address.starts_with("http") && address.contains("://") {
        parse_http(address, "base_address")
    } else {
        parse_http(&format!("http://{}", address), "base_address")
    }
}

/// Resolve a call address. Absolute `http`/`https` addresses are used as-is;
/// anything else is resolved against `base`, or given `http://` when there is no base.
pub fn resolve_address(base: Option<&Url>, address: &str) -> Result<Url> {
    if address.is_empty() {
        return Err(HttpError::argument("address", "must not be empty"));
    }
    if let Ok(url) = Url::parse(address) {
        if is_http_scheme(&url) {
            return parse_http(url.as_str(), "address");
        }
    }
    match base {
        Some(base) => {
            let url = base
                .join(address)
                .map_err(|e| HttpError::argument("address", e.to_string()))?;
            parse_http(url.as_str(), "address")
        }
        None => parse_http(&format!("http://{}", address), "address"),
    }
}

/// Resolve a redirect `Location` against the address that produced it.
pub fn resolve_location(request: &Url, location: &str) -> Option<Url> {
    let url = request.join(location.trim()).ok()?;
    if is_http_scheme(&url) && url.host_str().is_some() {
        Some(url)
    } else {
        None
    }
}

/// Percent-encode one query or form component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Encode pairs as `k1=v1&k2=v2`.
pub fn to_query_string<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&encode_component(key));
        out.push('=');
        out.push_str(&encode_component(value));
    }
    out
}

/// Replace the query of `address` with `query` (removed when empty).
pub fn with_query(mut address: Url, query: &str) -> Url {
    if query.is_empty() {
        address.set_query(None);
    } else {
        address.set_query(Some(query));
    }
    address
}

/// Origin-form request target: path plus query.
pub fn path_and_query(address: &Url) -> &str {
    &address[Position::BeforePath..Position::AfterQuery]
}

/// Absolute-form request target (no fragment), used through HTTP proxies.
pub fn absolute_uri(address: &Url) -> &str {
    &address[..Position::AfterQuery]
}

/// `Host` header value: port only when it is not the scheme default.
pub fn host_header(address: &Url) -> String {
    let host = address.host_str().unwrap_or_default();
    match address.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}
