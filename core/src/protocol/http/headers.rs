/*
 * headers.rs
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

//! Request header tiers and their resolution.
//!
//! Three tiers feed the header block of a request: headers the client
//! computes itself, permanent headers kept on the client, and temporary
//! headers set for a single call. Later tiers win; names compare
//! case-insensitively and keep the position of their first appearance.

use crate::protocol::http::cookie::CookieJar;
use crate::protocol::http::error::{HttpError, Result};

/// Headers only the client may set.
pub const CLOSED_HEADERS: [&str; 6] = [
    "Host",
    "Content-Length",
    "Content-Type",
    "Connection",
    "Proxy-Connection",
    "Accept-Encoding",
];

pub fn is_closed_header(name: &str) -> bool {
    CLOSED_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Check a header name and value supplied through the permanent or temporary tier.
pub(crate) fn validate(name: &str, value: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HttpError::argument("name", "must not be empty"));
    }
    if !name.bytes().all(is_token_char) {
        return Err(HttpError::argument("name", format!("`{}` is not a header token", name)));
    }
    if is_closed_header(name) {
        return Err(HttpError::InvalidHeader(name.to_string()));
    }
    if value.bytes().any(|b| b == b'\r' || b == b'\n') {
        return Err(HttpError::argument("value", "must not contain CR or LF"));
    }
    Ok(())
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Every value for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set `name`, replacing an existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add a value without replacing earlier ones (response headers such as `Set-Cookie`).
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let removed = self.position(name).map(|i| self.entries.remove(i).1);
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Overlay `other` on top of this map.
    pub fn merge(&mut self, other: &HeaderMap) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }
}

/// Build the final header block: computed, then permanent, then temporary,
/// then `Cookie` from the jar when no tier set one.
pub(crate) fn resolve(
    computed: HeaderMap,
    permanent: &HeaderMap,
    temporary: &HeaderMap,
    cookies: Option<&CookieJar>,
) -> HeaderMap {
    let mut headers = computed;
    headers.merge(permanent);
    headers.merge(temporary);
    if let Some(jar) = cookies {
        if !jar.is_empty() && !headers.contains("Cookie") {
            headers.set("Cookie", jar.to_string());
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_names_are_rejected_in_any_case() {
        for name in CLOSED_HEADERS {
            assert!(matches!(validate(name, "x"), Err(HttpError::InvalidHeader(_))));
            let lower = name.to_ascii_lowercase();
            assert!(matches!(validate(&lower, "x"), Err(HttpError::InvalidHeader(_))));
        }
        assert!(validate("X-Api-Key", "secret").is_ok());
        assert!(matches!(validate("", "x"), Err(HttpError::Argument { .. })));
        assert!(validate("Bad Name", "x").is_err());
        assert!(validate("X-Evil", "a\r\nHost: b").is_err());
    }

    #[test]
    fn later_tiers_override_in_place() {
        let mut computed = HeaderMap::new();
        computed.set("Host", "example.com");
        computed.set("Accept-Language", "en-US");
        computed.set("Accept-Charset", "utf-8;q=0.7,*;q=0.3");
        let mut permanent = HeaderMap::new();
        permanent.set("accept-language", "de-DE");
        permanent.set("User-Agent", "tether");
        let mut temporary = HeaderMap::new();
        temporary.set("USER-AGENT", "tether/once");
        temporary.set("X-Trace", "1");

        let resolved = resolve(computed, &permanent, &temporary, None);
        let names: Vec<_> = resolved.iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["Host", "Accept-Language", "Accept-Charset", "User-Agent", "X-Trace"]
        );
        assert_eq!(resolved.get("accept-language"), Some("de-DE"));
        assert_eq!(resolved.get("User-Agent"), Some("tether/once"));
    }

    #[test]
    fn cookie_header_only_when_absent() {
        let mut jar = CookieJar::new();
        jar.set("sid", "42");
        let resolved = resolve(HeaderMap::new(), &HeaderMap::new(), &HeaderMap::new(), Some(&jar));
        assert_eq!(resolved.get("Cookie"), Some("sid=42"));

        let mut temporary = HeaderMap::new();
        temporary.set("Cookie", "manual=1");
        let resolved = resolve(HeaderMap::new(), &HeaderMap::new(), &temporary, Some(&jar));
        assert_eq!(resolved.get("Cookie"), Some("manual=1"));
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut h = HeaderMap::new();
        h.append("Set-Cookie", "a=1");
        h.append("set-cookie", "b=2");
        assert_eq!(h.get_all("Set-Cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(h.remove("SET-COOKIE").as_deref(), Some("a=1"));
        assert!(h.is_empty());
    }
}
