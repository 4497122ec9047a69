/*
 * config.rs
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

//! Client options: redirect, keep-alive and reconnect policy, timeouts, TLS
//! validation, proxy and the values behind the `Accept-*` headers.
//!
//! Options are plain fields with defaults; `validate()` runs before every
//! request so a bad value is reported as `HttpError::Argument` on the call
//! that would have used it.

use std::sync::Arc;
use std::time::Duration;

use crate::net::CertificateValidator;
use crate::protocol::http::error::{HttpError, Result};
use crate::protocol::http::proxy::ProxyConnector;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(60_000);
const DEFAULT_READ_WRITE_TIMEOUT: Duration = Duration::from_millis(60_000);
const DEFAULT_RECONNECT_LIMIT: u32 = 3;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_REDIRECTIONS: u32 = 5;
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_millis(30_000);
const DEFAULT_MAX_KEEP_ALIVE_REQUESTS: u32 = 100;
const DEFAULT_SEND_CHUNK_SIZE: usize = 8192;

/// Behaviour of a [`Client`](crate::protocol::http::Client).
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Follow 3xx responses that carry a `Location`.
    pub allow_auto_redirect: bool,
    /// Return 4xx/5xx responses instead of failing with `HttpError::Protocol`.
    pub ignore_protocol_errors: bool,
    /// Send `Connection: keep-alive` and reuse the connection between calls.
    pub keep_alive: bool,
    /// Transparently reconnect and resend after transport failures.
    pub reconnect: bool,
    pub connect_timeout: Duration,
    /// Bound on every read and on each write phase (head, body).
    pub read_write_timeout: Duration,
    /// Maximum reconnect attempts for one logical call.
    pub reconnect_limit: u32,
    pub reconnect_delay: Duration,
    pub maximum_automatic_redirections: u32,
    /// Local idle limit, used when the server does not advertise one.
    pub keep_alive_timeout: Duration,
    /// Local request limit per connection, used when the server does not advertise one.
    pub maximum_keep_alive_requests: u32,
    pub certificate_validator: CertificateValidator,
    /// Route connections through this proxy; `None` connects directly.
    pub proxy: Option<Arc<dyn ProxyConnector>>,
    /// Language tag for `Accept-Language`, e.g. `ru-RU`.
    pub culture: Option<String>,
    /// Charset name for `Accept-Charset`, e.g. `utf-8`.
    pub character_set: Option<String>,
    /// Send `Accept-Encoding: gzip,deflate` and decode compressed bodies.
    pub enable_encoding_content: bool,
    /// Largest single write while upload progress is being reported.
    pub send_chunk_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            allow_auto_redirect: true,
            ignore_protocol_errors: false,
            keep_alive: true,
            reconnect: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_write_timeout: DEFAULT_READ_WRITE_TIMEOUT,
            reconnect_limit: DEFAULT_RECONNECT_LIMIT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            maximum_automatic_redirections: DEFAULT_MAX_REDIRECTIONS,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            maximum_keep_alive_requests: DEFAULT_MAX_KEEP_ALIVE_REQUESTS,
            certificate_validator: CertificateValidator::AcceptAll,
            proxy: None,
            culture: None,
            character_set: None,
            enable_encoding_content: true,
            send_chunk_size: DEFAULT_SEND_CHUNK_SIZE,
        }
    }
}

impl ClientOptions {
    /// Check value ranges. Zero limits and zero timeouts are rejected.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(HttpError::argument("connect_timeout", "must be greater than zero"));
        }
        if self.read_write_timeout.is_zero() {
            return Err(HttpError::argument("read_write_timeout", "must be greater than zero"));
        }
        if self.maximum_automatic_redirections == 0 {
            return Err(HttpError::argument(
                "maximum_automatic_redirections",
                "must be at least 1",
            ));
        }
        if self.maximum_keep_alive_requests == 0 {
            return Err(HttpError::argument(
                "maximum_keep_alive_requests",
                "must be at least 1",
            ));
        }
        if self.send_chunk_size == 0 {
            return Err(HttpError::argument("send_chunk_size", "must be at least 1"));
        }
        if let Some(culture) = &self.culture {
            if culture.len() < 2 || !culture.is_char_boundary(2) {
                return Err(HttpError::argument("culture", "expected a language tag such as en-US"));
            }
        }
        Ok(())
    }

    /// `Accept-Language` value derived from `culture`.
    pub(crate) fn language_header(&self) -> Option<String> {
        let culture = self.culture.as_deref()?;
        if culture.starts_with("en") {
            return Some(culture.to_string());
        }
        Some(format!(
            "{},{};q=0.8,en-US;q=0.6,en;q=0.4",
            culture,
            &culture[..2]
        ))
    }

    /// `Accept-Charset` value derived from `character_set`.
    pub(crate) fn charset_header(&self) -> Option<String> {
        let charset = self.character_set.as_deref()?;
        if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
            return Some("utf-8;q=0.7,*;q=0.3".to_string());
        }
        Some(format!("{},utf-8;q=0.7,*;q=0.3", charset.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = ClientOptions::default();
        assert!(o.allow_auto_redirect);
        assert!(!o.ignore_protocol_errors);
        assert!(o.keep_alive);
        assert!(!o.reconnect);
        assert_eq!(o.connect_timeout, Duration::from_secs(60));
        assert_eq!(o.read_write_timeout, Duration::from_secs(60));
        assert_eq!(o.reconnect_limit, 3);
        assert_eq!(o.reconnect_delay, Duration::from_millis(100));
        assert_eq!(o.maximum_automatic_redirections, 5);
        assert_eq!(o.keep_alive_timeout, Duration::from_secs(30));
        assert_eq!(o.maximum_keep_alive_requests, 100);
        assert!(o.enable_encoding_content);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn zero_limits_rejected() {
        let mut o = ClientOptions::default();
        o.maximum_automatic_redirections = 0;
        assert!(matches!(
            o.validate(),
            Err(HttpError::Argument { name: "maximum_automatic_redirections", .. })
        ));
        let mut o = ClientOptions::default();
        o.send_chunk_size = 0;
        assert!(o.validate().is_err());
        let mut o = ClientOptions::default();
        o.connect_timeout = Duration::ZERO;
        assert!(o.validate().is_err());
    }

    #[test]
    fn language_header() {
        let mut o = ClientOptions::default();
        assert_eq!(o.language_header(), None);
        o.culture = Some("en-GB".into());
        assert_eq!(o.language_header().as_deref(), Some("en-GB"));
        o.culture = Some("ru-RU".into());
        assert_eq!(
            o.language_header().as_deref(),
            Some("ru-RU,ru;q=0.8,en-US;q=0.6,en;q=0.4")
        );
    }

    #[test]
    fn charset_header() {
        let mut o = ClientOptions::default();
        o.character_set = Some("UTF-8".into());
        assert_eq!(o.charset_header().as_deref(), Some("utf-8;q=0.7,*;q=0.3"));
        o.character_set = Some("windows-1251".into());
        assert_eq!(
            o.charset_header().as_deref(),
            Some("windows-1251,utf-8;q=0.7,*;q=0.3")
        );
    }
}
