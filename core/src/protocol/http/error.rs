/*
 * error.rs
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

//! HTTP client errors.
//!
//! Transport failures (connect, send, receive) are retried by the client when
//! its reconnect policy allows; everything that reaches the caller is fatal.

use std::io;

/// Result alias used throughout the HTTP client.
pub type Result<T> = std::result::Result<T, HttpError>;

/// Errors returned by [`Client`](super::Client) operations.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// A required argument was empty or out of range.
    #[error("invalid argument `{name}`: {reason}")]
    Argument { name: &'static str, reason: String },

    /// Attempt to set a header that only the client may compute.
    #[error("header `{0}` is computed by the client and cannot be set directly")]
    InvalidHeader(String),

    /// TCP connect, proxy traversal or TLS handshake failed.
    #[error("failed to connect to {host}")]
    ConnectFailure {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Writing the request line, headers or body failed.
    #[error("failed to send request to {host}")]
    SendFailure {
        host: String,
        #[source]
        source: io::Error,
    },

    /// Reading the response failed. `empty_message_body` is set when the peer
    /// closed the connection before sending a single byte of the response.
    #[error("failed to receive response from {host}")]
    ReceiveFailure {
        host: String,
        #[source]
        source: io::Error,
        empty_message_body: bool,
    },

    /// 4xx/5xx status (with `status`) or malformed response framing (without).
    #[error("{message} ({host})")]
    Protocol {
        host: String,
        status: Option<u16>,
        message: String,
    },

    /// The redirect chain exceeded the configured maximum.
    #[error("too many redirects ({count}) while requesting {host}")]
    TooManyRedirects { host: String, count: u32 },
}

impl HttpError {
    pub(crate) fn argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Argument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(host: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            host: host.to_string(),
            status: None,
            message: message.into(),
        }
    }

    /// Map a 4xx/5xx status to a protocol error. Returns `None` for other codes.
    pub(crate) fn from_status(host: &str, status: u16) -> Option<Self> {
        let message = match status {
            400..=499 => format!("client error {}", status),
            500..=u16::MAX => format!("server error {}", status),
            _ => return None,
        };
        Some(Self::Protocol {
            host: host.to_string(),
            status: Some(status),
            message,
        })
    }

    /// Status code carried by a protocol error.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Protocol { status, .. } => *status,
            _ => None,
        }
    }

    /// Host of the request that failed, when the error is tied to one.
    pub fn host(&self) -> Option<&str> {
        match self {
            HttpError::ConnectFailure { host, .. }
            | HttpError::SendFailure { host, .. }
            | HttpError::ReceiveFailure { host, .. }
            | HttpError::Protocol { host, .. }
            | HttpError::TooManyRedirects { host, .. } => Some(host),
            HttpError::Argument { .. } | HttpError::InvalidHeader(_) => None,
        }
    }

    /// True when the peer dropped the connection without answering at all,
    /// which is how servers usually close an idle keep-alive connection.
    pub fn is_empty_message_body(&self) -> bool {
        matches!(
            self,
            HttpError::ReceiveFailure {
                empty_message_body: true,
                ..
            }
        )
    }
}
