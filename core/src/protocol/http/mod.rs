/*
 * mod.rs
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

//! HTTP client: a keep-alive HTTP/1.1 client with reconnect, redirect and
//! progress reporting.
//!
//! - `Client` owns at most one connection and runs the request cycle.
//! - HTTP/1.1 responses are push-parsed (`h1`); bodies stay on the wire
//!   until read through the borrowed `Response`.
//! - Request bodies implement `HttpContent`.
//! - Proxies implement `ProxyConnector`; `HttpProxy` is provided.

mod connection;
mod headers;
mod progress;
mod stream;

pub mod client;
pub mod content;
pub mod cookie;
pub mod error;
pub mod h1;
pub mod proxy;
pub mod request;
pub mod response;

pub use client::Client;
pub use content::{
    BytesContent, ContentSink, FileContent, FormUrlEncodedContent, HttpContent, MultipartContent,
    StringContent, WriteFuture,
};
pub use cookie::CookieJar;
pub use error::{HttpError, Result};
pub use headers::{is_closed_header, HeaderMap, CLOSED_HEADERS};
pub use progress::{BytesCallback, CountingStream, ProgressEvent, ProgressHandler};
pub use proxy::{ConnectFuture, HttpProxy, ProxyConnector};
pub use request::{Method, RequestParams};
pub use response::{Response, ResponseHead};
