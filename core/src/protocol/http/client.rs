/*
 * client.rs
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

//! HTTP client: a caller-owned connection plus the request/response cycle
//! around it.
//!
//! One call runs as a loop: make sure a usable connection exists, send the
//! request, read the response head, then either return, reconnect and send
//! the same request again, or follow a redirect as a bodiless GET. Only one
//! exchange is in flight per client; `&mut self` on every call enforces it.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use url::Url;

use crate::config::ClientOptions;
use crate::protocol::http::connection::{Connection, Endpoint, BODY_UNREAD};
use crate::protocol::http::content::{FormUrlEncodedContent, HttpContent, MultipartContent, StringContent};
use crate::protocol::http::cookie::CookieJar;
use crate::protocol::http::error::{HttpError, Result};
use crate::protocol::http::headers::{self, HeaderMap};
use crate::protocol::http::progress::{ProgressEvent, ProgressHandler, SharedProgress};
use crate::protocol::http::request::{self, Method, RequestParams};
use crate::protocol::http::response::{Response, ResponseHead};
use crate::uri;

/// Per-call state, cleared when the call finishes.
#[derive(Default)]
struct Temporary {
    headers: HeaderMap,
    url_params: RequestParams,
    params: RequestParams,
    multipart: Option<MultipartContent>,
}

/// Counters of one logical call.
#[derive(Debug, Default)]
struct CallState {
    reconnects: u32,
    keep_alive_retried: bool,
    redirects: u32,
}

impl CallState {
    fn reported_reconnects(&self) -> u32 {
        self.reconnects + u32::from(self.keep_alive_retried)
    }
}

/// Keep-alive HTTP/1.1 client owning at most one connection.
pub struct Client {
    options: ClientOptions,
    base_address: Option<Url>,
    address: Option<Url>,
    connection: Option<Connection>,
    headers: HeaderMap,
    temporary: Temporary,
    cookies: Option<CookieJar>,
    upload_progress: Option<SharedProgress>,
    download_progress: Option<SharedProgress>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("base_address", &self.base_address.as_ref().map(Url::as_str))
            .field("connected", &self.connection.is_some())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            options,
            base_address: None,
            address: None,
            connection: None,
            headers: HeaderMap::new(),
            temporary: Temporary::default(),
            cookies: None,
            upload_progress: None,
            download_progress: None,
        }
    }

    /// Client resolving relative call addresses against `base`.
    pub fn with_base_address(base: &str) -> Result<Self> {
        let mut client = Self::new();
        client.set_base_address(base)?;
        Ok(client)
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Options take effect on the next call. A changed proxy replaces the connection.
    pub fn options_mut(&mut self) -> &mut ClientOptions {
        &mut self.options
    }

    pub fn base_address(&self) -> Option<&Url> {
        self.base_address.as_ref()
    }

    pub fn set_base_address(&mut self, base: &str) -> Result<()> {
        self.base_address = Some(uri::base_address(base)?);
        Ok(())
    }

    /// Address of the most recent request (the last redirect hop).
    pub fn address(&self) -> Option<&Url> {
        self.address.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Close the connection, if any.
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!("connection closed by caller");
        }
    }

    // Permanent headers

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn contains_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Set a header sent with every request. An empty value removes it;
    /// client-computed names fail with `HttpError::InvalidHeader`.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        headers::validate(name, value)?;
        if value.is_empty() {
            self.headers.remove(name);
        } else {
            self.headers.set(name, value);
        }
        Ok(())
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(name)
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    // Temporary request state, cleared after the next call

    /// Header for the next call only; it overrides a permanent header of the same name.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        headers::validate(name, value)?;
        if value.is_empty() {
            return Err(HttpError::argument("value", "must not be empty"));
        }
        self.temporary.headers.set(name, value);
        Ok(self)
    }

    /// Query parameter for the next call; parameters replace the query of the address.
    pub fn add_url_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.temporary.url_params.add(key, value);
        self
    }

    /// Form field for the next call, sent as `application/x-www-form-urlencoded`.
    pub fn add_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.temporary.params.add(key, value);
        self
    }

    /// Multipart text field for the next call. Multipart content takes
    /// precedence over form parameters.
    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.multipart().add(name, StringContent::new(value));
        self
    }

    /// Multipart file field for the next call.
    pub fn add_file(
        &mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl HttpContent + 'static,
    ) -> &mut Self {
        self.multipart().add_file(name, file_name, content);
        self
    }

    fn multipart(&mut self) -> &mut MultipartContent {
        self.temporary
            .multipart
            .get_or_insert_with(MultipartContent::new)
    }

    pub fn clear_temporary(&mut self) {
        self.temporary = Temporary::default();
    }

    // Cookies

    pub fn cookies(&self) -> Option<&CookieJar> {
        self.cookies.as_ref()
    }

    pub fn cookies_mut(&mut self) -> Option<&mut CookieJar> {
        self.cookies.as_mut()
    }

    /// Attach a cookie jar; `Set-Cookie` responses are merged into it.
    pub fn set_cookies(&mut self, cookies: Option<CookieJar>) {
        self.cookies = cookies;
    }

    // Progress

    /// Called as request bytes are written. Runs inline with the I/O.
    pub fn on_upload_progress<F>(&mut self, handler: F)
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        let handler: ProgressHandler = Box::new(handler);
        self.upload_progress = Some(Arc::new(Mutex::new(handler)));
    }

    /// Called as response bytes are read, once the head has been parsed.
    pub fn on_download_progress<F>(&mut self, handler: F)
    where
        F: FnMut(ProgressEvent) + Send + 'static,
    {
        let handler: ProgressHandler = Box::new(handler);
        self.download_progress = Some(Arc::new(Mutex::new(handler)));
    }

    pub fn clear_progress_handlers(&mut self) {
        self.upload_progress = None;
        self.download_progress = None;
    }

    // Verbs

    pub async fn get(&mut self, address: &str, params: Option<&RequestParams>) -> Result<Response<'_>> {
        if let Some(params) = params {
            for (key, value) in params.iter() {
                self.temporary.url_params.add(key, value);
            }
        }
        self.raw(Method::Get, address, None).await
    }

    pub async fn head(&mut self, address: &str) -> Result<Response<'_>> {
        self.raw(Method::Head, address, None).await
    }

    pub async fn post(&mut self, address: &str, body: &str, content_type: &str) -> Result<Response<'_>> {
        if content_type.is_empty() {
            return Err(HttpError::argument("content_type", "must not be empty"));
        }
        let content = StringContent::new(body).with_content_type(content_type);
        self.raw(Method::Post, address, Some(&content)).await
    }

    pub async fn post_form(&mut self, address: &str, params: &RequestParams) -> Result<Response<'_>> {
        let content = FormUrlEncodedContent::new(params);
        self.raw(Method::Post, address, Some(&content)).await
    }

    pub async fn post_content(&mut self, address: &str, content: &dyn HttpContent) -> Result<Response<'_>> {
        self.raw(Method::Post, address, Some(content)).await
    }

    pub async fn put(&mut self, address: &str, content: &dyn HttpContent) -> Result<Response<'_>> {
        self.raw(Method::Put, address, Some(content)).await
    }

    pub async fn delete(&mut self, address: &str) -> Result<Response<'_>> {
        self.raw(Method::Delete, address, None).await
    }

    /// Send any request. Without explicit `content` the temporary multipart
    /// fields or form parameters become the body. Temporary state is cleared
    /// whether the call succeeds or not.
    pub async fn raw(
        &mut self,
        method: Method,
        address: &str,
        content: Option<&dyn HttpContent>,
    ) -> Result<Response<'_>> {
        let temporary = std::mem::take(&mut self.temporary);
        let head = self.execute(method, address, content, temporary).await?;
        let decode = self.options.enable_encoding_content;
        match self.connection.as_mut() {
            Some(connection) => Ok(Response::new(head, connection, decode)),
            None => Err(not_connected(head.address(), true)),
        }
    }

    async fn execute(
        &mut self,
        method: Method,
        address: &str,
        explicit: Option<&dyn HttpContent>,
        temporary: Temporary,
    ) -> Result<ResponseHead> {
        self.options.validate()?;
        let Temporary {
            headers: mut temporary_headers,
            url_params,
            params,
            multipart,
        } = temporary;

        let mut address = uri::resolve_address(self.base_address.as_ref(), address)?;
        if !url_params.is_empty() {
            address = uri::with_query(address, &url_params.to_query_string());
        }
        let form = (!params.is_empty()).then(|| FormUrlEncodedContent::new(&params));
        let mut content: Option<&dyn HttpContent> = match (explicit, &multipart, &form) {
            (Some(content), _, _) => Some(content),
            (None, Some(multipart), _) => Some(multipart as &dyn HttpContent),
            (None, None, Some(form)) => Some(form as &dyn HttpContent),
            (None, None, None) => None,
        };
        let mut method = method;
        let mut state = CallState::default();

        loop {
            let endpoint = Endpoint::from_url(&address)?;
            self.address = Some(address.clone());

            let fresh = match self.ensure_connection(&endpoint).await {
                Ok(fresh) => fresh,
                Err(e) if self.can_reconnect(&state) => {
                    self.reconnect_after_failure(&mut state, &e).await;
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            };

            match self.send_request(method, &address, content, &temporary_headers).await {
                Ok(()) => {}
                Err(e) if self.can_reconnect(&state) => {
                    self.reconnect_after_failure(&mut state, &e).await;
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            }

            let mut head = match self.receive_head(method, &address).await {
                Ok(head) => head,
                Err(e) => {
                    // Servers drop idle keep-alive connections without a word;
                    // one fresh attempt is allowed outside the reconnect budget.
                    if self.options.keep_alive
                        && !state.keep_alive_retried
                        && !fresh
                        && e.is_empty_message_body()
                    {
                        debug!(host = %endpoint.host, "keep-alive connection closed by peer, resending");
                        self.dispose();
                        state.keep_alive_retried = true;
                        continue;
                    }
                    if self.can_reconnect(&state) {
                        self.reconnect_after_failure(&mut state, &e).await;
                        continue;
                    }
                    return Err(self.fail(e));
                }
            };
            head.set_reconnect_count(state.reported_reconnects());
            self.store_cookies(&head);

            if !self.options.ignore_protocol_errors {
                if let Some(e) = HttpError::from_status(&endpoint.host, head.status()) {
                    return Err(self.fail(e));
                }
            }

            if self.options.allow_auto_redirect {
                if let Some(location) = head.redirect_location() {
                    state.redirects += 1;
                    if state.redirects > self.options.maximum_automatic_redirections {
                        warn!(host = %endpoint.host, count = state.redirects, "redirect limit exceeded");
                        return Err(HttpError::TooManyRedirects {
                            host: endpoint.host,
                            count: state.redirects,
                        });
                    }
                    debug!(status = head.status(), from = %address, to = %location, "following redirect");
                    address = location.clone();
                    method = Method::Get;
                    content = None;
                    temporary_headers.clear();
                    state.reconnects = 0;
                    state.keep_alive_retried = false;
                    continue;
                }
            }

            return Ok(head);
        }
    }

    /// Make the connection usable for `endpoint`. Returns true when a new one was opened.
    async fn ensure_connection(&mut self, endpoint: &Endpoint) -> Result<bool> {
        let reason = match self.connection.as_mut() {
            None => "no connection",
            Some(connection) => {
                connection.clear_progress();
                let proxy = self.options.proxy.as_ref();
                let mut stale = connection.stale_reason(endpoint, proxy, &self.options);
                if stale == Some(BODY_UNREAD) {
                    stale = match connection.drain().await {
                        Ok(()) => connection.stale_reason(endpoint, proxy, &self.options),
                        Err(e) => {
                            warn!(host = %endpoint.host, error = %e, "discarding unread response body failed");
                            Some("unread body could not be discarded")
                        }
                    };
                }
                match stale {
                    None => {
                        debug!(host = %endpoint.host, port = endpoint.port, "reusing connection");
                        return Ok(false);
                    }
                    Some(reason) => reason,
                }
            }
        };
        debug!(host = %endpoint.host, port = endpoint.port, reason, "opening connection");
        self.connection = None;
        let connection = Connection::open(endpoint.clone(), &self.options).await?;
        self.connection = Some(connection);
        Ok(true)
    }

    async fn send_request(
        &mut self,
        method: Method,
        address: &Url,
        content: Option<&dyn HttpContent>,
        temporary_headers: &HeaderMap,
    ) -> Result<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(not_connected(address, false));
        };
        let content = content.filter(|_| method.can_contain_body());
        let absolute_form = connection.uses_absolute_form();
        let computed = request::computed_headers(method, address, &self.options, content, absolute_form);
        let mut headers = headers::resolve(computed, &self.headers, temporary_headers, self.cookies.as_ref());
        if absolute_form && !headers.contains("Proxy-Authorization") {
            if let Some(authorization) = connection.proxy_authorization() {
                headers.set("Proxy-Authorization", authorization);
            }
        }
        let head = request::encode_head(method, address, absolute_form, &headers);
        debug!(%method, %address, "sending request");
        connection
            .send(&head, content, self.upload_progress.as_ref(), &self.options)
            .await
    }

    async fn receive_head(&mut self, method: Method, address: &Url) -> Result<ResponseHead> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(not_connected(address, true));
        };
        connection
            .read_head(method, address, self.download_progress.as_ref())
            .await
    }

    fn store_cookies(&mut self, head: &ResponseHead) {
        if let Some(jar) = self.cookies.as_mut() {
            for value in head.headers().get_all("Set-Cookie") {
                jar.merge_set_cookie(value);
            }
        }
    }

    /// The attempt counter includes the first try.
    fn can_reconnect(&self, state: &CallState) -> bool {
        self.options.reconnect && state.reconnects + 1 < self.options.reconnect_limit
    }

    async fn reconnect_after_failure(&mut self, state: &mut CallState, error: &HttpError) {
        self.dispose();
        state.reconnects += 1;
        debug!(attempt = state.reconnects, error = %error, "reconnecting");
        tokio::time::sleep(self.options.reconnect_delay).await;
    }

    fn dispose(&mut self) {
        self.connection = None;
    }

    fn fail(&mut self, error: HttpError) -> HttpError {
        warn!(error = %error, "request failed");
        self.dispose();
        error
    }
}

fn not_connected(address: &Url, receiving: bool) -> HttpError {
    let host = address.host_str().unwrap_or_default().to_string();
    let source = io::Error::new(io::ErrorKind::NotConnected, "no connection");
    if receiving {
        HttpError::ReceiveFailure {
            host,
            source,
            empty_message_body: false,
        }
    } else {
        HttpError::SendFailure { host, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::headers::CLOSED_HEADERS;

    #[test]
    fn closed_headers_rejected_on_both_tiers() {
        let mut client = Client::new();
        for name in CLOSED_HEADERS {
            assert!(matches!(client.set_header(name, "x"), Err(HttpError::InvalidHeader(_))));
            assert!(matches!(client.add_header(name, "x"), Err(HttpError::InvalidHeader(_))));
        }
        client.set_header("User-Agent", "tether").unwrap();
        assert_eq!(client.header("user-agent"), Some("tether"));
        client.set_header("User-Agent", "").unwrap();
        assert!(!client.contains_header("User-Agent"));
        assert!(client.add_header("X-Once", "").is_err());
    }

    #[test]
    fn base_address_normalized() {
        let client = Client::with_base_address("api.example.com/v1/").unwrap();
        assert_eq!(client.base_address().unwrap().as_str(), "http://api.example.com/v1/");
        assert!(Client::with_base_address("").is_err());
    }

    #[test]
    fn reconnect_budget_counts_attempts() {
        let mut client = Client::new();
        let mut state = CallState::default();
        assert!(!client.can_reconnect(&state));
        client.options_mut().reconnect = true;
        client.options_mut().reconnect_limit = 3;
        assert!(client.can_reconnect(&state));
        state.reconnects = 2;
        assert!(!client.can_reconnect(&state));
        state.keep_alive_retried = true;
        assert_eq!(state.reported_reconnects(), 3);
    }

    #[tokio::test]
    async fn temporary_state_cleared_after_failed_call() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = Client::new();
        client.add_header("X-Once", "1").unwrap();
        client.add_url_param("a", "b").add_param("c", "d").add_field("e", "f");
        let err = client
            .get(&format!("http://127.0.0.1:{}/", port), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HttpError::ConnectFailure { .. }));
        assert!(client.temporary.headers.is_empty());
        assert!(client.temporary.url_params.is_empty());
        assert!(client.temporary.params.is_empty());
        assert!(client.temporary.multipart.is_none());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn invalid_options_rejected_before_connecting() {
        let mut client = Client::new();
        client.options_mut().maximum_automatic_redirections = 0;
        let err = client.get("http://127.0.0.1:1/", None).await.err().unwrap();
        assert!(matches!(err, HttpError::Argument { .. }));
        let err = Client::new().get("", None).await.err().unwrap();
        assert!(matches!(err, HttpError::Argument { .. }));
    }
}
