/*
 * content.rs
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

//! Request bodies.
//!
//! Every body declares its length and content type up front and writes
//! itself to the connection on demand. Writing borrows the content, so the
//! same value is sent again when a request is retried.

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::http::error::{HttpError, Result};
use crate::protocol::http::request::RequestParams;

/// Destination of a body write.
pub type ContentSink = dyn AsyncWrite + Unpin + Send;

pub type WriteFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// A request body.
pub trait HttpContent: Send + Sync {
    fn content_type(&self) -> &str;

    /// Exact number of bytes `write_to` produces.
    fn content_length(&self) -> u64;

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a>;
}

fn write_bytes<'a>(data: &'a [u8], dest: &'a mut ContentSink) -> WriteFuture<'a> {
    Box::pin(async move { dest.write_all(data).await })
}

/// UTF-8 text body.
#[derive(Debug, Clone)]
pub struct StringContent {
    text: String,
    content_type: String,
}

impl StringContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            content_type: "text/plain".to_string(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl HttpContent for StringContent {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content_length(&self) -> u64 {
        self.text.len() as u64
    }

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a> {
        write_bytes(self.text.as_bytes(), dest)
    }
}

/// Raw bytes body.
#[derive(Debug, Clone)]
pub struct BytesContent {
    data: Bytes,
    content_type: String,
}

impl BytesContent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: "application/octet-stream".to_string(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

impl HttpContent for BytesContent {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a> {
        write_bytes(&self.data, dest)
    }
}

/// `application/x-www-form-urlencoded` body.
#[derive(Debug, Clone)]
pub struct FormUrlEncodedContent {
    encoded: String,
}

impl FormUrlEncodedContent {
    pub fn new(params: &RequestParams) -> Self {
        Self {
            encoded: params.to_query_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl HttpContent for FormUrlEncodedContent {
    fn content_type(&self) -> &str {
        "application/x-www-form-urlencoded"
    }

    fn content_length(&self) -> u64 {
        self.encoded.len() as u64
    }

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a> {
        write_bytes(self.encoded.as_bytes(), dest)
    }
}

/// Content type from a file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "htm" | "html" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "js" => "application/javascript",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// File body, streamed from disk. The length is fixed when the content is opened.
#[derive(Debug, Clone)]
pub struct FileContent {
    path: PathBuf,
    length: u64,
    content_type: String,
}

impl FileContent {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| HttpError::argument("path", format!("{}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(HttpError::argument(
                "path",
                format!("{} is not a file", path.display()),
            ));
        }
        Ok(Self {
            content_type: content_type_for_path(&path).to_string(),
            length: metadata.len(),
            path,
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

impl HttpContent for FileContent {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content_length(&self) -> u64 {
        self.length
    }

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a> {
        Box::pin(async move {
            let file = tokio::fs::File::open(&self.path).await?;
            let copied = tokio::io::copy(&mut file.take(self.length), dest).await?;
            if copied != self.length {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while being sent", self.path.display()),
                ));
            }
            Ok(())
        })
    }
}

struct Part {
    name: String,
    file_name: Option<String>,
    content: Box<dyn HttpContent>,
}

impl Part {
    fn header(&self, boundary: &str) -> String {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
            boundary,
            escape_quoted(&self.name)
        );
        if let Some(file_name) = &self.file_name {
            header.push_str(&format!(
                "; filename=\"{}\"\r\nContent-Type: {}",
                escape_quoted(file_name),
                self.content.content_type()
            ));
        }
        header.push_str("\r\n\r\n");
        header
    }
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

const BOUNDARY_LEN: usize = 16;

/// `multipart/form-data` body made of other contents.
pub struct MultipartContent {
    boundary: String,
    content_type: String,
    parts: Vec<Part>,
}

impl fmt::Debug for MultipartContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartContent")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.len())
            .finish()
    }
}

impl Default for MultipartContent {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartContent {
    /// New body with a random boundary.
    pub fn new() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(BOUNDARY_LEN)
            .map(char::from)
            .collect();
        Self::with_boundary_unchecked(format!("---------------{}", token))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Result<Self> {
        let boundary = boundary.into();
        if boundary.is_empty() || boundary.len() > 70 {
            return Err(HttpError::argument("boundary", "must be 1 to 70 characters"));
        }
        if boundary.bytes().any(|b| b == b'\r' || b == b'\n' || b == b'"') {
            return Err(HttpError::argument("boundary", "contains forbidden characters"));
        }
        Ok(Self::with_boundary_unchecked(boundary))
    }

    fn with_boundary_unchecked(boundary: String) -> Self {
        Self {
            content_type: format!("multipart/form-data; boundary={}", boundary),
            boundary,
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Add a form field.
    pub fn add(&mut self, name: impl Into<String>, content: impl HttpContent + 'static) -> &mut Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: None,
            content: Box::new(content),
        });
        self
    }

    /// Add a file field; its `Content-Type` comes from `content`.
    pub fn add_file(
        &mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl HttpContent + 'static,
    ) -> &mut Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: Some(file_name.into()),
            content: Box::new(content),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn footer(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }
}

impl HttpContent for MultipartContent {
    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn content_length(&self) -> u64 {
        let parts: u64 = self
            .parts
            .iter()
            .map(|p| p.header(&self.boundary).len() as u64 + p.content.content_length() + 2)
            .sum();
        parts + self.footer().len() as u64
    }

    fn write_to<'a>(&'a self, dest: &'a mut ContentSink) -> WriteFuture<'a> {
        Box::pin(async move {
            for part in &self.parts {
                dest.write_all(part.header(&self.boundary).as_bytes()).await?;
                part.content.write_to(&mut *dest).await?;
                dest.write_all(b"\r\n").await?;
            }
            dest.write_all(self.footer().as_bytes()).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(content: &dyn HttpContent) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        content.write_to(&mut out).await.unwrap();
        assert_eq!(out.len() as u64, content.content_length());
        out
    }

    #[tokio::test]
    async fn simple_contents() {
        let s = StringContent::new("привет").with_content_type("text/plain; charset=utf-8");
        assert_eq!(render(&s).await, "привет".as_bytes());
        assert_eq!(s.content_length(), 12);

        let b = BytesContent::new(vec![1u8, 2, 3]);
        assert_eq!(b.content_type(), "application/octet-stream");
        assert_eq!(render(&b).await, vec![1, 2, 3]);

        let params: RequestParams = [("name", "Jo Doe"), ("q", "a&b")].into_iter().collect();
        let f = FormUrlEncodedContent::new(&params);
        assert_eq!(render(&f).await, b"name=Jo%20Doe&q=a%26b");
    }

    #[tokio::test]
    async fn multipart_length_matches_output() {
        let mut m = MultipartContent::with_boundary("XyZ").unwrap();
        m.add("chatId", StringContent::new("7@c.us"));
        m.add_file(
            "body",
            "a\"b.png",
            BytesContent::new(vec![0u8; 10]).with_content_type("image/png"),
        );
        assert_eq!(m.content_type(), "multipart/form-data; boundary=XyZ");
        let out = render(&m).await;
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("--XyZ\r\nContent-Disposition: form-data; name=\"chatId\"\r\n\r\n7@c.us\r\n"));
        assert!(text.contains("filename=\"a\\\"b.png\"\r\nContent-Type: image/png\r\n\r\n"));
        assert!(text.ends_with("\r\n--XyZ--\r\n"));
    }

    #[test]
    fn random_boundaries_differ() {
        let a = MultipartContent::new();
        let b = MultipartContent::new();
        assert_ne!(a.boundary(), b.boundary());
        assert!(MultipartContent::with_boundary("").is_err());
    }

    #[tokio::test]
    async fn file_content_streams_from_disk() {
        let path = std::env::temp_dir().join(format!("tether-content-{}.json", std::process::id()));
        tokio::fs::write(&path, b"{\"ok\":true}").await.unwrap();
        let f = FileContent::open(&path).await.unwrap();
        assert_eq!(f.content_type(), "application/json");
        assert_eq!(render(&f).await, b"{\"ok\":true}");
        tokio::fs::remove_file(&path).await.unwrap();
        assert!(FileContent::open(&path).await.is_err());
    }
}
