/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length,
//! chunked, or read-until-close).

use bytes::Buf;
use bytes::BytesMut;
use std::io;

/// Longest status, header, chunk-size or trailer line accepted.
const MAX_LINE: usize = 16 * 1024;

/// Callback for HTTP/1.1 response events. The connection implements this to
/// collect the head and forward body bytes.
pub trait H1ResponseHandler {
    fn status(&mut self, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn trailer(&mut self, _name: &str, _value: &str) {}
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// No response in progress (previous one fully consumed).
    Idle,
    StatusLine,
    Headers,
    /// Headers done; the connection must call `set_body_mode()`.
    HeadersComplete,
    Body,
    UntilClose,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    ChunkTrailer,
}

/// How the body of the current response is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// No body (HEAD, 1xx, 204, 304, Content-Length: 0).
    Empty,
    Length(u64),
    Chunked,
    /// No length information: the body ends when the server closes.
    UntilClose,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// Push parser for one HTTP/1.1 response at a time. Feed bytes via `receive`;
/// the handler is invoked as complete tokens are parsed.
#[derive(Debug)]
pub struct ResponseParser {
    state: ParseState,
    /// Body bytes still expected (Content-Length) or left in the current chunk.
    remaining: u64,
    /// Bytes consumed by the status line and headers.
    head_bytes: usize,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            remaining: 0,
            head_bytes: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn head_bytes(&self) -> usize {
        self.head_bytes
    }

    /// True while a response body is still on the wire.
    pub fn body_pending(&self) -> bool {
        !matches!(
            self.state,
            ParseState::Idle | ParseState::StatusLine | ParseState::Headers
        )
    }

    /// Prepare for the next response head.
    pub fn reset(&mut self) {
        self.state = ParseState::StatusLine;
        self.remaining = 0;
        self.head_bytes = 0;
    }

    /// Find CRLF in buf; return number of bytes to the start of CRLF, or None if not found.
    fn find_crlf(buf: &[u8]) -> Option<usize> {
        buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Split one line (without CRLF) off the front of `buf`.
    fn take_line(buf: &mut BytesMut) -> io::Result<Option<(BytesMut, usize)>> {
        match Self::find_crlf(buf) {
            Some(n) if n > MAX_LINE => Err(invalid("line too long")),
            Some(n) => {
                let mut line = buf.split_to(n + 2);
                line.truncate(n);
                Ok(Some((line, n + 2)))
            }
            None if buf.len() > MAX_LINE => Err(invalid("line too long")),
            None => Ok(None),
        }
    }

    fn split_header(line: &str) -> Option<(&str, &str)> {
        let colon = line.find(':')?;
        Some((line[..colon].trim(), line[colon + 1..].trim()))
    }

    /// Consume and parse as much as possible from buf. Partial data remains in buf.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> io::Result<()> {
        loop {
            match self.state {
                ParseState::Idle | ParseState::HeadersComplete => return Ok(()),
                ParseState::StatusLine => {
                    let Some((line, consumed)) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    self.head_bytes += consumed;
                    let line = std::str::from_utf8(&line)
                        .map_err(|_| invalid("invalid status line UTF-8"))?;
                    // HTTP/1.1 200 OK or HTTP/1.1 200
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or_default();
                    if !version.starts_with("HTTP/") {
                        return Err(invalid("invalid status line"));
                    }
                    let code = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .filter(|c| (100..1000).contains(c))
                        .ok_or_else(|| invalid("invalid status code"))?;
                    handler.status(code, parts.next().filter(|r| !r.is_empty()));
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let Some((line, consumed)) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    self.head_bytes += consumed;
                    if line.is_empty() {
                        self.state = ParseState::HeadersComplete;
                        return Ok(());
                    }
                    let line =
                        std::str::from_utf8(&line).map_err(|_| invalid("invalid header UTF-8"))?;
                    if let Some((name, value)) = Self::split_header(line) {
                        handler.header(name, value);
                    }
                }
                ParseState::Body => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let to_read = self.remaining.min(buf.len() as u64) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        self.state = ParseState::Idle;
                        handler.complete();
                    }
                }
                ParseState::UntilClose => {
                    if !buf.is_empty() {
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                    }
                    // Only `finish()` on connection close ends this body.
                    return Ok(());
                }
                ParseState::ChunkSize => {
                    let Some((line, _)) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    let line =
                        std::str::from_utf8(&line).map_err(|_| invalid("invalid chunk size"))?;
                    let hex = line.split(';').next().unwrap_or(line).trim();
                    self.remaining =
                        u64::from_str_radix(hex, 16).map_err(|_| invalid("invalid chunk size"))?;
                    self.state = if self.remaining == 0 {
                        ParseState::ChunkTrailer
                    } else {
                        ParseState::ChunkData
                    };
                }
                ParseState::ChunkData => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let to_read = self.remaining.min(buf.len() as u64) as usize;
                    let chunk = buf.split_to(to_read);
                    handler.body_chunk(&chunk);
                    self.remaining -= to_read as u64;
                    if self.remaining == 0 {
                        self.state = ParseState::ChunkDataEnd;
                    }
                }
                ParseState::ChunkDataEnd => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(invalid("missing CRLF after chunk"));
                    }
                    buf.advance(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::ChunkTrailer => {
                    let Some((line, _)) = Self::take_line(buf)? else {
                        return Ok(());
                    };
                    if line.is_empty() {
                        self.state = ParseState::Idle;
                        handler.complete();
                    } else {
                        let line =
                            std::str::from_utf8(&line).map_err(|_| invalid("invalid trailer"))?;
                        if let Some((name, value)) = Self::split_header(line) {
                            handler.trailer(name, value);
                        }
                    }
                }
            }
        }
    }

    /// Called by the connection after headers are received (state HeadersComplete).
    pub fn set_body_mode(&mut self, mode: BodyMode) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        self.state = match mode {
            BodyMode::Empty | BodyMode::Length(0) => ParseState::Idle,
            BodyMode::Length(n) => {
                self.remaining = n;
                ParseState::Body
            }
            BodyMode::Chunked => ParseState::ChunkSize,
            BodyMode::UntilClose => ParseState::UntilClose,
        };
    }

    /// The peer closed the connection. Completes a read-until-close body;
    /// anywhere else the message was truncated.
    pub fn finish<H: H1ResponseHandler>(&mut self, handler: &mut H) -> io::Result<()> {
        match self.state {
            ParseState::Idle => Ok(()),
            ParseState::UntilClose => {
                self.state = ParseState::Idle;
                handler.complete();
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the response was complete",
            )),
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
