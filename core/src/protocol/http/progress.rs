/*
 * progress.rs
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

//! Byte accounting: a stream wrapper that reports every read and write to
//! optional callbacks, and the progress events built on top of it.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Invoked with the number of bytes moved by one read or write.
pub type BytesCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Wraps a duplex stream and counts the bytes passing through it.
///
/// Data is never buffered or altered. When a write chunk size is set, a
/// single `poll_write` accepts at most that many bytes, so `write_all` of
/// `S` bytes turns into `ceil(S / chunk)` writes and as many callbacks.
pub struct CountingStream<S> {
    inner: S,
    on_read: Option<BytesCallback>,
    on_write: Option<BytesCallback>,
    write_chunk: Option<usize>,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            on_read: None,
            on_write: None,
            write_chunk: None,
        }
    }

    pub fn set_read_callback(&mut self, callback: Option<BytesCallback>) {
        self.on_read = callback;
    }

    pub fn set_write_callback(&mut self, callback: Option<BytesCallback>) {
        self.on_write = callback;
    }

    /// Largest slice handed to the inner stream per write. `None` or zero removes the cap.
    pub fn set_write_chunk_size(&mut self, size: Option<usize>) {
        self.write_chunk = size.filter(|n| *n > 0);
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                if let Some(callback) = &this.on_read {
                    callback(n);
                }
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let limit = this.write_chunk.map_or(buf.len(), |chunk| chunk.min(buf.len()));
        let poll = Pin::new(&mut this.inner).poll_write(cx, &buf[..limit]);
        if let Poll::Ready(Ok(n)) = &poll {
            if *n > 0 {
                if let Some(callback) = &this.on_write {
                    callback(*n);
                }
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Upload or download progress of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Bytes moved so far, request line and headers included.
    pub bytes_transferred: u64,
    /// Expected total, when known.
    pub total_bytes: Option<u64>,
}

impl ProgressEvent {
    /// Completion in percent, when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.bytes_transferred as f64 * 100.0 / total as f64),
            None => None,
        }
    }
}

/// Progress handler registered on a client.
pub type ProgressHandler = Box<dyn FnMut(ProgressEvent) + Send>;

pub(crate) type SharedProgress = Arc<Mutex<ProgressHandler>>;

/// Running total for one transfer, feeding a shared handler.
#[derive(Clone)]
pub(crate) struct ProgressCounter {
    handler: SharedProgress,
    total: Option<u64>,
    transferred: Arc<AtomicU64>,
}

impl ProgressCounter {
    pub(crate) fn new(handler: SharedProgress, total: Option<u64>, start: u64) -> Self {
        Self {
            handler,
            total,
            transferred: Arc::new(AtomicU64::new(start)),
        }
    }

    pub(crate) fn advance(&self, n: u64) {
        let so_far = self.transferred.fetch_add(n, Ordering::Relaxed) + n;
        self.report(so_far);
    }

    /// Report the current total without moving it.
    pub(crate) fn emit(&self) {
        self.report(self.transferred.load(Ordering::Relaxed));
    }

    fn report(&self, bytes_transferred: u64) {
        let event = ProgressEvent {
            bytes_transferred,
            total_bytes: self.total,
        };
        // A handler that panicked earlier poisons the lock; keep reporting anyway.
        let mut handler = match self.handler.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (*handler)(event);
    }

    pub(crate) fn callback(&self) -> BytesCallback {
        let counter = self.clone();
        Arc::new(move |n| counter.advance(n as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn recorder() -> (SharedProgress, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: ProgressHandler = Box::new(move |e| sink.lock().unwrap().push(e));
        (Arc::new(Mutex::new(handler)), events)
    }

    #[tokio::test]
    async fn chunked_writes_fire_once_per_chunk() {
        let (handler, events) = recorder();
        let counter = ProgressCounter::new(handler, Some(20_000), 0);
        let mut stream = CountingStream::new(Vec::new());
        stream.set_write_callback(Some(counter.callback()));
        stream.set_write_chunk_size(Some(8192));
        stream.write_all(&vec![7u8; 20_000]).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].bytes_transferred, 8192);
        assert_eq!(events[2].bytes_transferred, 20_000);
        assert_eq!(events[2].percentage(), Some(100.0));
        assert_eq!(stream.get_ref().len(), 20_000);
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk() {
        let calls = Arc::new(AtomicU64::new(0));
        let seen = calls.clone();
        let mut stream = CountingStream::new(Vec::new());
        stream.set_write_callback(Some(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        })));
        stream.set_write_chunk_size(Some(100));
        stream.write_all(&[0u8; 300]).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn reads_are_counted_without_altering_data() {
        let total = Arc::new(AtomicU64::new(0));
        let seen = total.clone();
        let data: &[u8] = b"hello, world";
        let mut stream = CountingStream::new(data);
        stream.set_read_callback(Some(Arc::new(move |n| {
            seen.fetch_add(n as u64, Ordering::Relaxed);
        })));
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello, world");
        assert_eq!(total.load(Ordering::Relaxed), 12);
    }

    #[tokio::test]
    async fn no_callback_no_chunking() {
        let mut stream = CountingStream::new(Vec::new());
        stream.write_all(b"abc").await.unwrap();
        assert_eq!(stream.into_inner(), b"abc");
    }

    #[test]
    fn unknown_total_has_no_percentage() {
        let e = ProgressEvent {
            bytes_transferred: 10,
            total_bytes: None,
        };
        assert_eq!(e.percentage(), None);
    }
}
