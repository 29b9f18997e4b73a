//! Connection takeover for raw response relay.
//!
//! hyper owns the inbound connection and always writes its own response once
//! a service returns. To relay the target's bytes verbatim the connection is
//! split: hyper reads and writes through [`TakeoverIo`], while the request
//! handler holds a [`ConnectionTakeover`] for the same socket. Once the
//! handler takes the connection over, it writes the raw response and shuts
//! the write side down; everything hyper writes afterwards is discarded.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

/// Capability to seize a connection and write a complete raw HTTP response.
#[async_trait]
pub trait RawResponseWriter: Send + Sync {
    /// Write `response` verbatim and close the connection for writing.
    ///
    /// The framework's own response path is bypassed from this point on.
    async fn write_raw(&self, response: &[u8]) -> io::Result<()>;
}

struct Shared<T> {
    writer: Mutex<WriteHalf<T>>,
    taken: AtomicBool,
}

/// The I/O handed to hyper.
pub struct TakeoverIo<T> {
    reader: ReadHalf<T>,
    shared: Arc<Shared<T>>,
}

/// Handle for taking over the connection behind a [`TakeoverIo`].
pub struct ConnectionTakeover<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ConnectionTakeover<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Split `io` into the hyper-facing half and a takeover handle.
pub fn takeover_pair<T>(io: T) -> (TakeoverIo<T>, ConnectionTakeover<T>)
where
    T: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(io);
    let shared = Arc::new(Shared {
        writer: Mutex::new(writer),
        taken: AtomicBool::new(false),
    });
    (
        TakeoverIo {
            reader,
            shared: Arc::clone(&shared),
        },
        ConnectionTakeover { shared },
    )
}

impl<T> ConnectionTakeover<T> {
    pub fn is_taken_over(&self) -> bool {
        self.shared.taken.load(Ordering::Acquire)
    }
}

impl<T: AsyncWrite> Shared<T> {
    fn poll_write(&self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let mut writer = self.writer.lock();
        Pin::new(&mut *writer).poll_write(cx, buf)
    }

    fn poll_flush(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut writer = self.writer.lock();
        Pin::new(&mut *writer).poll_flush(cx)
    }

    fn poll_shutdown(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut writer = self.writer.lock();
        Pin::new(&mut *writer).poll_shutdown(cx)
    }
}

#[async_trait]
impl<T> RawResponseWriter for ConnectionTakeover<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_raw(&self, response: &[u8]) -> io::Result<()> {
        if self.shared.taken.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "connection was already taken over",
            ));
        }

        let mut written = 0;
        while written < response.len() {
            let n = poll_fn(|cx| self.shared.poll_write(cx, &response[written..])).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += n;
        }
        poll_fn(|cx| self.shared.poll_flush(cx)).await?;
        poll_fn(|cx| self.shared.poll_shutdown(cx)).await
    }
}

impl<T: AsyncRead> AsyncRead for TakeoverIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite> AsyncWrite for TakeoverIo<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.shared.taken.load(Ordering::Acquire) {
            return Poll::Ready(Ok(buf.len()));
        }
        self.shared.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.shared.taken.load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }
        self.shared.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Already shut down by the takeover.
        if self.shared.taken.load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }
        self.shared.poll_shutdown(cx)
    }
}
