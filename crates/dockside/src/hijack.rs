//! Hijacked connections.
//!
//! A hijacked connection is the raw socket left over after the engine
//! answered an attach or exec-start request with `101 Switching Protocols`.
//! It is owned exclusively by one session. Closing is explicit and
//! idempotent, and dropping the connection closes it too, so early returns
//! and panics in a read loop still release the socket.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use dockside_protocol::SessionTarget;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};

/// Any bidirectional byte stream a session can run over.
pub trait RawStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed raw stream, as produced by the engine transport.
pub type BoxedStream = Box<dyn RawStream>;

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "hijacked connection is closed")
}

/// A raw, caller-owned connection to a container or exec instance.
pub struct HijackedConnection {
    stream: Option<BoxedStream>,
    target: SessionTarget,
}

impl fmt::Debug for HijackedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackedConnection")
            .field("target", &self.target)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl HijackedConnection {
    /// Wrap an upgraded stream.
    pub fn new(stream: BoxedStream, target: SessionTarget) -> Self {
        Self {
            stream: Some(stream),
            target,
        }
    }

    /// The container or exec instance this connection talks to.
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Half-close the write side, signalling end of stdin.
    ///
    /// Output can still be read afterwards.
    pub async fn close_write(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }

    /// Close the connection.
    ///
    /// Safe to call any number of times; only the first call does anything.
    /// Errors while shutting down are logged and swallowed, since the remote
    /// side may already be gone.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(target_id = %self.target, error = %e, "Shutdown on close failed");
            }
            tracing::debug!(target_id = %self.target, "Hijacked connection closed");
        }
    }

    /// Split into halves that can be used from two tasks at once.
    ///
    /// The socket is released when both halves are closed or dropped.
    pub fn into_split(mut self) -> (HijackedReader, HijackedWriter) {
        match self.stream.take() {
            Some(stream) => {
                let (read_half, write_half) = tokio::io::split(stream);
                (
                    HijackedReader {
                        inner: Some(read_half),
                    },
                    HijackedWriter {
                        inner: Some(write_half),
                        target: self.target,
                    },
                )
            }
            None => (
                HijackedReader::closed(),
                HijackedWriter {
                    inner: None,
                    target: self.target,
                },
            ),
        }
    }
}

impl AsyncRead for HijackedConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for HijackedConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Read half of a split [`HijackedConnection`].
pub struct HijackedReader {
    inner: Option<ReadHalf<BoxedStream>>,
}

impl HijackedReader {
    /// A reader that is already at end of stream.
    pub fn closed() -> Self {
        Self { inner: None }
    }

    /// Stop reading and release this half. Idempotent.
    pub fn close(&mut self) {
        self.inner = None;
    }
}

impl AsyncRead for HijackedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Write half of a split [`HijackedConnection`].
pub struct HijackedWriter {
    inner: Option<WriteHalf<BoxedStream>>,
    target: SessionTarget,
}

impl HijackedWriter {
    /// The container or exec instance this writer feeds.
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Half-close the socket and release this half. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut half) = self.inner.take() {
            if let Err(e) = half.shutdown().await {
                tracing::debug!(target_id = %self.target, error = %e, "Shutdown on close failed");
            }
        }
    }
}

impl AsyncWrite for HijackedWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_write(cx, buf),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().inner.as_mut() {
            Some(half) => Pin::new(half).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
