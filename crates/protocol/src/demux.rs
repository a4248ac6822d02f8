//! Async demultiplexing of attach/exec output.
//!
//! [`FrameReader`] turns a multiplexed byte source into [`Frame`]s.
//! [`OutputReader`] hides the framed/raw distinction behind one reader, and
//! [`copy_output`] routes a whole session into two sinks.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::framing::{Frame, FrameCodec, StreamKind};

/// Read size when pulling bytes from the underlying source.
const READ_CHUNK_SIZE: usize = 32 * 1024;

/// How the byte stream of a session is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// stdout/stderr interleaved with 8-byte frame headers (no TTY).
    Multiplexed,
    /// A single raw stream with no headers (TTY allocated).
    Raw,
}

impl StreamMode {
    /// Select the mode from the TTY flag recorded at create time.
    pub fn from_tty(tty: bool) -> Self {
        if tty {
            StreamMode::Raw
        } else {
            StreamMode::Multiplexed
        }
    }
}

/// Lazily reads frames from a multiplexed byte source.
///
/// Once the reader has returned `Ok(None)` or an error it is finished and
/// every later call returns `Ok(None)` without touching the source.
pub struct FrameReader<R> {
    inner: R,
    codec: FrameCodec,
    buffer: BytesMut,
    finished: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader with the default codec.
    pub fn new(inner: R) -> Self {
        Self::with_codec(inner, FrameCodec::new())
    }

    /// Create a reader with a specific codec.
    pub fn with_codec(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            finished: false,
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the source ends exactly on a frame boundary.
    /// A source that ends inside a header or payload is a framing error.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            match self.codec.try_decode(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    self.buffer.advance(consumed);
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Err(e);
                }
            }

            self.buffer.reserve(READ_CHUNK_SIZE);
            let read = match self.inner.read_buf(&mut self.buffer).await {
                Ok(read) => read,
                Err(e) => {
                    self.finished = true;
                    return Err(e.into());
                }
            };

            if read == 0 {
                self.finished = true;
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(self.codec.truncation_error(&self.buffer));
            }
        }
    }

    /// Whether the reader has reached a clean end or failed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Recover the underlying source. Buffered bytes are discarded.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// A chunk of session output tagged with the stream it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Stream the bytes belong to. Raw sessions always report stdout.
    pub kind: StreamKind,
    /// The output bytes.
    pub bytes: Vec<u8>,
}

impl From<Frame> for OutputChunk {
    fn from(frame: Frame) -> Self {
        Self {
            kind: frame.kind,
            bytes: frame.payload,
        }
    }
}

/// Reads session output in either stream mode.
pub enum OutputReader<R> {
    /// Demultiplexes framed output.
    Multiplexed(FrameReader<R>),
    /// Passes bytes through untouched.
    Raw {
        /// The underlying source.
        inner: R,
        /// Set once the source reported end of stream.
        finished: bool,
    },
}

impl<R> OutputReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader for the given mode.
    pub fn new(inner: R, mode: StreamMode) -> Self {
        match mode {
            StreamMode::Multiplexed => OutputReader::Multiplexed(FrameReader::new(inner)),
            StreamMode::Raw => OutputReader::Raw {
                inner,
                finished: false,
            },
        }
    }

    /// The mode this reader was built for.
    pub fn mode(&self) -> StreamMode {
        match self {
            OutputReader::Multiplexed(_) => StreamMode::Multiplexed,
            OutputReader::Raw { .. } => StreamMode::Raw,
        }
    }

    /// Read the next chunk of output, or `Ok(None)` at a clean end.
    pub async fn next_chunk(&mut self) -> Result<Option<OutputChunk>> {
        match self {
            OutputReader::Multiplexed(frames) => {
                Ok(frames.next_frame().await?.map(OutputChunk::from))
            }
            OutputReader::Raw { inner, finished } => {
                if *finished {
                    return Ok(None);
                }
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                let read = inner.read(&mut buf).await?;
                if read == 0 {
                    *finished = true;
                    return Ok(None);
                }
                buf.truncate(read);
                Ok(Some(OutputChunk {
                    kind: StreamKind::Stdout,
                    bytes: buf,
                }))
            }
        }
    }

    /// Recover the underlying source.
    pub fn into_inner(self) -> R {
        match self {
            OutputReader::Multiplexed(frames) => frames.into_inner(),
            OutputReader::Raw { inner, .. } => inner,
        }
    }
}

/// Bytes written to each sink by [`copy_output`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    /// Bytes routed to stdout.
    pub stdout: u64,
    /// Bytes routed to stderr.
    pub stderr: u64,
}

/// Copy all session output into `stdout` and `stderr` until the source ends.
///
/// Each chunk is flushed as it is written so interactive output is not held
/// back. A framing error stops the copy; bytes already routed stay written.
pub async fn copy_output<R, O, E>(
    reader: &mut OutputReader<R>,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<CopyStats>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut stats = CopyStats::default();

    while let Some(chunk) = reader.next_chunk().await? {
        let len = chunk.bytes.len() as u64;
        match chunk.kind {
            StreamKind::Stdout => {
                stdout.write_all(&chunk.bytes).await?;
                stdout.flush().await?;
                stats.stdout += len;
            }
            StreamKind::Stderr => {
                stderr.write_all(&chunk.bytes).await?;
                stderr.flush().await?;
                stats.stderr += len;
            }
        }
    }

    Ok(stats)
}
