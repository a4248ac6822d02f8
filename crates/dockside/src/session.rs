//! Stream sessions over a hijacked connection.
//!
//! A [`StreamSession`] is what attach and exec-start hand back: the
//! connection's read side wrapped in an [`OutputReader`] for the selected
//! [`StreamMode`], and its write side for stdin.

use std::fmt;

use dockside_protocol::{
    copy_output, CopyStats, OutputChunk, OutputReader, SessionTarget, StreamMode,
};
use tokio::io::AsyncWrite;

use crate::error::EngineError;
use crate::hijack::{HijackedConnection, HijackedReader, HijackedWriter};

/// An established attach or exec session.
pub struct StreamSession {
    target: SessionTarget,
    mode: StreamMode,
    output: Option<OutputReader<HijackedReader>>,
    input: HijackedWriter,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("target", &self.target)
            .field("mode", &self.mode)
            .field("output_closed", &self.output.is_none())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Wrap a hijacked connection, demultiplexing output according to `mode`.
    pub fn new(conn: HijackedConnection, mode: StreamMode) -> Self {
        let target = conn.target().clone();
        let (reader, writer) = conn.into_split();
        tracing::debug!(target_id = %target, ?mode, "Session established");

        Self {
            target,
            mode,
            output: Some(OutputReader::new(reader, mode)),
            input: writer,
        }
    }

    /// The container or exec instance behind this session.
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// How output is framed.
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Read the next output chunk.
    ///
    /// Returns `Ok(None)` once the remote side ends the stream or after the
    /// session was closed locally. A malformed stream is an error, distinct
    /// from that clean end.
    pub async fn next_output(&mut self) -> Result<Option<OutputChunk>, EngineError> {
        match self.output.as_mut() {
            Some(output) => Ok(output.next_chunk().await?),
            None => Ok(None),
        }
    }

    /// Writer for the session's stdin.
    pub fn input(&mut self) -> &mut HijackedWriter {
        &mut self.input
    }

    /// Signal end of stdin while output keeps flowing.
    pub async fn close_input(&mut self) {
        self.input.close().await;
    }

    /// Copy all remaining output into `stdout` and `stderr`.
    pub async fn copy_to<O, E>(
        &mut self,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<CopyStats, EngineError>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        match self.output.as_mut() {
            Some(output) => Ok(copy_output(output, stdout, stderr).await?),
            None => Ok(CopyStats::default()),
        }
    }

    /// Close the session.
    ///
    /// Closing before the remote side finished is not an error, and closing
    /// twice does nothing.
    pub async fn close(&mut self) {
        self.input.close().await;
        if self.output.take().is_some() {
            tracing::debug!(target_id = %self.target, "Session closed");
        }
    }

    /// Split into the output reader and stdin writer for use from two tasks.
    pub fn into_parts(self) -> (OutputReader<HijackedReader>, HijackedWriter) {
        let output = self
            .output
            .unwrap_or_else(|| OutputReader::new(HijackedReader::closed(), self.mode));
        (output, self.input)
    }
}
