//! # dockside protocol
//!
//! Wire-level pieces of container attach and exec sessions.
//!
//! ## Overview
//!
//! Attaching to a container, or starting an exec instance without detaching,
//! upgrades an HTTP request into a raw byte stream. When no TTY is allocated
//! the engine interleaves stdout and stderr on that stream using 8-byte frame
//! headers; with a TTY the bytes arrive unframed. This crate provides:
//!
//! - **Framing**: the frame codec and [`StreamKind`]
//! - **Demultiplexing**: async [`FrameReader`], [`OutputReader`] and [`copy_output`]
//! - **Messages**: Engine API request and response bodies
//!
//! ## Frame Layout
//!
//! ```text
//! ┌────────┬──────────────┬──────────────────┬─────────────┐
//! │ kind   │ reserved (3) │ length (u32, BE) │ payload ... │
//! └────────┴──────────────┴──────────────────┴─────────────┘
//!   1 = stdout, 2 = stderr
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use dockside_protocol::{Frame, FrameCodec, StreamKind};
//!
//! let codec = FrameCodec::new();
//! let bytes = codec.encode(&Frame::stderr(b"oops\n".to_vec())).unwrap();
//!
//! let (frame, consumed) = codec.decode(&bytes).unwrap();
//! assert_eq!(frame.kind, StreamKind::Stderr);
//! assert_eq!(consumed, bytes.len());
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame codec
//! - [`demux`]: Async stream demultiplexing
//! - [`messages`]: Engine API message definitions
//! - [`error`]: Error types

pub mod demux;
pub mod error;
pub mod framing;
pub mod messages;

pub use demux::{copy_output, CopyStats, FrameReader, OutputChunk, OutputReader, StreamMode};
pub use error::{ProtocolError, Result};
pub use framing::{Frame, FrameCodec, StreamKind, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
pub use messages::{
    AttachOptions, ContainerConfig, ContainerInspect, ContainerState, ErrorResponse, ExecConfig,
    ExecInspect, ExecProcessConfig, ExecStartOptions, IdResponse, RemoveOptions, SessionTarget,
    TtySize, WaitCondition, WaitExitError, WaitResponse,
};
