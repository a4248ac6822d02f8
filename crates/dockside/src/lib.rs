//! # dockside
//!
//! Interactive container sessions over the Engine API.
//!
//! ## Overview
//!
//! dockside attaches to running containers and runs processes inside them,
//! streaming their output and forwarding input over hijacked HTTP
//! connections. It provides:
//!
//! - **Attach Sessions**: Attach to a container with framing chosen from its TTY setting
//! - **Exec Lifecycle**: Create, start, resize and inspect exec instances
//! - **Wait/Kill Coordination**: Non-blocking container waits alongside kill and remove
//! - **Detach Handling**: Client-side detach key detection on stdin
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        EngineClient                          │
//! │    Connector          ExecLifecycle             Waiter       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                         Transport                            │
//! │        one HTTP/1.1 connection per request, 101 upgrade       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ hijack
//!                   ┌────────────▼────────────┐
//!                   │   HijackedConnection    │
//!                   └────────────┬────────────┘
//!                   ┌────────────▼────────────┐
//!                   │ StreamSession           │
//!                   │  OutputReader (demux)   │
//!                   │  HijackedWriter (stdin) │
//!                   └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dockside::{Config, EngineClient, ExecManager};
//! use dockside::protocol::{ExecConfig, ExecStartOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let client = EngineClient::from_config(&config.engine)?;
//!     let manager = ExecManager::new(client);
//!     let cancel = CancellationToken::new();
//!
//!     let mut exec = manager.create("web", &ExecConfig::new(["uname", "-a"])).await?;
//!     if let Some(mut session) = manager
//!         .start(&mut exec, ExecStartOptions::default(), &cancel)
//!         .await?
//!     {
//!         session
//!             .copy_to(&mut tokio::io::stdout(), &mut tokio::io::stderr())
//!             .await?;
//!         session.close().await;
//!     }
//!
//!     let code = manager.wait_for_exit(&mut exec, &cancel).await?;
//!     println!("exit code {code}");
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`transport`]: Engine endpoint and HTTP exchange
//! - [`hijack`]: Hijacked connections
//! - [`session`]: Stream sessions over a hijacked connection
//! - [`attach`]: Container attach
//! - [`detach`]: Detach key parsing and input forwarding
//! - [`exec`]: Exec instance lifecycle
//! - [`lifecycle`]: Container wait, kill and remove
//! - [`engine`]: The Engine API client
//! - [`error`]: Error types

pub mod attach;
pub mod config;
pub mod detach;
pub mod engine;
pub mod error;
pub mod exec;
pub mod hijack;
pub mod lifecycle;
pub mod session;
pub mod transport;

// Re-export protocol for convenience
pub use dockside_protocol as protocol;

pub use attach::{attach_query, attach_session, Connector};
pub use config::{Config, ConfigError};
pub use detach::{forward_input, DetachDetector, DetachKeys, InputOutcome, DEFAULT_DETACH_KEYS};
pub use engine::EngineClient;
pub use error::EngineError;
pub use exec::{ExecInstance, ExecLifecycle, ExecManager, ExecStart, ExecState, ResizeOutcome};
pub use hijack::{HijackedConnection, HijackedReader, HijackedWriter};
pub use lifecycle::{WaitHandle, Waiter};
pub use session::StreamSession;
pub use transport::{EngineHost, Transport};
