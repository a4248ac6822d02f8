//! Engine API request and response bodies.
//!
//! Field names follow the Engine API's JSON (mostly PascalCase). Response
//! types default every field so that newer engines adding fields, or older
//! ones omitting them, still decode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Which kind of server-side object a session talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionTarget {
    /// A container, addressed by ID or name.
    Container(String),
    /// An exec instance, addressed by ID.
    Exec(String),
}

impl SessionTarget {
    /// The opaque identifier of the target.
    pub fn id(&self) -> &str {
        match self {
            SessionTarget::Container(id) | SessionTarget::Exec(id) => id,
        }
    }
}

impl fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionTarget::Container(id) => write!(f, "container {id}"),
            SessionTarget::Exec(id) => write!(f, "exec {id}"),
        }
    }
}

/// Flags for attaching to a container.
///
/// These only choose query parameters. Whether the stream is framed depends
/// on the container's TTY setting, never on these flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachOptions {
    /// Keep the connection open and stream output.
    pub stream: bool,
    /// Forward stdin to the container.
    pub stdin: bool,
    /// Receive stdout.
    pub stdout: bool,
    /// Receive stderr.
    pub stderr: bool,
    /// Replay previous logs before live output.
    pub logs: bool,
    /// Key sequence the server recognizes as a detach request.
    pub detach_keys: Option<String>,
}

impl AttachOptions {
    /// Options for an interactive attach: stream stdin, stdout and stderr.
    pub fn interactive() -> Self {
        Self {
            stream: true,
            stdin: true,
            stdout: true,
            stderr: true,
            logs: false,
            detach_keys: None,
        }
    }
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtySize {
    /// Rows.
    pub height: u32,
    /// Columns.
    pub width: u32,
}

impl TtySize {
    /// Create a new size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { height, width }
    }
}

/// Process specification for `POST /containers/{id}/exec`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecConfig {
    /// Command and arguments.
    pub cmd: Vec<String>,
    /// Environment in `KEY=value` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Working directory inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// User to run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Run with extended privileges.
    #[serde(default)]
    pub privileged: bool,
    /// Allocate a pseudo-terminal.
    #[serde(default)]
    pub tty: bool,
    /// Initial terminal size as `[height, width]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_size: Option<[u32; 2]>,
    /// Attach stdin.
    #[serde(default)]
    pub attach_stdin: bool,
    /// Attach stdout.
    #[serde(default)]
    pub attach_stdout: bool,
    /// Attach stderr.
    #[serde(default)]
    pub attach_stderr: bool,
    /// Detach key override for this exec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detach_keys: Option<String>,
}

impl ExecConfig {
    /// Config for a command with stdout and stderr attached.
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            attach_stdout: true,
            attach_stderr: true,
            ..Default::default()
        }
    }
}

/// Body of `POST /exec/{id}/start`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStartOptions {
    /// Return as soon as the process is scheduled instead of attaching.
    pub detach: bool,
    /// Must match the TTY setting given at create time.
    pub tty: bool,
    /// Initial terminal size as `[height, width]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_size: Option<[u32; 2]>,
}

/// Response of `GET /exec/{id}/json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ExecInspect {
    /// Exec instance ID.
    #[serde(rename = "ID")]
    pub id: String,
    /// Container the exec belongs to.
    #[serde(rename = "ContainerID")]
    pub container_id: String,
    /// Whether the process is still running.
    pub running: bool,
    /// Exit status, present once the process has ended.
    pub exit_code: Option<i64>,
    /// Host PID of the process (0 before start).
    pub pid: i64,
    /// Whether stdin was opened.
    pub open_stdin: bool,
    /// Process details.
    pub process_config: ExecProcessConfig,
}

/// The `ProcessConfig` section of [`ExecInspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecProcessConfig {
    /// Whether a TTY was allocated.
    pub tty: bool,
    /// Executable.
    pub entrypoint: String,
    /// Arguments.
    pub arguments: Vec<String>,
}

/// Response of `GET /containers/{id}/json`, reduced to what sessions need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerInspect {
    /// Full container ID.
    pub id: String,
    /// Container name, with leading slash.
    pub name: String,
    /// Creation-time configuration.
    pub config: ContainerConfig,
    /// Runtime state.
    pub state: ContainerState,
}

impl ContainerInspect {
    /// Whether the container was created with a TTY.
    pub fn tty(&self) -> bool {
        self.config.tty
    }
}

/// The `Config` section of [`ContainerInspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerConfig {
    /// Whether a TTY was allocated.
    pub tty: bool,
    /// Whether stdin is kept open.
    pub open_stdin: bool,
    /// Image name.
    pub image: String,
}

/// The `State` section of [`ContainerInspect`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ContainerState {
    /// Status string such as `running` or `exited`.
    pub status: String,
    /// Whether the container is running.
    pub running: bool,
    /// Whether the container is paused.
    pub paused: bool,
    /// Exit code of the last run.
    pub exit_code: i64,
    /// Host PID of the main process.
    pub pid: i64,
}

/// State transition that completes a container wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitCondition {
    /// The container is not running (returns at once if already stopped).
    #[default]
    NotRunning,
    /// The container's next exit after the wait was registered.
    NextExit,
    /// The container has been removed.
    Removed,
}

impl WaitCondition {
    /// Query parameter value.
    pub fn as_str(self) -> &'static str {
        match self {
            WaitCondition::NotRunning => "not-running",
            WaitCondition::NextExit => "next-exit",
            WaitCondition::Removed => "removed",
        }
    }
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitCondition {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "not-running" => Ok(WaitCondition::NotRunning),
            "next-exit" => Ok(WaitCondition::NextExit),
            "removed" => Ok(WaitCondition::Removed),
            other => Err(ProtocolError::UnknownWaitCondition(other.to_string())),
        }
    }
}

/// Response of `POST /containers/{id}/wait`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WaitResponse {
    /// Exit status of the container.
    pub status_code: i64,
    /// Set when the engine could not determine the exit status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WaitExitError>,
}

/// Error detail inside a [`WaitResponse`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct WaitExitError {
    /// Error message.
    pub message: String,
}

/// Options for `DELETE /containers/{id}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// Kill the container first if it is running.
    pub force: bool,
    /// Remove anonymous volumes.
    pub remove_volumes: bool,
    /// Remove the legacy link rather than the container.
    pub remove_links: bool,
}

/// Body of any response that only carries an ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdResponse {
    /// The new object's ID.
    #[serde(rename = "Id")]
    pub id: String,
}

/// Error body returned by the engine on non-success status codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
}

impl ErrorResponse {
    /// Decode an error body, falling back to the raw text when it is not JSON.
    pub fn from_body(body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorResponse>(body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed,
            _ => Self {
                message: String::from_utf8_lossy(body).trim().to_string(),
            },
        }
    }
}
