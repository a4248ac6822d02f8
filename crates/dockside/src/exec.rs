//! Exec instance lifecycle.
//!
//! An exec instance moves through `Created -> Running -> Exited`, or ends in
//! `Failed` when starting it fails. The engine never pushes an exit event for
//! exec instances, so completion is observed by polling inspect.

use std::fmt;
use std::time::Duration;

use dockside_protocol::{ExecConfig, ExecInspect, ExecStartOptions, StreamMode, TtySize};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::hijack::HijackedConnection;
use crate::session::StreamSession;

/// Default interval between inspect calls in [`ExecManager::wait_for_exit`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a successful exec start produced.
pub enum ExecStart {
    /// The process was scheduled; nothing is attached.
    Detached,
    /// The start request was upgraded into a hijacked connection.
    Attached(HijackedConnection),
}

/// Engine operations on exec instances.
#[allow(async_fn_in_trait)]
pub trait ExecLifecycle: Send + Sync {
    /// Create an exec instance in a running container and return its ID.
    async fn exec_create(
        &self,
        container_id: &str,
        config: &ExecConfig,
    ) -> Result<String, EngineError>;

    /// Start an exec instance, attaching unless `options.detach` is set.
    async fn exec_start(
        &self,
        exec_id: &str,
        options: &ExecStartOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecStart, EngineError>;

    /// Resize the exec instance's TTY.
    async fn exec_resize(&self, exec_id: &str, size: TtySize) -> Result<(), EngineError>;

    /// Fetch the exec instance's current state.
    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect, EngineError>;
}

/// Lifecycle state of an exec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Created but not started.
    Created,
    /// Started and not yet observed to exit.
    Running,
    /// The process ended with this status.
    Exited {
        /// Literal exit status reported by the engine.
        exit_code: i64,
    },
    /// Starting the instance failed.
    Failed,
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecState::Created => f.write_str("created"),
            ExecState::Running => f.write_str("running"),
            ExecState::Exited { exit_code } => write!(f, "exited ({exit_code})"),
            ExecState::Failed => f.write_str("failed"),
        }
    }
}

/// Client-side view of one exec instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecInstance {
    id: String,
    container_id: String,
    tty: bool,
    state: ExecState,
}

impl ExecInstance {
    /// Track an exec instance that already exists on the engine.
    pub fn existing(id: impl Into<String>, container_id: impl Into<String>, tty: bool) -> Self {
        Self {
            id: id.into(),
            container_id: container_id.into(),
            tty,
            state: ExecState::Running,
        }
    }

    /// Exec instance ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Container the instance runs in.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Whether a TTY was requested at create time.
    pub fn tty(&self) -> bool {
        self.tty
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Exit status, once the process is known to have ended.
    pub fn exit_code(&self) -> Option<i64> {
        match self.state {
            ExecState::Exited { exit_code } => Some(exit_code),
            _ => None,
        }
    }

    fn apply(&mut self, inspect: &ExecInspect) {
        if inspect.running {
            self.state = ExecState::Running;
        } else if let Some(exit_code) = inspect.exit_code {
            self.state = ExecState::Exited { exit_code };
        }
    }
}

/// Outcome of [`ExecManager::resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The engine applied the new size.
    Applied,
    /// The process had already exited; nothing to resize.
    ProcessExited,
}

/// Drives exec instances through their lifecycle.
pub struct ExecManager<E> {
    lifecycle: E,
    poll_interval: Duration,
}

impl<E: ExecLifecycle> ExecManager<E> {
    /// Create a manager polling at [`DEFAULT_POLL_INTERVAL`].
    pub fn new(lifecycle: E) -> Self {
        Self {
            lifecycle,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the interval between inspect calls while waiting for exit.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The underlying engine operations.
    pub fn lifecycle(&self) -> &E {
        &self.lifecycle
    }

    /// Create an exec instance. The engine rejects containers that are not
    /// running.
    pub async fn create(
        &self,
        container_id: &str,
        config: &ExecConfig,
    ) -> Result<ExecInstance, EngineError> {
        let id = self.lifecycle.exec_create(container_id, config).await?;
        tracing::info!(
            container_id = %container_id,
            exec_id = %id,
            cmd = ?config.cmd,
            "Exec instance created"
        );

        Ok(ExecInstance {
            id,
            container_id: container_id.to_string(),
            tty: config.tty,
            state: ExecState::Created,
        })
    }

    /// Start an exec instance.
    ///
    /// A detached start returns `None` once the process is scheduled.
    /// Otherwise the returned session carries the process's output, framed
    /// according to the TTY setting given at create time. Starting an
    /// instance twice is rejected by the engine and that error is returned
    /// as is.
    pub async fn start(
        &self,
        exec: &mut ExecInstance,
        options: ExecStartOptions,
        cancel: &CancellationToken,
    ) -> Result<Option<StreamSession>, EngineError> {
        if options.tty != exec.tty {
            tracing::debug!(exec_id = %exec.id, "Using create-time tty flag for start");
        }
        let options = ExecStartOptions {
            tty: exec.tty,
            ..options
        };

        match self.lifecycle.exec_start(&exec.id, &options, cancel).await {
            Ok(ExecStart::Detached) => {
                exec.state = ExecState::Running;
                tracing::info!(exec_id = %exec.id, "Exec instance started detached");
                Ok(None)
            }
            Ok(ExecStart::Attached(conn)) => {
                exec.state = ExecState::Running;
                tracing::info!(exec_id = %exec.id, "Exec instance started attached");
                Ok(Some(StreamSession::new(conn, StreamMode::from_tty(exec.tty))))
            }
            Err(e) => {
                if exec.state == ExecState::Created {
                    exec.state = ExecState::Failed;
                }
                tracing::debug!(exec_id = %exec.id, error = %e, "Exec start failed");
                Err(e)
            }
        }
    }

    /// Resize the exec instance's TTY.
    ///
    /// A failure caused by the process having already exited is reported as
    /// [`ResizeOutcome::ProcessExited`] instead of an error.
    pub async fn resize(
        &self,
        exec: &mut ExecInstance,
        size: TtySize,
    ) -> Result<ResizeOutcome, EngineError> {
        if matches!(exec.state, ExecState::Created | ExecState::Failed) {
            return Err(EngineError::InvalidState(format!(
                "cannot resize exec {} while {}",
                exec.id, exec.state
            )));
        }
        if let ExecState::Exited { .. } = exec.state {
            return Ok(ResizeOutcome::ProcessExited);
        }

        let err = match self.lifecycle.exec_resize(&exec.id, size).await {
            Ok(()) => return Ok(ResizeOutcome::Applied),
            Err(err @ (EngineError::NotFound { .. } | EngineError::Rejected { .. })) => err,
            Err(err) => return Err(err),
        };

        match self.lifecycle.exec_inspect(&exec.id).await {
            Ok(inspect) if !inspect.running => {
                exec.apply(&inspect);
                tracing::warn!(exec_id = %exec.id, error = %err, "Resize after exec exited");
                Ok(ResizeOutcome::ProcessExited)
            }
            Err(EngineError::NotFound { .. }) => {
                tracing::warn!(exec_id = %exec.id, error = %err, "Resize after exec removed");
                Ok(ResizeOutcome::ProcessExited)
            }
            _ => Err(err),
        }
    }

    /// Inspect the exec instance and update its tracked state.
    pub async fn inspect(&self, exec: &mut ExecInstance) -> Result<ExecInspect, EngineError> {
        let inspect = self.lifecycle.exec_inspect(&exec.id).await?;
        let before = exec.state;
        exec.apply(&inspect);
        if exec.state != before {
            tracing::debug!(exec_id = %exec.id, state = %exec.state, "Exec state changed");
        }
        Ok(inspect)
    }

    /// Poll until the process exits and return its exit status.
    pub async fn wait_for_exit(
        &self,
        exec: &mut ExecInstance,
        cancel: &CancellationToken,
    ) -> Result<i64, EngineError> {
        if matches!(exec.state, ExecState::Created | ExecState::Failed) {
            return Err(EngineError::InvalidState(format!(
                "exec {} is {} and will never exit",
                exec.id, exec.state
            )));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            self.inspect(exec).await?;
            if let ExecState::Exited { exit_code } = exec.state {
                tracing::info!(exec_id = %exec.id, exit_code, "Exec instance exited");
                return Ok(exit_code);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
