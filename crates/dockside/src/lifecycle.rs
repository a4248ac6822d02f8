//! Container wait, kill and remove.
//!
//! A wait runs on its own long-lived request in a spawned task and hands its
//! single result back through a [`WaitHandle`]. Kill and remove are ordinary
//! one-shot requests; a wait already in flight observes the state change
//! they cause.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use dockside_protocol::{RemoveOptions, WaitCondition, WaitResponse};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;

/// Container lifecycle operations.
#[allow(async_fn_in_trait)]
pub trait Waiter: Send + Sync {
    /// Start waiting for `condition` and return at once.
    ///
    /// The returned handle resolves exactly once: with the engine's wait
    /// response, or with the error that ended the wait.
    fn wait(
        &self,
        container_id: &str,
        condition: WaitCondition,
        cancel: &CancellationToken,
    ) -> WaitHandle;

    /// Send a signal to the container's main process. `None` lets the engine
    /// pick its default (`SIGKILL`).
    async fn kill(&self, container_id: &str, signal: Option<&str>) -> Result<(), EngineError>;

    /// Remove the container.
    async fn remove(&self, container_id: &str, options: RemoveOptions) -> Result<(), EngineError>;
}

/// Pending result of a container wait.
///
/// Await it to get the result. Dropping it abandons the result but does not
/// stop the wait; cancel the token passed to [`Waiter::wait`] for that.
pub struct WaitHandle {
    container_id: String,
    rx: oneshot::Receiver<Result<WaitResponse, EngineError>>,
}

impl WaitHandle {
    /// Run `wait` in a new task and return a handle to its result.
    pub fn spawn<F>(container_id: impl Into<String>, wait: F) -> Self
    where
        F: Future<Output = Result<WaitResponse, EngineError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(wait.await);
        });

        Self {
            container_id: container_id.into(),
            rx,
        }
    }

    /// A handle that is already resolved.
    pub fn ready(
        container_id: impl Into<String>,
        result: Result<WaitResponse, EngineError>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);

        Self {
            container_id: container_id.into(),
            rx,
        }
    }

    /// The container being waited on.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }
}

impl Future for WaitHandle {
    type Output = Result<WaitResponse, EngineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                // Task dropped before sending: runtime shutdown or panic.
                tracing::debug!(
                    container_id = %this.container_id,
                    "Wait task ended without a result"
                );
                Poll::Ready(Err(EngineError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
