//! Engine API client.
//!
//! [`EngineClient`] implements [`Connector`], [`ExecLifecycle`] and
//! [`Waiter`] on top of a [`Transport`]. It is cheap to clone; clones share
//! the transport settings.

use std::sync::Arc;

use bytes::Bytes;
use dockside_protocol::{
    AttachOptions, ContainerInspect, ExecConfig, ExecInspect, ExecStartOptions, IdResponse,
    RemoveOptions, SessionTarget, TtySize, WaitCondition, WaitResponse,
};
use hyper::Method;
use tokio_util::sync::CancellationToken;

use crate::attach::{attach_query, Connector};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::exec::{ExecLifecycle, ExecStart};
use crate::hijack::HijackedConnection;
use crate::lifecycle::{WaitHandle, Waiter};
use crate::transport::Transport;

/// Trim an identifier and reject it if nothing is left.
pub fn validate_id<'a>(kind: &str, id: &'a str) -> Result<&'a str, EngineError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(EngineError::InvalidArgument(format!("{kind} id must not be empty")));
    }
    Ok(id)
}

fn resize_query(size: TtySize) -> [(&'static str, String); 2] {
    [("h", size.height.to_string()), ("w", size.width.to_string())]
}

/// Client for the engine's container and exec endpoints.
#[derive(Debug, Clone)]
pub struct EngineClient {
    transport: Arc<Transport>,
}

impl EngineClient {
    /// Create a client over `transport`.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Create a client from the `[engine]` config section.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::new(Transport::from_config(config)?))
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    async fn post_empty(&self, path: &str, query: &[(&str, String)]) -> Result<(), EngineError> {
        self.transport.request(Method::POST, path, query, None).await?;
        Ok(())
    }
}

impl Connector for EngineClient {
    async fn inspect_container(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerInspect, EngineError> {
        let id = validate_id("container", container_id)?;
        let path = format!("/containers/{id}/json");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.transport.request_json(Method::GET, &path, &[], None) => result,
        }
    }

    async fn attach(
        &self,
        container_id: &str,
        options: &AttachOptions,
        cancel: &CancellationToken,
    ) -> Result<HijackedConnection, EngineError> {
        let id = validate_id("container", container_id)?;
        let path = format!("/containers/{id}/attach");
        let query = attach_query(options);

        tracing::debug!(container_id = %id, ?options, "Attaching to container");
        self.transport
            .hijack(
                Method::POST,
                &path,
                &query,
                None,
                SessionTarget::Container(id.to_string()),
                cancel,
            )
            .await
    }

    async fn resize_container(&self, container_id: &str, size: TtySize) -> Result<(), EngineError> {
        let id = validate_id("container", container_id)?;
        tracing::debug!(
            container_id = %id,
            width = size.width,
            height = size.height,
            "Resizing container tty"
        );
        self.post_empty(&format!("/containers/{id}/resize"), &resize_query(size))
            .await
    }
}

impl ExecLifecycle for EngineClient {
    async fn exec_create(
        &self,
        container_id: &str,
        config: &ExecConfig,
    ) -> Result<String, EngineError> {
        let id = validate_id("container", container_id)?;
        if config.cmd.is_empty() {
            return Err(EngineError::InvalidArgument(
                "exec command must not be empty".to_string(),
            ));
        }

        let body = Bytes::from(serde_json::to_vec(config)?);
        let created: IdResponse = self
            .transport
            .request_json(Method::POST, &format!("/containers/{id}/exec"), &[], Some(body))
            .await?;
        Ok(created.id)
    }

    async fn exec_start(
        &self,
        exec_id: &str,
        options: &ExecStartOptions,
        cancel: &CancellationToken,
    ) -> Result<ExecStart, EngineError> {
        let id = validate_id("exec", exec_id)?;
        let path = format!("/exec/{id}/start");
        let body = Bytes::from(serde_json::to_vec(options)?);

        if options.detach {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.transport.request(Method::POST, &path, &[], Some(body)) => {
                    result?;
                }
            }
            return Ok(ExecStart::Detached);
        }

        let conn = self
            .transport
            .hijack(
                Method::POST,
                &path,
                &[],
                Some(body),
                SessionTarget::Exec(id.to_string()),
                cancel,
            )
            .await?;
        Ok(ExecStart::Attached(conn))
    }

    async fn exec_resize(&self, exec_id: &str, size: TtySize) -> Result<(), EngineError> {
        let id = validate_id("exec", exec_id)?;
        self.post_empty(&format!("/exec/{id}/resize"), &resize_query(size))
            .await
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<ExecInspect, EngineError> {
        let id = validate_id("exec", exec_id)?;
        self.transport
            .request_json(Method::GET, &format!("/exec/{id}/json"), &[], None)
            .await
    }
}

impl Waiter for EngineClient {
    fn wait(
        &self,
        container_id: &str,
        condition: WaitCondition,
        cancel: &CancellationToken,
    ) -> WaitHandle {
        let id = match validate_id("container", container_id) {
            Ok(id) => id.to_string(),
            Err(e) => return WaitHandle::ready(container_id, Err(e)),
        };

        let transport = Arc::clone(&self.transport);
        let cancel = cancel.clone();
        let handle_id = id.clone();

        WaitHandle::spawn(handle_id, async move {
            let path = format!("/containers/{id}/wait");
            let query = [("condition", condition.as_str().to_string())];
            tracing::debug!(container_id = %id, %condition, "Waiting for container");

            let body = transport
                .request_cancellable(Method::POST, &path, &query, None, &cancel)
                .await?;
            let response: WaitResponse = serde_json::from_slice(&body)?;

            tracing::info!(
                container_id = %id,
                status_code = response.status_code,
                "Container wait finished"
            );
            Ok(response)
        })
    }

    async fn kill(&self, container_id: &str, signal: Option<&str>) -> Result<(), EngineError> {
        let id = validate_id("container", container_id)?;
        let mut query = Vec::new();
        if let Some(signal) = signal.map(str::trim).filter(|s| !s.is_empty()) {
            query.push(("signal", signal.to_string()));
        }

        self.post_empty(&format!("/containers/{id}/kill"), &query).await?;
        tracing::info!(
            container_id = %id,
            signal = signal.unwrap_or("default"),
            "Container killed"
        );
        Ok(())
    }

    async fn remove(&self, container_id: &str, options: RemoveOptions) -> Result<(), EngineError> {
        let id = validate_id("container", container_id)?;
        let flags = [
            ("force", options.force),
            ("v", options.remove_volumes),
            ("link", options.remove_links),
        ];
        let query: Vec<(&str, String)> = flags
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(name, _)| (name, "1".to_string()))
            .collect();

        self.transport
            .request(Method::DELETE, &format!("/containers/{id}"), &query, None)
            .await?;
        tracing::info!(container_id = %id, "Container removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EngineHost;
    use std::path::PathBuf;

    fn client() -> EngineClient {
        EngineClient::new(Transport::new(EngineHost::Unix(PathBuf::from(
            "/nonexistent/dockside-test.sock",
        ))))
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(validate_id("container", "  web  ").unwrap(), "web");
        let err = validate_id("exec", " \t").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: exec id must not be empty");
    }

    #[test]
    fn test_resize_query() {
        let query = resize_query(TtySize::new(132, 43));
        assert_eq!(query, [("h", "43".to_string()), ("w", "132".to_string())]);
    }

    #[tokio::test]
    async fn test_empty_ids_rejected_before_connecting() {
        let client = client();
        let cancel = CancellationToken::new();

        let err = client.inspect_container("", &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let err = client.exec_inspect("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let err = client.kill("", None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let result = client.wait(" ", WaitCondition::NotRunning, &cancel).await;
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_empty_exec_command_rejected() {
        let client = client();
        let err = client
            .exec_create("web", &ExecConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_connection_error() {
        let client = client();
        let err = client.exec_inspect("e1").await.unwrap_err();
        match err {
            EngineError::Connection { endpoint, .. } => {
                assert_eq!(endpoint, "unix:///nonexistent/dockside-test.sock");
            }
            other => panic!("Expected Connection, got {other:?}"),
        }
    }
}
