//! Attaching to a running container.

use dockside_protocol::{AttachOptions, ContainerInspect, StreamMode, TtySize};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::hijack::HijackedConnection;
use crate::session::StreamSession;

/// Container operations needed to run an attach session.
#[allow(async_fn_in_trait)]
pub trait Connector: Send + Sync {
    /// Fetch container metadata, including its TTY setting.
    async fn inspect_container(
        &self,
        container_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerInspect, EngineError>;

    /// Issue the attach request and take over the upgraded connection.
    async fn attach(
        &self,
        container_id: &str,
        options: &AttachOptions,
        cancel: &CancellationToken,
    ) -> Result<HijackedConnection, EngineError>;

    /// Resize the container's TTY.
    async fn resize_container(&self, container_id: &str, size: TtySize) -> Result<(), EngineError>;
}

/// Query parameters for an attach request.
///
/// Only flags that are set are sent, as `1`. `detachKeys` is sent only when
/// non-empty.
pub fn attach_query(options: &AttachOptions) -> Vec<(&'static str, String)> {
    let flags = [
        ("stream", options.stream),
        ("stdin", options.stdin),
        ("stdout", options.stdout),
        ("stderr", options.stderr),
        ("logs", options.logs),
    ];

    let mut query: Vec<(&'static str, String)> = flags
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| (name, "1".to_string()))
        .collect();

    if let Some(keys) = options.detach_keys.as_deref().filter(|k| !k.is_empty()) {
        query.push(("detachKeys", keys.to_string()));
    }

    query
}

/// Attach to a container and wrap the connection in a session.
///
/// The framing mode comes from the container's TTY setting, read with an
/// inspect before attaching.
pub async fn attach_session<C: Connector>(
    connector: &C,
    container_id: &str,
    options: &AttachOptions,
    cancel: &CancellationToken,
) -> Result<StreamSession, EngineError> {
    let inspect = connector.inspect_container(container_id, cancel).await?;
    let mode = StreamMode::from_tty(inspect.tty());

    let conn = connector.attach(container_id, options, cancel).await?;
    tracing::info!(container_id = %container_id, ?mode, "Attached to container");

    Ok(StreamSession::new(conn, mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use dockside_protocol::{ContainerConfig, Frame, FrameCodec, SessionTarget, StreamKind};
    use tokio::io::{AsyncWriteExt, DuplexStream};

    struct FakeConnector {
        tty: bool,
        remote: Mutex<Option<DuplexStream>>,
        local: Mutex<Option<DuplexStream>>,
    }

    impl FakeConnector {
        fn new(tty: bool) -> Self {
            let (local, remote) = tokio::io::duplex(4096);
            Self {
                tty,
                remote: Mutex::new(Some(remote)),
                local: Mutex::new(Some(local)),
            }
        }

        fn take_remote(&self) -> DuplexStream {
            self.remote.lock().unwrap().take().unwrap()
        }
    }

    impl Connector for FakeConnector {
        async fn inspect_container(
            &self,
            container_id: &str,
            _cancel: &CancellationToken,
        ) -> Result<ContainerInspect, EngineError> {
            if container_id == "missing" {
                return Err(EngineError::NotFound {
                    message: format!("No such container: {container_id}"),
                });
            }
            Ok(ContainerInspect {
                id: container_id.to_string(),
                config: ContainerConfig {
                    tty: self.tty,
                    ..Default::default()
                },
                ..Default::default()
            })
        }

        async fn attach(
            &self,
            container_id: &str,
            _options: &AttachOptions,
            cancel: &CancellationToken,
        ) -> Result<HijackedConnection, EngineError> {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let local = self.local.lock().unwrap().take().unwrap();
            Ok(HijackedConnection::new(
                Box::new(local),
                SessionTarget::Container(container_id.to_string()),
            ))
        }

        async fn resize_container(
            &self,
            _container_id: &str,
            _size: TtySize,
        ) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn test_attach_query_only_true_flags() {
        let options = AttachOptions {
            stream: true,
            stdout: true,
            ..Default::default()
        };
        assert_eq!(
            attach_query(&options),
            vec![("stream", "1".to_string()), ("stdout", "1".to_string())]
        );
    }

    #[test]
    fn test_attach_query_detach_keys() {
        let mut options = AttachOptions::interactive();
        options.detach_keys = Some(String::new());
        assert!(attach_query(&options).iter().all(|(k, _)| *k != "detachKeys"));

        options.detach_keys = Some("ctrl-x".to_string());
        let query = attach_query(&options);
        assert_eq!(query.len(), 5);
        assert_eq!(query.last().unwrap(), &("detachKeys", "ctrl-x".to_string()));
    }

    #[test]
    fn test_attach_query_empty() {
        assert!(attach_query(&AttachOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn test_attach_session_multiplexed() {
        let connector = FakeConnector::new(false);
        let mut remote = connector.take_remote();
        let codec = FrameCodec::new();
        remote.write_all(&codec.encode(&Frame::stderr(b"warn\n".to_vec())).unwrap()).await.unwrap();
        drop(remote);

        let mut session = attach_session(
            &connector,
            "web",
            &AttachOptions::interactive(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(session.mode(), StreamMode::Multiplexed);
        assert_eq!(session.target(), &SessionTarget::Container("web".to_string()));

        let chunk = session.next_output().await.unwrap().unwrap();
        assert_eq!(chunk.kind, StreamKind::Stderr);
        assert_eq!(chunk.bytes, b"warn\n");
        assert!(session.next_output().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attach_session_tty_is_raw() {
        let connector = FakeConnector::new(true);
        let session = attach_session(
            &connector,
            "web",
            &AttachOptions::interactive(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(session.mode(), StreamMode::Raw);
    }

    #[tokio::test]
    async fn test_attach_session_unknown_container() {
        let connector = FakeConnector::new(false);
        let result = attach_session(
            &connector,
            "missing",
            &AttachOptions::interactive(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_attach_session_cancelled() {
        let connector = FakeConnector::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            attach_session(&connector, "web", &AttachOptions::interactive(), &cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
