//! HTTP transport to the container engine.
//!
//! Every request opens a fresh connection to the engine endpoint, speaks one
//! HTTP/1.1 exchange over it, and lets it go. Hijacking requests keep the
//! connection instead: after `101 Switching Protocols` the socket is handed
//! to a [`HijackedConnection`] and HTTP is no longer involved.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use dockside_protocol::SessionTarget;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::hijack::{BoxedStream, HijackedConnection};

/// Engine address used when nothing else is configured.
pub const DEFAULT_HOST: &str = "unix:///var/run/docker.sock";

/// Port assumed for `tcp://` and `http://` hosts without one.
const DEFAULT_TCP_PORT: u16 = 2375;

/// Host header sent over Unix sockets, where there is no real authority.
const UNIX_AUTHORITY: &str = "docker";

const USER_AGENT: &str = concat!("dockside/", env!("CARGO_PKG_VERSION"));

/// Query parameters as ordered key/value pairs.
pub type Query<'a> = [(&'a str, String)];

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHost {
    /// A Unix domain socket.
    Unix(PathBuf),
    /// A `host:port` TCP address.
    Tcp(String),
}

impl EngineHost {
    /// Value of the `Host` header for requests to this endpoint.
    pub fn authority(&self) -> &str {
        match self {
            EngineHost::Unix(_) => UNIX_AUTHORITY,
            EngineHost::Tcp(addr) => addr,
        }
    }
}

fn has_port(addr: &str) -> bool {
    if addr.starts_with('[') {
        addr.contains("]:")
    } else {
        addr.contains(':')
    }
}

impl FromStr for EngineHost {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(EngineError::InvalidArgument(
                    "unix:// host has no socket path".to_string(),
                ));
            }
            return Ok(EngineHost::Unix(PathBuf::from(path)));
        }

        let rest = s
            .strip_prefix("tcp://")
            .or_else(|| s.strip_prefix("http://"))
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!(
                    "unsupported engine host {s:?}: expected unix://, tcp:// or http://"
                ))
            })?;

        let addr = rest.trim_end_matches('/');
        if addr.is_empty() || addr.contains('/') {
            return Err(EngineError::InvalidArgument(format!(
                "invalid engine address {s:?}"
            )));
        }

        if has_port(addr) {
            Ok(EngineHost::Tcp(addr.to_string()))
        } else {
            Ok(EngineHost::Tcp(format!("{addr}:{DEFAULT_TCP_PORT}")))
        }
    }
}

impl fmt::Display for EngineHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineHost::Unix(path) => write!(f, "unix://{}", path.display()),
            EngineHost::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Sends requests to the engine.
#[derive(Debug, Clone)]
pub struct Transport {
    host: EngineHost,
    api_version: Option<String>,
    request_timeout: Duration,
}

impl Transport {
    /// Create a transport with no API version pin and a 30 second timeout.
    pub fn new(host: EngineHost) -> Self {
        Self {
            host,
            api_version: None,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build a transport from the `[engine]` config section.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut transport = Self::new(config.host.parse()?)
            .with_request_timeout(config.request_timeout());
        if let Some(version) = &config.api_version {
            transport = transport.with_api_version(version.clone());
        }
        Ok(transport)
    }

    /// Prefix every path with `/v{version}`.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        let version = version.strip_prefix('v').map(str::to_string).unwrap_or(version);
        self.api_version = Some(version);
        self
    }

    /// Deadline for ordinary requests and for establishing hijacked streams.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The engine endpoint.
    pub fn host(&self) -> &EngineHost {
        &self.host
    }

    /// The configured request deadline.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Build the request target for `path` and `query`.
    pub fn endpoint_path(&self, path: &str, query: &Query<'_>) -> String {
        let mut target = match &self.api_version {
            Some(version) => format!("/v{version}{path}"),
            None => path.to_string(),
        };

        if !query.is_empty() {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())))
                .finish();
            target.push('?');
            target.push_str(&encoded);
        }

        target
    }

    /// Send a request and return the body of a successful response.
    ///
    /// Non-success statuses are mapped through [`EngineError::from_status`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
    ) -> Result<Bytes, EngineError> {
        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, self.exchange(method, path, query, body)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Send a request and decode the JSON body of the response.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
    ) -> Result<T, EngineError> {
        let body = self.request(method, path, query, body).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Send a request with no deadline that can be cancelled.
    ///
    /// Used for long-lived requests such as container waits.
    pub async fn request_cancellable(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, EngineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.exchange(method, path, query, body) => result,
        }
    }

    /// Send an upgrading request and take over the socket.
    ///
    /// The request deadline covers establishment only; the returned stream
    /// lives until closed.
    pub async fn hijack(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
        target: SessionTarget,
        cancel: &CancellationToken,
    ) -> Result<HijackedConnection, EngineError> {
        let timeout = self.request_timeout;
        let establish =
            tokio::time::timeout(timeout, self.upgrade(method, path, query, body, target));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = establish => match result {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(timeout)),
            },
        }
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
    ) -> Result<Bytes, EngineError> {
        let request = self.build_request(method, path, query, body, false)?;
        let response = self.send(request).await?;
        let status = response.status();
        let body = self.collect_body(response).await?;

        tracing::debug!(status = status.as_u16(), path = %path, "Engine responded");

        if !status.is_success() {
            return Err(EngineError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn upgrade(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
        target: SessionTarget,
    ) -> Result<HijackedConnection, EngineError> {
        let request = self.build_request(method, path, query, body, true)?;
        let mut response = self.send(request).await?;
        let status = response.status();

        if status != StatusCode::SWITCHING_PROTOCOLS {
            if status.is_success() {
                return Err(self.connection_error(format!(
                    "engine answered {status} instead of upgrading the connection"
                )));
            }
            let body = self.collect_body(response).await?;
            return Err(EngineError::from_status(status.as_u16(), &body));
        }

        let upgraded = hyper::upgrade::on(&mut response)
            .await
            .map_err(|e| self.connection_error(e))?;

        tracing::debug!(target_id = %target, "Connection upgraded");
        Ok(HijackedConnection::new(
            Box::new(TokioIo::new(upgraded)),
            target,
        ))
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &Query<'_>,
        body: Option<Bytes>,
        upgrade: bool,
    ) -> Result<Request<Full<Bytes>>, EngineError> {
        let uri = self.endpoint_path(path, query);
        tracing::debug!(method = %method, uri = %uri, upgrade, "Engine request");

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, self.host.authority())
            .header(header::USER_AGENT, USER_AGENT);

        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if upgrade {
            builder = builder
                .header(header::CONNECTION, "Upgrade")
                .header(header::UPGRADE, "tcp");
        }

        builder
            .body(Full::new(body.unwrap_or_default()))
            .map_err(|e| EngineError::InvalidArgument(format!("invalid request: {e}")))
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>, EngineError> {
        let stream = self.connect().await?;
        let (mut sender, conn) = http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
            .await
            .map_err(|e| self.connection_error(e))?;

        let endpoint = self.host.to_string();
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(endpoint = %endpoint, error = %e, "Engine connection failed");
            }
        });

        sender
            .send_request(request)
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn connect(&self) -> Result<BoxedStream, EngineError> {
        match &self.host {
            #[cfg(unix)]
            EngineHost::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| self.connection_error(e))?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            EngineHost::Unix(_) => Err(self.connection_error(
                "unix sockets are not supported on this platform",
            )),
            EngineHost::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr.as_str())
                    .await
                    .map_err(|e| self.connection_error(e))?;
                stream.set_nodelay(true).map_err(|e| self.connection_error(e))?;
                Ok(Box::new(stream))
            }
        }
    }

    async fn collect_body(&self, response: Response<Incoming>) -> Result<Bytes, EngineError> {
        let collected = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(collected.to_bytes())
    }

    fn connection_error(&self, reason: impl fmt::Display) -> EngineError {
        EngineError::Connection {
            endpoint: self.host.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    /// Serve one canned HTTP response on a fresh socket and return the
    /// transport pointed at it plus the raw request head it received.
    async fn serve_once(
        response: &'static str,
    ) -> (TempDir, Transport, tokio::task::JoinHandle<String>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if stream.read(&mut byte).await.unwrap() == 0 {
                    break;
                }
                head.push(byte[0]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            String::from_utf8(head).unwrap()
        });

        let transport = Transport::new(EngineHost::Unix(path));
        (dir, transport, server)
    }

    #[test]
    fn test_parse_unix_host() {
        let host: EngineHost = "unix:///var/run/docker.sock".parse().unwrap();
        assert_eq!(host, EngineHost::Unix(PathBuf::from("/var/run/docker.sock")));
        assert_eq!(host.to_string(), "unix:///var/run/docker.sock");
        assert_eq!(host.authority(), "docker");
    }

    #[test]
    fn test_parse_tcp_hosts() {
        let host: EngineHost = "tcp://10.0.0.1:2376".parse().unwrap();
        assert_eq!(host, EngineHost::Tcp("10.0.0.1:2376".to_string()));
        assert_eq!(host.authority(), "10.0.0.1:2376");

        let host: EngineHost = "http://localhost/".parse().unwrap();
        assert_eq!(host, EngineHost::Tcp("localhost:2375".to_string()));

        let host: EngineHost = "tcp://[::1]".parse().unwrap();
        assert_eq!(host, EngineHost::Tcp("[::1]:2375".to_string()));
    }

    #[test]
    fn test_parse_invalid_hosts() {
        for bad in ["", "unix://", "tcp://", "ssh://host", "npipe:////./pipe/docker", "tcp://h/x"] {
            assert!(bad.parse::<EngineHost>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_endpoint_path_versioned_with_query() {
        let transport =
            Transport::new(EngineHost::Tcp("h:1".to_string())).with_api_version("v1.43");
        let path = transport.endpoint_path(
            "/containers/web/attach",
            &[("stream", "1".to_string()), ("detachKeys", "ctrl-p,ctrl-q".to_string())],
        );
        assert_eq!(
            path,
            "/v1.43/containers/web/attach?stream=1&detachKeys=ctrl-p%2Cctrl-q"
        );
    }

    #[test]
    fn test_endpoint_path_unversioned() {
        let transport = Transport::new(EngineHost::Tcp("h:1".to_string()));
        assert_eq!(transport.endpoint_path("/exec/e1/json", &[]), "/exec/e1/json");
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            host: "tcp://engine:2376".to_string(),
            api_version: Some("1.41".to_string()),
            request_timeout_secs: 5,
        };
        let transport = Transport::from_config(&config).unwrap();
        assert_eq!(transport.host(), &EngineHost::Tcp("engine:2376".to_string()));
        assert_eq!(transport.request_timeout(), Duration::from_secs(5));
        assert_eq!(transport.endpoint_path("/x", &[]), "/v1.41/x");
    }

    #[test]
    fn test_build_upgrade_request_headers() {
        let transport = Transport::new(EngineHost::Unix(PathBuf::from("/tmp/e.sock")));
        let request = transport
            .build_request(
                Method::POST,
                "/exec/e1/start",
                &[],
                Some(Bytes::from_static(b"{}")),
                true,
            )
            .unwrap();

        let headers = request.headers();
        assert_eq!(headers[header::HOST], "docker");
        assert_eq!(headers[header::CONNECTION], "Upgrade");
        assert_eq!(headers[header::UPGRADE], "tcp");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert!(headers[header::USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("dockside/"));
    }

    #[tokio::test]
    async fn test_request_returns_body() {
        let (_dir, transport, server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\n{\"Id\":\"e1\"}").await;

        let body = transport
            .request(Method::GET, "/exec/e1/json", &[], None)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"Id\":\"e1\"}");

        let head = server.await.unwrap();
        assert!(head.starts_with("GET /exec/e1/json HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_request_maps_not_found() {
        let (_dir, transport, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 35\r\n\r\n{\"message\":\"No such container: c9\"}",
        )
        .await;

        let err = transport
            .request(Method::POST, "/containers/c9/kill", &[], None)
            .await
            .unwrap_err();
        match err {
            EngineError::NotFound { message } => assert_eq!(message, "No such container: c9"),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hijack_rejects_plain_success() {
        let (_dir, transport, _server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n").await;

        let err = transport
            .hijack(
                Method::POST,
                "/containers/c1/attach",
                &[],
                None,
                SessionTarget::Container("c1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_hijack_surfaces_api_error() {
        let (_dir, transport, _server) = serve_once(
            "HTTP/1.1 409 Conflict\r\nContent-Length: 38\r\n\r\n{\"message\":\"container c1 is paused\"}\r\n",
        )
        .await;

        let err = transport
            .hijack(
                Method::POST,
                "/containers/c1/attach",
                &[],
                None,
                SessionTarget::Container("c1".to_string()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            EngineError::Rejected { status, message } => {
                assert_eq!(status, 409);
                assert_eq!(message, "container c1 is paused");
            }
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let transport = Transport::new(EngineHost::Unix(path))
            .with_request_timeout(Duration::from_millis(100));
        let err = transport
            .request(Method::GET, "/containers/c1/json", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_request() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("silent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let transport = Transport::new(EngineHost::Unix(path));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = transport
            .request_cancellable(Method::POST, "/containers/c1/wait", &[], None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let dir = TempDir::new().unwrap();
        let transport = Transport::new(EngineHost::Unix(dir.path().join("absent.sock")));

        let err = transport
            .request(Method::GET, "/containers/c1/json", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Connection { .. }));
    }
}
