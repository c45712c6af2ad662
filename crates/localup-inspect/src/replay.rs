//! Replay of captured requests against the local target
//!
//! A replayed request goes through [`CaptureEngine::capture`] under a fresh
//! correlation id, so it shows up in every sink like organic traffic, and its
//! response is attached the same way.

use crate::capture::{CaptureEngine, CaptureError};
use crate::exchange::{Exchange, REQUEST_ID_HEADER};
use crate::http_parser::{build_raw_request, set_raw_header, HttpResponseParser, ParsedRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};
use utoipa::ToSchema;

/// How often an idle connection is re-checked for a complete response
const READ_POLL: Duration = Duration::from_millis(100);

/// Errors talking to the local target
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No response within {0:?}")]
    Timeout(Duration),
}

/// Replay errors
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Exchange not found: {0}")]
    NotFound(String),

    #[error("Invalid replay request: {0}")]
    InvalidRequest(String),

    #[error("Local target unreachable: {0}")]
    Forward(#[from] ForwardError),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

/// Edited request submitted for replay
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplayRequest {
    /// HTTP method
    pub method: String,
    /// Request URI (path and query)
    pub uri: String,
    /// Headers in sending order
    #[serde(default)]
    #[schema(value_type = Vec<Vec<String>>)]
    pub headers: Vec<(String, String)>,
    /// Request body
    #[serde(default)]
    pub body: String,
}

/// Server the tunnel fronts
#[async_trait]
pub trait LocalTarget: Send + Sync {
    /// Send raw request bytes and return the raw response
    async fn send(&self, raw_request: &[u8]) -> Result<Vec<u8>, ForwardError>;
}

/// Local target reached over plain TCP
#[derive(Debug, Clone)]
pub struct TcpTarget {
    addr: String,
    timeout: Duration,
}

impl TcpTarget {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl LocalTarget for TcpTarget {
    async fn send(&self, raw_request: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let deadline = Instant::now() + self.timeout;

        let mut stream = match timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ForwardError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => return Err(ForwardError::Timeout(self.timeout)),
        };

        stream.write_all(raw_request).await?;
        stream.flush().await?;

        let mut parser = HttpResponseParser::new();
        let mut buf = vec![0u8; 8192];

        loop {
            if Instant::now() >= deadline {
                if parser.parsed().is_some() {
                    debug!("Replay response cut off at timeout");
                    break;
                }
                return Err(ForwardError::Timeout(self.timeout));
            }

            match timeout(READ_POLL, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    parser.feed(&buf[..n]);
                    if parser.is_complete() {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                // Idle: bodies without a length end once the target goes quiet
                Err(_) => {
                    if parser.is_complete() {
                        break;
                    }
                }
            }
        }

        Ok(parser.into_bytes())
    }
}

/// Re-issues captured or edited requests
#[derive(Clone)]
pub struct ReplayEngine {
    capture: CaptureEngine,
    target: Arc<dyn LocalTarget>,
}

impl ReplayEngine {
    pub fn new(capture: CaptureEngine, target: Arc<dyn LocalTarget>) -> Self {
        Self { capture, target }
    }

    /// Replay a stored exchange under a new id
    pub async fn replay(&self, id: &str) -> Result<Exchange, ReplayError> {
        let mut original = self
            .capture
            .store()
            .find(id)
            .await
            .map_err(CaptureError::from)?
            .ok_or_else(|| ReplayError::NotFound(id.to_string()))?;

        let new_id = self.capture.refresh_id(&mut original);
        info!("Replaying {} as {}", id, new_id);

        let exchange = self
            .capture
            .capture(original.raw_request().to_vec(), original.request().clone())
            .await?;

        self.forward(exchange).await
    }

    /// Build a request from discrete fields and send it as new traffic
    pub async fn replay_modified(&self, request: ReplayRequest) -> Result<Exchange, ReplayError> {
        if request.method.trim().is_empty() {
            return Err(ReplayError::InvalidRequest(
                "Method cannot be empty".to_string(),
            ));
        }
        if request.uri.trim().is_empty() {
            return Err(ReplayError::InvalidRequest("URI cannot be empty".to_string()));
        }

        let raw = build_raw_request(
            &request.method,
            &request.uri,
            &request.headers,
            request.body.as_bytes(),
        );
        // Never reuse an id supplied in the edited headers
        let raw = set_raw_header(&raw, REQUEST_ID_HEADER, &uuid::Uuid::new_v4().to_string());
        let parsed =
            ParsedRequest::parse(&raw).map_err(|e| ReplayError::InvalidRequest(e.to_string()))?;

        let exchange = self.capture.capture(raw, parsed).await?;
        info!(
            "Replaying edited {} {} as {}",
            request.method,
            request.uri,
            exchange.id()
        );

        self.forward(exchange).await
    }

    async fn forward(&self, exchange: Exchange) -> Result<Exchange, ReplayError> {
        let raw_response = self.target.send(exchange.raw_request()).await?;

        let updated = self
            .capture
            .attach_response(&exchange.request().headers, raw_response)
            .await?;

        Ok(updated.unwrap_or(exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierRegistry;
    use crate::sinks::SinkCoordinator;
    use crate::store::ExchangeStore;
    use tokio::net::TcpListener;

    /// Answers every connection with a fixed response
    async fn spawn_target(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response).await;
                });
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_tcp_target_reads_content_length_response() {
        let addr = spawn_target(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
        let target = TcpTarget::new(addr, Duration::from_secs(5));

        let response = target.send(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    }

    #[tokio::test]
    async fn test_tcp_target_unreachable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let target = TcpTarget::new(addr, Duration::from_secs(1));

        let err = target.send(b"GET / HTTP/1.1\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, ForwardError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_replay_missing_id_is_not_found() {
        let store = ExchangeStore::open("sqlite::memory:", 25, true).await.unwrap();
        let capture = CaptureEngine::new(ClassifierRegistry::empty(), SinkCoordinator::new(store));
        let engine = ReplayEngine::new(
            capture,
            Arc::new(TcpTarget::new("127.0.0.1:9", Duration::from_millis(100))),
        );

        let err = engine.replay("missing").await.unwrap_err();
        assert!(matches!(err, ReplayError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_replay_modified_validates_fields() {
        let store = ExchangeStore::open("sqlite::memory:", 25, true).await.unwrap();
        let capture = CaptureEngine::new(ClassifierRegistry::empty(), SinkCoordinator::new(store));
        let engine = ReplayEngine::new(
            capture,
            Arc::new(TcpTarget::new("127.0.0.1:9", Duration::from_millis(100))),
        );

        let err = engine
            .replay_modified(ReplayRequest {
                method: String::new(),
                uri: "/".to_string(),
                headers: Vec::new(),
                body: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidRequest(_)));
    }
}
