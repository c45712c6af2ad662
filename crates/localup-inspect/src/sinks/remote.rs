//! Pushes exchange summaries to the local dashboard process

use super::{ExchangeSink, SinkError};
use crate::exchange::{Exchange, LogSummary};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

/// Summaries waiting for the push worker before new ones are dropped
const PUSH_QUEUE_CAPACITY: usize = 256;

/// Fire-and-forget dashboard push.
///
/// Events are queued to a single background task so summaries for one
/// exchange leave in the order they were produced. A push that fails or
/// times out is dropped, and so is an event arriving while the queue is full.
pub struct RemotePushSink {
    tx: mpsc::Sender<LogSummary>,
    endpoint: String,
    dropped: AtomicU64,
}

impl RemotePushSink {
    /// Push to `http://127.0.0.1:{dashboard_port}/api/logs`
    pub fn new(dashboard_port: u16, timeout: Duration) -> Result<Self, SinkError> {
        Self::with_endpoint(
            format!("http://127.0.0.1:{}/api/logs", dashboard_port),
            timeout,
        )
    }

    /// Push to an explicit URL. Must be called inside a tokio runtime.
    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        Self::spawn(endpoint.into(), timeout, PUSH_QUEUE_CAPACITY)
    }

    fn spawn(endpoint: String, timeout: Duration, queue_capacity: usize) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let (tx, mut rx) = mpsc::channel::<LogSummary>(queue_capacity.max(1));

        let target = endpoint.clone();
        tokio::spawn(async move {
            while let Some(summary) = rx.recv().await {
                match client.post(&target).json(&summary).send().await {
                    Ok(response) if !response.status().is_success() => {
                        debug!(
                            "Dashboard rejected update for {}: {}",
                            summary.id,
                            response.status()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Dashboard push for {} dropped: {}", summary.id, e),
                }
            }
            debug!("Dashboard push worker stopped");
        });

        Ok(Self {
            tx,
            endpoint,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Events discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn push(&self, exchange: &Exchange) -> Result<(), SinkError> {
        match self.tx.try_send(exchange.summary()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(summary)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dashboard push queue full, dropping update for {}", summary.id);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }
}

#[async_trait]
impl ExchangeSink for RemotePushSink {
    fn name(&self) -> &str {
        "remote"
    }

    async fn on_created(&self, exchange: &Exchange) -> Result<(), SinkError> {
        self.push(exchange)
    }

    async fn on_updated(&self, exchange: &Exchange) -> Result<(), SinkError> {
        self.push(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_parser::ParsedRequest;

    #[tokio::test]
    async fn test_unreachable_dashboard_is_not_an_error() {
        // Nothing listens on this port once the listener is dropped
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let sink = RemotePushSink::new(port, Duration::from_millis(200)).unwrap();
        assert_eq!(sink.endpoint(), format!("http://127.0.0.1:{}/api/logs", port));

        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let ex = Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None);

        assert!(sink.on_created(&ex).await.is_ok());
        assert!(sink.on_updated(&ex).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_updates() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/api/logs", listener.local_addr().unwrap());

        let sink = RemotePushSink::spawn(endpoint, Duration::from_secs(30), 1).unwrap();
        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let ex = Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None);

        for _ in 0..10 {
            assert!(sink.on_created(&ex).await.is_ok());
        }

        // One queued, at most one taken by the worker
        assert!(sink.dropped() >= 8);
        drop(listener);
    }
}
