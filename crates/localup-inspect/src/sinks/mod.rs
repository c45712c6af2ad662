//! Exchange lifecycle fan-out
//!
//! The [`SinkCoordinator`] owns the fixed set of observers and the order they
//! see events in: the store first, then the terminal table, then the remote
//! dashboard push. Only store failures reach the caller.

mod remote;
mod terminal;

pub use remote::RemotePushSink;
pub use terminal::{TerminalSink, TerminalSize};

use crate::exchange::Exchange;
use crate::store::{ExchangeStore, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Terminal write failed: {0}")]
    Terminal(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Sink is closed")]
    Closed,
}

/// Observer of exchange lifecycle events
#[async_trait]
pub trait ExchangeSink: Send + Sync {
    fn name(&self) -> &str;

    /// A new exchange was captured
    async fn on_created(&self, exchange: &Exchange) -> Result<(), SinkError>;

    /// An exchange received its response
    async fn on_updated(&self, exchange: &Exchange) -> Result<(), SinkError>;
}

/// Dispatches lifecycle events to the store and the presentation sinks
#[derive(Clone)]
pub struct SinkCoordinator {
    store: ExchangeStore,
    terminal: Option<Arc<dyn ExchangeSink>>,
    remote: Option<Arc<dyn ExchangeSink>>,
}

impl SinkCoordinator {
    pub fn new(store: ExchangeStore) -> Self {
        Self {
            store,
            terminal: None,
            remote: None,
        }
    }

    pub fn with_terminal(mut self, sink: Arc<dyn ExchangeSink>) -> Self {
        self.terminal = Some(sink);
        self
    }

    pub fn with_remote(mut self, sink: Arc<dyn ExchangeSink>) -> Self {
        self.remote = Some(sink);
        self
    }

    pub fn store(&self) -> &ExchangeStore {
        &self.store
    }

    /// Record a new exchange. The store write completes before any other
    /// sink runs; the other sinks run whatever its outcome.
    pub async fn created(&self, exchange: &Exchange) -> Result<(), StoreError> {
        let stored = self.store.upsert(exchange).await;
        if let Err(e) = &stored {
            error!("Failed to store exchange {}: {}", exchange.id(), e);
        }

        for sink in self.presentation_sinks() {
            if let Err(e) = sink.on_created(exchange).await {
                report_sink_failure(sink.name(), exchange, &e);
            }
        }

        stored
    }

    /// Record the response of an exchange. An exchange evicted before its
    /// response arrived stays evicted and no sink hears about it.
    pub async fn updated(&self, exchange: &Exchange) -> Result<(), StoreError> {
        let stored = self.store.complete(exchange).await;
        match &stored {
            Ok(true) => {}
            Ok(false) => {
                debug!("Dropping response of evicted exchange {}", exchange.id());
                return Ok(());
            }
            Err(e) => error!("Failed to store response of {}: {}", exchange.id(), e),
        }

        for sink in self.presentation_sinks() {
            if let Err(e) = sink.on_updated(exchange).await {
                report_sink_failure(sink.name(), exchange, &e);
            }
        }

        stored.map(|_| ())
    }

    fn presentation_sinks(&self) -> impl Iterator<Item = &Arc<dyn ExchangeSink>> {
        self.terminal.iter().chain(self.remote.iter())
    }
}

fn report_sink_failure(sink: &str, exchange: &Exchange, error: &SinkError) {
    match error {
        // Dashboard not listening yet is routine
        SinkError::Client(_) | SinkError::Closed => {
            debug!("Sink '{}' dropped update for {}: {}", sink, exchange.id(), error)
        }
        SinkError::Terminal(_) => {
            warn!("Sink '{}' failed for {}: {}", sink, exchange.id(), error)
        }
    }
}
