//! Service layer for the query API
//!
//! Business logic behind the dashboard endpoints, separated from HTTP concerns.

use crate::capture::CaptureError;
use crate::exchange::{ExchangeView, LogSummary};
use crate::replay::{ReplayEngine, ReplayError, ReplayRequest};
use crate::store::{ExchangeStore, StoreError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Pushed summaries buffered per dashboard socket before it starts lagging
const LIVE_UPDATE_CAPACITY: usize = 100;

/// Service errors that can occur during query API operations
#[derive(Debug, Error)]
pub enum InspectorServiceError {
    /// Exchange not found by ID
    #[error("Exchange with ID '{0}' not found")]
    ExchangeNotFound(String),

    /// Local target could not be reached
    #[error("Failed to replay request: {0}")]
    ReplayFailed(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<ReplayError> for InspectorServiceError {
    fn from(error: ReplayError) -> Self {
        match error {
            ReplayError::NotFound(id) => InspectorServiceError::ExchangeNotFound(id),
            ReplayError::InvalidRequest(msg) => InspectorServiceError::InvalidRequest(msg),
            ReplayError::Forward(e) => InspectorServiceError::ReplayFailed(e.to_string()),
            ReplayError::Capture(CaptureError::Store(e)) => InspectorServiceError::Storage(e),
            ReplayError::Capture(CaptureError::Parse(e)) => {
                InspectorServiceError::InvalidRequest(e.to_string())
            }
        }
    }
}

/// Inspector service containing business logic
#[derive(Clone)]
pub struct InspectorService {
    store: ExchangeStore,
    replay: ReplayEngine,
    live_updates: broadcast::Sender<LogSummary>,
}

impl InspectorService {
    pub fn new(store: ExchangeStore, replay: ReplayEngine) -> Self {
        let (live_updates, _) = broadcast::channel(LIVE_UPDATE_CAPACITY);
        Self {
            store,
            replay,
            live_updates,
        }
    }

    /// Summaries received through [`Self::receive_log`] from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LogSummary> {
        self.live_updates.subscribe()
    }

    /// All exchanges, newest first
    pub async fn list_exchanges(
        &self,
        with_responses: bool,
    ) -> Result<Vec<ExchangeView>, InspectorServiceError> {
        let exchanges = self.store.list(with_responses).fetch().await?;
        Ok(exchanges.iter().map(|e| e.view()).collect())
    }

    pub async fn search(&self, term: &str) -> Result<Vec<LogSummary>, InspectorServiceError> {
        Ok(self.store.search(term).await?)
    }

    pub async fn get_exchange(&self, id: &str) -> Result<ExchangeView, InspectorServiceError> {
        self.store
            .find(id)
            .await?
            .map(|e| e.view())
            .ok_or_else(|| InspectorServiceError::ExchangeNotFound(id.to_string()))
    }

    /// Delete every stored exchange
    pub async fn clear(&self) -> Result<(), InspectorServiceError> {
        Ok(self.store.delete(None).await?)
    }

    pub async fn replay(&self, id: &str) -> Result<(), InspectorServiceError> {
        self.replay.replay(id).await?;
        Ok(())
    }

    pub async fn replay_modified(&self, request: ReplayRequest) -> Result<(), InspectorServiceError> {
        self.replay.replay_modified(request).await?;
        Ok(())
    }

    /// Relay a pushed summary to every connected dashboard socket
    pub fn receive_log(&self, summary: LogSummary) {
        debug!(
            "Received pushed log {} {} {} ({:?})",
            summary.id, summary.method, summary.uri, summary.status_code
        );
        // No connected dashboard is not an error
        let _ = self.live_updates.send(summary);
    }
}
