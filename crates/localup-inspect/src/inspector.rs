//! Wiring of store, sinks, capture, replay and query API from a config

use crate::capture::CaptureEngine;
use crate::classify::ClassifierRegistry;
use crate::config::InspectorConfig;
use crate::replay::{LocalTarget, ReplayEngine, TcpTarget};
use crate::server::{self, InspectorServer};
use crate::service::InspectorService;
use crate::sinks::{RemotePushSink, SinkCoordinator, SinkError, TerminalSink};
use crate::store::{ExchangeStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// A fully wired inspector
#[derive(Clone)]
pub struct Inspector {
    config: InspectorConfig,
    capture: CaptureEngine,
    replay: ReplayEngine,
    service: InspectorService,
}

impl Inspector {
    /// Build with the configured matchers and a TCP local target
    pub async fn from_config(config: InspectorConfig) -> Result<Self, InspectorError> {
        let registry = ClassifierRegistry::from_names(&config.request_matchers);
        let target = Arc::new(TcpTarget::new(
            config.local_target.clone(),
            config.replay_timeout,
        ));
        Self::assemble(config, registry, target).await
    }

    /// Build with an explicit registry and local target
    pub async fn assemble(
        config: InspectorConfig,
        registry: ClassifierRegistry,
        target: Arc<dyn LocalTarget>,
    ) -> Result<Self, InspectorError> {
        let store = ExchangeStore::open(
            &config.database_url,
            config.max_logged_requests,
            config.truncate_on_start,
        )
        .await?;

        let mut sinks = SinkCoordinator::new(store.clone());
        if config.terminal.enabled {
            sinks = sinks.with_terminal(Arc::new(TerminalSink::stdout(
                config.terminal.header_lines,
            )));
        }
        sinks = sinks.with_remote(Arc::new(RemotePushSink::new(
            config.dashboard_port,
            config.push_timeout,
        )?));

        info!(
            "Inspector ready: capacity {}, matchers [{}]",
            store.capacity(),
            registry.names().join(", ")
        );

        let capture =
            CaptureEngine::new(registry, sinks).with_subdomain(config.subdomain.clone());
        let replay = ReplayEngine::new(capture.clone(), target);
        let service = InspectorService::new(store, replay.clone());

        Ok(Self {
            config,
            capture,
            replay,
            service,
        })
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn replay(&self) -> &ReplayEngine {
        &self.replay
    }

    pub fn service(&self) -> &InspectorService {
        &self.service
    }

    pub fn router(&self) -> axum::Router {
        server::router(self.service.clone())
    }

    /// Serve the query API on the configured address
    pub async fn serve(&self) -> Result<(), std::io::Error> {
        InspectorServer::new(self.config.api_addr, self.service.clone())
            .run()
            .await
    }
}
