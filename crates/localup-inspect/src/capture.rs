//! Capture engine: the entry point for every tunneled request
//!
//! `capture` turns raw request bytes into an [`Exchange`], classifies it and
//! announces it to the sinks. `attach_response` correlates a raw response
//! back to its exchange through the correlation header of the request that
//! was answered.

use crate::classify::ClassifierRegistry;
use crate::exchange::{Exchange, Response, REQUEST_ID_HEADER};
use crate::http_parser::{ParseError, ParsedRequest};
use crate::sinks::SinkCoordinator;
use crate::store::{ExchangeStore, StoreError};
use thiserror::Error;
use tracing::debug;

/// Capture errors
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid request: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct CaptureEngine {
    registry: ClassifierRegistry,
    sinks: SinkCoordinator,
    default_subdomain: Option<String>,
}

impl CaptureEngine {
    pub fn new(registry: ClassifierRegistry, sinks: SinkCoordinator) -> Self {
        Self {
            registry,
            sinks,
            default_subdomain: None,
        }
    }

    /// Subdomain recorded when a request carries no `x-original-host`
    pub fn with_subdomain(mut self, subdomain: Option<String>) -> Self {
        self.default_subdomain = subdomain;
        self
    }

    pub fn store(&self) -> &ExchangeStore {
        self.sinks.store()
    }

    pub fn registry(&self) -> &ClassifierRegistry {
        &self.registry
    }

    /// Record a new inbound request
    pub async fn capture(
        &self,
        raw_request: Vec<u8>,
        parsed: ParsedRequest,
    ) -> Result<Exchange, CaptureError> {
        let mut exchange = Exchange::new(raw_request, parsed, self.default_subdomain.clone());
        exchange.set_classification(self.registry.classify(&exchange));

        debug!(
            "Captured {} {} as {}",
            exchange.request().method,
            exchange.request().uri,
            exchange.id()
        );

        self.sinks.created(&exchange).await?;
        Ok(exchange)
    }

    /// Parse and record raw request bytes
    pub async fn capture_raw(&self, raw_request: Vec<u8>) -> Result<Exchange, CaptureError> {
        let parsed = ParsedRequest::parse(&raw_request)?;
        self.capture(raw_request, parsed).await
    }

    /// Attach a response to the exchange named by the request's correlation
    /// header. Returns None (and drops the response) when no such exchange is
    /// stored.
    pub async fn attach_response(
        &self,
        request_headers: &[(String, String)],
        raw_response: Vec<u8>,
    ) -> Result<Option<Exchange>, CaptureError> {
        let Some(id) = request_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(REQUEST_ID_HEADER))
            .map(|(_, value)| value.as_str())
        else {
            debug!("Dropping response without a correlation header");
            return Ok(None);
        };

        let Some(mut exchange) = self.store().find(id).await? else {
            debug!("Dropping response for unknown exchange {}", id);
            return Ok(None);
        };

        exchange.set_response(Response::from_raw(raw_response));
        self.sinks.updated(&exchange).await?;

        Ok(Some(exchange))
    }

    /// Give an exchange a fresh correlation id; used by replay
    pub fn refresh_id(&self, exchange: &mut Exchange) -> String {
        exchange.refresh_id()
    }
}
