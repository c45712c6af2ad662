//! Request inspector for localup tunnels
//!
//! Captures every tunneled HTTP exchange, correlates responses to requests,
//! classifies known webhook traffic, keeps a bounded history and fans updates
//! out to a terminal table and the local dashboard. Stored exchanges can be
//! replayed against the local target.

pub mod capture;
pub mod classify;
pub mod config;
pub mod exchange;
pub mod http_parser;
pub mod inspector;
pub mod replay;
pub mod server;
pub mod service;
pub mod sinks;
pub mod store;

pub use capture::{CaptureEngine, CaptureError};
pub use classify::{
    classify_first_match, ClassificationResult, ClassifierRegistry, ClassifyError,
    RequestMatcher,
};
pub use config::{ConfigError, InspectorConfig, TerminalConfig};
pub use exchange::{Exchange, ExchangeView, LogSummary, Response, REQUEST_ID_HEADER};
pub use http_parser::{ParseError, ParsedRequest};
pub use inspector::{Inspector, InspectorError};
pub use replay::{ForwardError, LocalTarget, ReplayEngine, ReplayError, ReplayRequest, TcpTarget};
pub use server::InspectorServer;
pub use service::{InspectorService, InspectorServiceError};
pub use sinks::{ExchangeSink, RemotePushSink, SinkCoordinator, SinkError, TerminalSink};
pub use store::{ExchangeListing, ExchangeStore, StoreError};
