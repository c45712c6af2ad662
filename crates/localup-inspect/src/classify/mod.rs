//! Request classification
//!
//! Matchers recognize known request shapes (webhook deliveries from a given
//! provider, for example) and label them. A [`ClassifierRegistry`] holds the
//! active matchers in order; the first matcher that claims an exchange
//! produces its [`ClassificationResult`] and no other matcher runs.

mod github;
mod paddle;
mod stripe;

pub use github::GitHubMatcher;
pub use paddle::PaddleBillingMatcher;
pub use stripe::StripeMatcher;

use crate::exchange::Exchange;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Label carried by results produced from a failing matcher
pub const ERROR_LABEL: &str = "classification.error";

/// Errors a matcher can report while classifying
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Body is not the JSON document the matcher expects
    #[error("Invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A required field is absent or has the wrong type
    #[error("Missing or invalid field '{0}'")]
    MissingField(String),

    /// Matcher panicked
    #[error("Matcher panicked: {0}")]
    Panicked(String),
}

impl ClassifyError {
    /// Where in the payload (or matcher) the failure happened
    pub fn location(&self) -> String {
        match self {
            ClassifyError::InvalidJson(e) => format!("line {} column {}", e.line(), e.column()),
            ClassifyError::MissingField(path) => path.clone(),
            ClassifyError::Panicked(_) => "panic".to_string(),
        }
    }
}

/// Label attached to an exchange by the matcher that claimed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClassificationResult {
    /// Name of the matcher that produced this result
    pub source: String,
    /// Short machine-stable tag
    pub label: String,
    /// Human readable label
    pub display_label: String,
    /// Event specific fields, in insertion order
    #[schema(value_type = Vec<Vec<String>>)]
    pub details: Vec<(String, String)>,
    /// Set when the matcher failed; details then carry `Error` and `Location`
    pub is_error: bool,
}

impl ClassificationResult {
    pub fn new(source: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            source: source.into(),
            display_label: label.clone(),
            label,
            details: Vec::new(),
            is_error: false,
        }
    }

    pub fn with_display_label(mut self, display_label: impl Into<String>) -> Self {
        self.display_label = display_label.into();
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }

    /// Error-flagged result naming the failing matcher
    pub fn error(source: impl Into<String>, error: &ClassifyError) -> Self {
        Self {
            source: source.into(),
            label: ERROR_LABEL.to_string(),
            display_label: ERROR_LABEL.to_string(),
            details: vec![
                ("Error".to_string(), error.to_string()),
                ("Location".to_string(), error.location()),
            ],
            is_error: true,
        }
    }

    /// Value of a detail entry
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A pluggable request classifier
pub trait RequestMatcher: Send + Sync {
    /// Identity of the matcher; registries de-duplicate on it
    fn name(&self) -> &str;

    /// Whether this matcher claims the exchange
    fn matches(&self, exchange: &Exchange) -> bool;

    /// Label a claimed exchange
    fn classify(&self, exchange: &Exchange) -> Result<ClassificationResult, ClassifyError>;
}

/// Run matchers in order; the first one that claims the exchange decides.
///
/// A failing (or panicking) matcher yields an error-flagged result instead of
/// propagating. No match yields `None`.
pub fn classify_first_match(
    exchange: &Exchange,
    matchers: &[Arc<dyn RequestMatcher>],
) -> Option<ClassificationResult> {
    for matcher in matchers {
        let claimed = match catch_unwind(AssertUnwindSafe(|| matcher.matches(exchange))) {
            Ok(claimed) => claimed,
            Err(panic) => {
                warn!("Matcher '{}' panicked while matching", matcher.name());
                let error = ClassifyError::Panicked(panic_message(panic));
                return Some(ClassificationResult::error(matcher.name(), &error));
            }
        };

        if !claimed {
            continue;
        }

        debug!("Exchange {} claimed by matcher '{}'", exchange.id(), matcher.name());

        let outcome = catch_unwind(AssertUnwindSafe(|| matcher.classify(exchange)))
            .unwrap_or_else(|panic| Err(ClassifyError::Panicked(panic_message(panic))));

        return Some(match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("Matcher '{}' failed on {}: {}", matcher.name(), exchange.id(), e);
                ClassificationResult::error(matcher.name(), &e)
            }
        });
    }

    None
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Built-in matchers, in default order
pub fn default_matchers() -> Vec<Arc<dyn RequestMatcher>> {
    vec![
        Arc::new(PaddleBillingMatcher),
        Arc::new(GitHubMatcher),
        Arc::new(StripeMatcher),
    ]
}

/// Look up a built-in matcher by name
pub fn builtin_matcher(name: &str) -> Option<Arc<dyn RequestMatcher>> {
    default_matchers()
        .into_iter()
        .find(|m| m.name().eq_ignore_ascii_case(name))
}

/// Ordered, de-duplicated set of active matchers
#[derive(Clone, Default)]
pub struct ClassifierRegistry {
    matchers: Vec<Arc<dyn RequestMatcher>>,
}

impl ClassifierRegistry {
    /// Registry with no matchers
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in matchers
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for matcher in default_matchers() {
            registry.register(matcher);
        }
        registry
    }

    /// Defaults first, then the named matchers. Names that do not resolve are dropped.
    pub fn from_names(names: &[String]) -> Self {
        let mut registry = Self::with_defaults();
        for name in names {
            match builtin_matcher(name) {
                Some(matcher) => {
                    registry.register(matcher);
                }
                None => debug!("Ignoring unknown request matcher '{}'", name),
            }
        }
        registry
    }

    /// Append a matcher. Returns false (and keeps the existing one) when a
    /// matcher with the same name is already registered.
    pub fn register(&mut self, matcher: Arc<dyn RequestMatcher>) -> bool {
        if matcher.name().trim().is_empty() {
            debug!("Ignoring request matcher without a name");
            return false;
        }
        if self.matchers.iter().any(|m| m.name() == matcher.name()) {
            debug!("Request matcher '{}' already registered", matcher.name());
            return false;
        }
        self.matchers.push(matcher);
        true
    }

    /// Names of the active matchers, in order
    pub fn names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn classify(&self, exchange: &Exchange) -> Option<ClassificationResult> {
        classify_first_match(exchange, &self.matchers)
    }
}

/// Parse the request body as JSON
pub(crate) fn json_body(exchange: &Exchange) -> Result<serde_json::Value, ClassifyError> {
    Ok(serde_json::from_slice(&exchange.request().body)?)
}

/// Follow a dotted path through a JSON document
pub(crate) fn field<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Result<&'a serde_json::Value, ClassifyError> {
    path.split('.')
        .try_fold(value, |current, key| current.get(key))
        .ok_or_else(|| ClassifyError::MissingField(path.to_string()))
}

/// Scalar field rendered as text (strings unquoted)
pub(crate) fn text_field(value: &serde_json::Value, path: &str) -> Result<String, ClassifyError> {
    match field(value, path)? {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ClassifyError::MissingField(path.to_string())),
    }
}

/// Length of an array field
pub(crate) fn array_len(value: &serde_json::Value, path: &str) -> Result<usize, ClassifyError> {
    field(value, path)?
        .as_array()
        .map(Vec::len)
        .ok_or_else(|| ClassifyError::MissingField(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_parser::ParsedRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange(raw: &[u8]) -> Exchange {
        Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None)
    }

    /// Matches everything and counts classify calls
    struct CountingMatcher {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl CountingMatcher {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl RequestMatcher for CountingMatcher {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, _exchange: &Exchange) -> bool {
            true
        }

        fn classify(&self, _exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassificationResult::new(self.name, self.name))
        }
    }

    struct FailingMatcher;

    impl RequestMatcher for FailingMatcher {
        fn name(&self) -> &str {
            "failing"
        }

        fn matches(&self, _exchange: &Exchange) -> bool {
            true
        }

        fn classify(&self, exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
            let body = json_body(exchange)?;
            text_field(&body, "does.not.exist")?;
            unreachable!()
        }
    }

    struct PanickingMatcher;

    impl RequestMatcher for PanickingMatcher {
        fn name(&self) -> &str {
            "panicking"
        }

        fn matches(&self, _exchange: &Exchange) -> bool {
            true
        }

        fn classify(&self, _exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
            panic!("boom")
        }
    }

    #[test]
    fn test_first_registered_matcher_wins() {
        let first = CountingMatcher::new("first");
        let second = CountingMatcher::new("second");

        let mut registry = ClassifierRegistry::empty();
        registry.register(first.clone());
        registry.register(second.clone());

        let result = registry
            .classify(&exchange(b"GET / HTTP/1.1\r\n\r\n"))
            .unwrap();

        assert_eq!(result.source, "first");
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_match_yields_none() {
        let registry = ClassifierRegistry::with_defaults();
        assert!(registry
            .classify(&exchange(b"GET /health HTTP/1.1\r\n\r\n"))
            .is_none());
    }

    #[test]
    fn test_failing_matcher_yields_error_result() {
        let mut registry = ClassifierRegistry::empty();
        registry.register(Arc::new(FailingMatcher));

        let result = registry
            .classify(&exchange(
                b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n{not json",
            ))
            .unwrap();

        assert!(result.is_error);
        assert_eq!(result.source, "failing");
        assert_eq!(result.label, ERROR_LABEL);
        assert!(!result.detail("Error").unwrap().is_empty());
        assert!(result.detail("Location").unwrap().starts_with("line 1"));
    }

    #[test]
    fn test_missing_field_location() {
        let mut registry = ClassifierRegistry::empty();
        registry.register(Arc::new(FailingMatcher));

        let result = registry
            .classify(&exchange(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}"))
            .unwrap();

        assert!(result.is_error);
        assert_eq!(result.detail("Location"), Some("does.not.exist"));
    }

    #[test]
    fn test_panicking_matcher_is_contained() {
        let mut registry = ClassifierRegistry::empty();
        registry.register(Arc::new(PanickingMatcher));

        let result = registry
            .classify(&exchange(b"GET / HTTP/1.1\r\n\r\n"))
            .unwrap();

        assert!(result.is_error);
        assert!(result.detail("Error").unwrap().contains("boom"));
    }

    #[test]
    fn test_registry_deduplicates_by_name() {
        let mut registry = ClassifierRegistry::with_defaults();
        let before = registry.names().len();

        assert!(!registry.register(Arc::new(GitHubMatcher)));
        assert_eq!(registry.names().len(), before);
    }

    #[test]
    fn test_from_names_drops_unknown_entries() {
        let registry = ClassifierRegistry::from_names(&[
            "no-such-matcher".to_string(),
            "github".to_string(),
        ]);

        assert_eq!(registry.names(), vec!["paddle-billing", "github", "stripe"]);
    }

    #[test]
    fn test_user_matchers_follow_defaults() {
        let mut registry = ClassifierRegistry::with_defaults();
        registry.register(CountingMatcher::new("custom"));

        assert_eq!(
            registry.names(),
            vec!["paddle-billing", "github", "stripe", "custom"]
        );
    }
}
