//! Stripe webhook events

use super::{json_body, text_field, ClassificationResult, ClassifyError, RequestMatcher};
use crate::exchange::Exchange;

#[derive(Debug, Default, Clone, Copy)]
pub struct StripeMatcher;

impl RequestMatcher for StripeMatcher {
    fn name(&self) -> &str {
        "stripe"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        let request = exchange.request();
        request
            .header("user-agent")
            .is_some_and(|ua| ua.starts_with("Stripe/1.0"))
            && request.has_header("stripe-signature")
    }

    fn classify(&self, exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
        let payload = json_body(exchange)?;
        let event_type = text_field(&payload, "type")?;

        let fields = payload
            .as_object()
            .ok_or_else(|| ClassifyError::MissingField("type".to_string()))?;

        // Every other top-level field becomes a detail
        let result = fields
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .fold(
                ClassificationResult::new(self.name(), event_type),
                |result, (key, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    result.with_detail(key.clone(), value)
                },
            );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_parser::ParsedRequest;

    fn event(body: &str) -> Exchange {
        let raw = format!(
            "POST /stripe HTTP/1.1\r\nUser-Agent: Stripe/1.0 (+https://stripe.com/docs/webhooks)\r\nStripe-Signature: t=1,v1=abc\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        Exchange::new(
            raw.clone().into_bytes(),
            ParsedRequest::parse(raw.as_bytes()).unwrap(),
            None,
        )
    }

    #[test]
    fn test_matches() {
        assert!(StripeMatcher.matches(&event("{}")));

        let raw = b"POST / HTTP/1.1\r\nUser-Agent: Stripe/1.0\r\n\r\n";
        let ex = Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None);
        assert!(!StripeMatcher.matches(&ex));
    }

    #[test]
    fn test_classify_event() {
        let result = StripeMatcher
            .classify(&event(
                r#"{"id":"evt_1","type":"charge.succeeded","livemode":false}"#,
            ))
            .unwrap();

        assert_eq!(result.label, "charge.succeeded");
        assert_eq!(result.detail("id"), Some("evt_1"));
        assert_eq!(result.detail("livemode"), Some("false"));
        assert!(result.detail("type").is_none());
    }
}
