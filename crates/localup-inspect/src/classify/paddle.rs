//! Paddle Billing notifications

use super::{json_body, text_field, ClassificationResult, ClassifyError, RequestMatcher};
use crate::exchange::Exchange;

#[derive(Debug, Default, Clone, Copy)]
pub struct PaddleBillingMatcher;

impl RequestMatcher for PaddleBillingMatcher {
    fn name(&self) -> &str {
        "paddle-billing"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        let request = exchange.request();
        request.header("user-agent") == Some("Paddle")
            && request.has_header("paddle-signature")
            && request.has_header("paddle-version")
    }

    fn classify(&self, exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
        let payload = json_body(exchange)?;

        Ok(
            ClassificationResult::new(self.name(), text_field(&payload, "event_type")?)
                .with_detail("Event ID", text_field(&payload, "event_id")?)
                .with_detail("Notification ID", text_field(&payload, "notification_id")?),
        )
    }
}
