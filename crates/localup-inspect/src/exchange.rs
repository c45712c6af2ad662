//! Captured exchange model
//!
//! An [`Exchange`] is one tunneled request paired with its (eventually
//! arriving) response, identified by the correlation id carried in the
//! `x-localup-request-id` header.

use crate::classify::ClassificationResult;
use crate::http_parser::{set_raw_header, ParsedRequest, ParsedResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

/// Correlation header set on every tunneled request before it reaches the local target
pub const REQUEST_ID_HEADER: &str = "x-localup-request-id";

/// Header carrying the public host the request was addressed to
pub const ORIGINAL_HOST_HEADER: &str = "x-original-host";

/// Shown in place of raw bytes that are not printable text
pub const BINARY_PLACEHOLDER: &str = "BINARY";

/// Requests larger than this are not rendered as a cURL command
const MAX_CURL_REQUEST_LEN: usize = 256_000;

/// True when the bytes contain anything outside printable ASCII, tab, CR and LF
pub fn is_binary(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .any(|b| !matches!(b, 0x20..=0x7E | b'\t' | b'\r' | b'\n'))
}

/// Text form of raw bytes that is safe to print or JSON-encode
pub fn display_bytes(bytes: &[u8]) -> String {
    if is_binary(bytes) {
        BINARY_PLACEHOLDER.to_string()
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

/// Response attached to an exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    raw_response: Vec<u8>,
    status_code: Option<u16>,
}

impl Response {
    /// Parse a raw response. A malformed response keeps its bytes but has no status.
    pub fn from_raw(raw_response: Vec<u8>) -> Self {
        let status_code = match ParsedResponse::parse(&raw_response) {
            Ok(parsed) => Some(parsed.status),
            Err(e) => {
                debug!("Could not parse captured response: {}", e);
                None
            }
        };

        Self {
            raw_response,
            status_code,
        }
    }

    /// Rebuild a response from stored fields
    pub fn from_parts(raw_response: Vec<u8>, status_code: Option<u16>) -> Self {
        Self {
            raw_response,
            status_code,
        }
    }

    pub fn raw_response(&self) -> &[u8] {
        &self.raw_response
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Dashboard view of this response
    pub fn view(&self) -> ResponseView {
        let parsed = ParsedResponse::parse(&self.raw_response).ok();
        let body = parsed
            .as_ref()
            .map(|p| p.body(&self.raw_response))
            .unwrap_or_default();

        ResponseView {
            raw: display_bytes(&self.raw_response),
            status: self.status_code,
            reason: parsed.as_ref().map(|p| p.reason.clone()),
            headers: parsed.map(|p| p.headers).unwrap_or_default(),
            body: display_bytes(&body),
        }
    }
}

/// A captured request and its lifecycle
#[derive(Debug, Clone)]
pub struct Exchange {
    id: String,
    subdomain: Option<String>,
    raw_request: Vec<u8>,
    parsed_request: ParsedRequest,
    start_time: DateTime<Utc>,
    stop_time: Option<DateTime<Utc>>,
    classification: Option<ClassificationResult>,
    response: Option<Response>,
}

impl Exchange {
    /// Start a new exchange now.
    ///
    /// The id is taken from the correlation header when present, otherwise a
    /// fresh one is generated. The subdomain comes from `x-original-host`,
    /// falling back to `default_subdomain`.
    pub fn new(
        raw_request: Vec<u8>,
        parsed_request: ParsedRequest,
        default_subdomain: Option<String>,
    ) -> Self {
        let id = parsed_request
            .header(REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);

        let subdomain = parsed_request
            .header(ORIGINAL_HOST_HEADER)
            .map(str::to_string)
            .or(default_subdomain);

        Self {
            id,
            subdomain,
            raw_request,
            parsed_request,
            start_time: Utc::now(),
            stop_time: None,
            classification: None,
            response: None,
        }
    }

    /// Rebuild an exchange from its stored projection
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: String,
        subdomain: Option<String>,
        method: &str,
        uri: &str,
        raw_request: Vec<u8>,
        start_time: DateTime<Utc>,
        stop_time: Option<DateTime<Utc>>,
        classification: Option<ClassificationResult>,
    ) -> Self {
        let parsed_request = ParsedRequest::parse(&raw_request)
            .unwrap_or_else(|_| ParsedRequest::minimal(method, uri));

        Self {
            id,
            subdomain,
            raw_request,
            parsed_request,
            start_time,
            stop_time,
            classification,
            response: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    pub fn raw_request(&self) -> &[u8] {
        &self.raw_request
    }

    pub fn request(&self) -> &ParsedRequest {
        &self.parsed_request
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    pub fn classification(&self) -> Option<&ClassificationResult> {
        self.classification.as_ref()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Milliseconds between start and stop, None while in flight
    pub fn duration_ms(&self) -> Option<i64> {
        self.stop_time
            .map(|stop| (stop - self.start_time).num_milliseconds())
    }

    pub fn set_classification(&mut self, classification: Option<ClassificationResult>) {
        self.classification = classification;
    }

    /// Attach a response. The stop time is recorded only the first time.
    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
        if self.stop_time.is_none() {
            self.stop_time = Some(Utc::now());
        }
    }

    /// Attach a stored response without touching the recorded stop time
    pub(crate) fn restore_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    /// Give this exchange a new correlation id, rewriting the header in both
    /// the parsed and the raw request. Returns the new id.
    pub fn refresh_id(&mut self) -> String {
        let request_id = generate_request_id();

        self.parsed_request.set_header(REQUEST_ID_HEADER, &request_id);
        self.raw_request = set_raw_header(&self.raw_request, REQUEST_ID_HEADER, &request_id);
        self.id = request_id.clone();

        request_id
    }

    /// Compact view pushed to the dashboard and returned by search
    pub fn summary(&self) -> LogSummary {
        LogSummary {
            id: self.id.clone(),
            duration: self.duration_ms(),
            method: self.parsed_request.method.clone(),
            uri: self.parsed_request.uri.clone(),
            classification_label: self
                .classification
                .as_ref()
                .map(|c| c.display_label.clone()),
            status_code: self.response.as_ref().and_then(Response::status_code),
        }
    }

    /// Full dashboard view
    pub fn view(&self) -> ExchangeView {
        let binary = is_binary(&self.raw_request);
        let request = &self.parsed_request;

        ExchangeView {
            id: self.id.clone(),
            performed_at: self.start_time,
            duration: self.duration_ms(),
            subdomain: self.subdomain.clone(),
            request: RequestView {
                raw: display_bytes(&self.raw_request),
                method: request.method.clone(),
                uri: request.uri.clone(),
                headers: request.headers.clone(),
                body: if binary {
                    BINARY_PLACEHOLDER.to_string()
                } else {
                    display_bytes(&request.body)
                },
                query: request.query.clone(),
                post: post_fields(request),
                curl: if binary {
                    String::new()
                } else {
                    self.curl_command()
                },
                classification: self.classification.clone(),
            },
            response: self.response.as_ref().map(Response::view),
        }
    }

    /// cURL command reproducing the request, empty for oversized requests
    pub fn curl_command(&self) -> String {
        if self.raw_request.len() > MAX_CURL_REQUEST_LEN {
            return String::new();
        }

        let request = &self.parsed_request;
        let url = match request.header("host") {
            Some(host) => format!("http://{}{}", host, request.uri),
            None => request.uri.clone(),
        };

        let mut command = format!("curl {}", shell_quote(&url));
        if request.method != "GET" {
            command.push_str(&format!(" -X {}", request.method));
        }
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            command.push_str(&format!(" -H {}", shell_quote(&format!("{}: {}", name, value))));
        }
        if !request.body.is_empty() {
            command.push_str(&format!(
                " -d {}",
                shell_quote(&String::from_utf8_lossy(&request.body))
            ));
        }

        command
    }
}

fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Top-level fields of a form or JSON body
fn post_fields(request: &ParsedRequest) -> Vec<PostField> {
    match request.content_type().as_deref() {
        Some("application/x-www-form-urlencoded") => {
            url::form_urlencoded::parse(&request.body)
                .map(|(name, value)| PostField {
                    name: name.into_owned(),
                    value: serde_json::Value::String(value.into_owned()),
                })
                .collect()
        }
        Some("application/json") => {
            match serde_json::from_slice::<serde_json::Value>(&request.body) {
                Ok(serde_json::Value::Object(fields)) => fields
                    .into_iter()
                    .map(|(name, value)| PostField { name, value })
                    .collect(),
                Ok(serde_json::Value::Array(items)) => items
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| PostField {
                        name: index.to_string(),
                        value,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Summary of an exchange, as pushed to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LogSummary {
    /// Correlation id
    pub id: String,
    /// Duration in milliseconds, null while in flight
    pub duration: Option<i64>,
    /// Request method
    pub method: String,
    /// Request URI
    pub uri: String,
    /// Display label of the classification, if any
    pub classification_label: Option<String>,
    /// Response status code, if a parsable response arrived
    pub status_code: Option<u16>,
}

/// Full exchange as served to the dashboard
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExchangeView {
    pub id: String,
    pub performed_at: DateTime<Utc>,
    /// Duration in milliseconds, null while in flight
    pub duration: Option<i64>,
    pub subdomain: Option<String>,
    pub request: RequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseView>,
}

/// Request half of [`ExchangeView`]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RequestView {
    /// Raw request, or `BINARY`
    pub raw: String,
    pub method: String,
    pub uri: String,
    #[schema(value_type = Vec<Vec<String>>)]
    pub headers: Vec<(String, String)>,
    /// Request body, or `BINARY`
    pub body: String,
    #[schema(value_type = Vec<Vec<String>>)]
    pub query: Vec<(String, String)>,
    pub post: Vec<PostField>,
    pub curl: String,
    pub classification: Option<ClassificationResult>,
}

/// Response half of [`ExchangeView`]
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResponseView {
    /// Raw response, or `BINARY`
    pub raw: String,
    pub status: Option<u16>,
    pub reason: Option<String>,
    #[schema(value_type = Vec<Vec<String>>)]
    pub headers: Vec<(String, String)>,
    /// Response body, or `BINARY`
    pub body: String,
}

/// One submitted form/JSON field
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PostField {
    pub name: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(raw: &[u8]) -> Exchange {
        Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None)
    }

    #[test]
    fn test_id_taken_from_correlation_header() {
        let ex = exchange(b"GET / HTTP/1.1\r\nX-Localup-Request-Id: abc-123\r\n\r\n");
        assert_eq!(ex.id(), "abc-123");
    }

    #[test]
    fn test_id_generated_when_header_missing() {
        let a = exchange(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        let b = exchange(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");

        assert!(uuid::Uuid::parse_str(a.id()).is_ok());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_subdomain_detection() {
        let ex = exchange(b"GET / HTTP/1.1\r\nX-Original-Host: myapp.localup.dev\r\n\r\n");
        assert_eq!(ex.subdomain(), Some("myapp.localup.dev"));

        let raw = b"GET / HTTP/1.1\r\n\r\n";
        let ex = Exchange::new(
            raw.to_vec(),
            ParsedRequest::parse(raw).unwrap(),
            Some("fallback".to_string()),
        );
        assert_eq!(ex.subdomain(), Some("fallback"));
    }

    #[test]
    fn test_stop_time_set_once() {
        let mut ex = exchange(b"GET / HTTP/1.1\r\n\r\n");
        assert!(ex.duration_ms().is_none());

        ex.set_response(Response::from_raw(b"HTTP/1.1 200 OK\r\n\r\n".to_vec()));
        let first_stop = ex.stop_time();
        assert!(first_stop.is_some());

        ex.set_response(Response::from_raw(b"HTTP/1.1 500 Oops\r\n\r\n".to_vec()));
        assert_eq!(ex.stop_time(), first_stop);
        assert_eq!(ex.response().unwrap().status_code(), Some(500));
    }

    #[test]
    fn test_malformed_response_has_no_status() {
        let response = Response::from_raw(b"\x00garbage".to_vec());
        assert_eq!(response.status_code(), None);
        assert_eq!(response.raw_response(), b"\x00garbage");
    }

    #[test]
    fn test_refresh_id_rewrites_header() {
        let raw = b"GET /x HTTP/1.1\r\nHost: a\r\nx-localup-request-id: original\r\n\r\n";
        let mut ex = exchange(raw);

        let new_id = ex.refresh_id();

        assert_ne!(new_id, "original");
        assert_eq!(ex.id(), new_id);
        assert_eq!(ex.request().header(REQUEST_ID_HEADER), Some(new_id.as_str()));
        let expected = format!(
            "GET /x HTTP/1.1\r\nHost: a\r\nx-localup-request-id: {}\r\n\r\n",
            new_id
        );
        assert_eq!(ex.raw_request(), expected.as_bytes());
    }

    #[test]
    fn test_binary_detection() {
        assert!(!is_binary(b"GET / HTTP/1.1\r\n\tok\n"));
        assert!(is_binary(b"abc\x00def"));
        assert!(is_binary(&[0xff]));
    }

    #[test]
    fn test_binary_request_renders_placeholder() {
        let ex = exchange(b"POST /upload HTTP/1.1\r\nContent-Length: 3\r\n\r\na\x00b");

        let view = ex.view();
        assert_eq!(view.request.raw, BINARY_PLACEHOLDER);
        assert_eq!(view.request.body, BINARY_PLACEHOLDER);
        assert!(view.request.curl.is_empty());

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("\\u0000"));
    }

    #[test]
    fn test_post_fields_from_form_and_json() {
        let form = exchange(
            b"POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 11\r\n\r\na=1&b=hello",
        );
        let fields = form.view().request.post;
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].name, "b");
        assert_eq!(fields[1].value, serde_json::json!("hello"));

        let json = exchange(
            b"POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"key\":\"val\"}",
        );
        let fields = json.view().request.post;
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "key");
    }

    #[test]
    fn test_curl_command() {
        let ex = exchange(
            b"POST /hook HTTP/1.1\r\nHost: example.com\r\nContent-Length: 7\r\n\r\nit's ok",
        );

        assert_eq!(
            ex.curl_command(),
            "curl 'http://example.com/hook' -X POST -H 'Host: example.com' -d 'it'\\''s ok'"
        );
    }

    #[test]
    fn test_summary_fields() {
        let mut ex = exchange(b"DELETE /items/1 HTTP/1.1\r\n\r\n");
        ex.set_response(Response::from_raw(b"HTTP/1.1 204 No Content\r\n\r\n".to_vec()));

        let summary = ex.summary();
        assert_eq!(summary.method, "DELETE");
        assert_eq!(summary.uri, "/items/1");
        assert_eq!(summary.status_code, Some(204));
        assert!(summary.duration.is_some());
        assert!(summary.classification_label.is_none());
    }
}
