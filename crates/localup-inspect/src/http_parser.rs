//! HTTP/1.x request and response parsing using httparse.
//!
//! Captured traffic arrives as raw bytes. This module derives the structured
//! view of a request (method, URI, ordered headers, query, body) without ever
//! touching the raw buffer, extracts the status line of a response, and
//! provides the incremental response parser used when replayed requests are
//! read back from the local target.

use thiserror::Error;
use tracing::debug;

/// Maximum number of headers to parse
const MAX_HEADERS: usize = 100;

/// Errors produced while parsing raw HTTP bytes
#[derive(Debug, Error)]
pub enum ParseError {
    /// The head section (start line + headers) is not terminated yet
    #[error("Incomplete HTTP message")]
    Incomplete,

    /// The bytes are not a valid HTTP/1.x message
    #[error("Invalid HTTP message: {0}")]
    Invalid(#[from] httparse::Error),
}

/// Structured view of a captured request
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: String,
    /// Request URI as sent on the request line (path + query)
    pub uri: String,
    /// HTTP minor version
    pub version: u8,
    /// Request headers in wire order, duplicates preserved
    pub headers: Vec<(String, String)>,
    /// Decoded query string pairs
    pub query: Vec<(String, String)>,
    /// Request body (de-chunked when chunked transfer encoding is used)
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Parse a complete raw request
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let header_len = match req.parse(raw)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(ParseError::Incomplete),
        };

        let method = req.method.unwrap_or("").to_string();
        let uri = req.path.unwrap_or("").to_string();
        let version = req.version.unwrap_or(1);

        let mut parsed_headers = Vec::with_capacity(req.headers.len());
        let mut content_length = None;
        let mut is_chunked = false;

        for header in req.headers.iter() {
            let name = header.name.to_string();
            let value = String::from_utf8_lossy(header.value).to_string();

            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
            if name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_lowercase().contains("chunked")
            {
                is_chunked = true;
            }

            parsed_headers.push((name, value));
        }

        let remaining = &raw[header_len..];
        let body = if is_chunked {
            decode_chunked_body(remaining)
        } else if let Some(content_length) = content_length {
            remaining[..content_length.min(remaining.len())].to_vec()
        } else {
            remaining.to_vec()
        };

        debug!(
            "Parsed HTTP request: {} {} ({} headers, body {} bytes)",
            method,
            uri,
            parsed_headers.len(),
            body.len()
        );

        Ok(Self {
            query: parse_query(&uri),
            method,
            uri,
            version,
            headers: parsed_headers,
            body,
        })
    }

    /// Request known only by its request line (no headers, no body)
    pub fn minimal(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_string(),
            uri: uri.to_string(),
            version: 1,
            headers: Vec::new(),
            query: parse_query(uri),
            body: Vec::new(),
        }
    }

    /// First value of a header, looked up case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replace every occurrence of a header with a single value, or append it
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(first) => {
                self.headers[first].1 = value.to_string();
                let mut index = 0;
                self.headers.retain(|(k, _)| {
                    let keep = index <= first || !k.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Media type of the body, lowercased and without parameters
    pub fn content_type(&self) -> Option<String> {
        self.header("content-type").map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Status line of a captured response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP minor version
    pub version: u8,
    /// Reason phrase
    pub reason: String,
    /// Response headers in wire order
    pub headers: Vec<(String, String)>,
    /// Total bytes consumed by the status line and headers (including \r\n\r\n)
    pub header_len: usize,
    /// Expected body length (from Content-Length), None if unknown
    pub content_length: Option<usize>,
    /// Whether using chunked transfer encoding
    pub is_chunked: bool,
    /// Whether this response has no body (1xx, 204, 304)
    pub no_body: bool,
}

impl ParsedResponse {
    /// Parse the head of a raw response
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let header_len = match resp.parse(raw)? {
            httparse::Status::Complete(len) => len,
            httparse::Status::Partial => return Err(ParseError::Incomplete),
        };

        let status = resp.code.unwrap_or(0);
        let version = resp.version.unwrap_or(1);
        let reason = resp.reason.unwrap_or("").to_string();

        let mut parsed_headers = Vec::with_capacity(resp.headers.len());
        let mut content_length = None;
        let mut is_chunked = false;

        for header in resp.headers.iter() {
            let name = header.name.to_string();
            let value = String::from_utf8_lossy(header.value).to_string();

            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok();
            }
            if name.eq_ignore_ascii_case("transfer-encoding")
                && value.to_lowercase().contains("chunked")
            {
                is_chunked = true;
            }

            parsed_headers.push((name, value));
        }

        // Determine if this response has no body per RFC 7230
        let no_body = matches!(status, 100..=199 | 204 | 304);

        Ok(Self {
            status,
            version,
            reason,
            headers: parsed_headers,
            header_len,
            content_length,
            is_chunked,
            no_body,
        })
    }

    /// Decoded response body of the given raw response
    pub fn body(&self, raw: &[u8]) -> Vec<u8> {
        let remaining = raw.get(self.header_len..).unwrap_or_default();
        if self.is_chunked {
            decode_chunked_body(remaining)
        } else if let Some(content_length) = self.content_length {
            remaining[..content_length.min(remaining.len())].to_vec()
        } else {
            remaining.to_vec()
        }
    }
}

/// Incremental HTTP response parser
///
/// Used to read a replayed request's response off a raw TCP stream and decide
/// when it is complete.
#[derive(Debug)]
pub struct HttpResponseParser {
    /// Buffer for accumulating response data
    buffer: Vec<u8>,
    /// Parsed response (once headers are complete)
    parsed: Option<ParsedResponse>,
    /// Body bytes received so far
    body_received: usize,
    /// Whether the response is fully received
    complete: bool,
    /// Timestamp when data was last received (for idle timeout)
    last_data_time: Option<std::time::Instant>,
}

impl HttpResponseParser {
    /// Idle timeout for responses with unknown length (100ms)
    const IDLE_TIMEOUT_MS: u64 = 100;

    /// Create a new response parser
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            parsed: None,
            body_received: 0,
            complete: false,
            last_data_time: None,
        }
    }

    /// Feed data to the parser. Returns number of bytes consumed.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        if self.complete {
            return 0;
        }

        self.last_data_time = Some(std::time::Instant::now());
        self.buffer.extend_from_slice(data);

        if self.parsed.is_none() {
            match ParsedResponse::parse(&self.buffer) {
                Ok(parsed) => {
                    self.body_received = self.buffer.len() - parsed.header_len;

                    if parsed.no_body {
                        // 1xx, 204, 304 have no body
                        self.complete = true;
                    } else if let Some(content_length) = parsed.content_length {
                        self.complete = self.body_received >= content_length;
                    } else if parsed.is_chunked {
                        self.complete =
                            check_chunked_complete(&self.buffer[parsed.header_len..]);
                    } else if self.body_received == 0 {
                        // Headers ended at chunk boundary with no body
                        self.complete = true;
                    }

                    self.parsed = Some(parsed);
                }
                Err(ParseError::Incomplete) => {}
                Err(e) => {
                    debug!("HTTP response parse error: {}", e);
                }
            }
        } else if let Some(ref parsed) = self.parsed {
            self.body_received += data.len();
            if parsed.is_chunked {
                self.complete = check_chunked_complete(&self.buffer[parsed.header_len..]);
            } else if let Some(content_length) = parsed.content_length {
                self.complete = self.body_received >= content_length;
            }
        }

        data.len()
    }

    /// Check if response is complete
    pub fn is_complete(&self) -> bool {
        if self.complete {
            return true;
        }

        if self.parsed.is_none() {
            return false;
        }

        // Fallback for bodies without usable length information
        if self.body_received > 0 {
            if let Some(last_time) = self.last_data_time {
                let elapsed_ms = last_time.elapsed().as_millis() as u64;
                if elapsed_ms >= Self::IDLE_TIMEOUT_MS {
                    debug!(
                        "Response considered complete due to idle timeout ({}ms since last data)",
                        elapsed_ms
                    );
                    return true;
                }
            }
        }

        false
    }

    /// Get parsed response (if headers are complete)
    pub fn parsed(&self) -> Option<&ParsedResponse> {
        self.parsed.as_ref()
    }

    /// Everything received so far, head included
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for HttpResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble a raw request from discrete fields: request line, headers in the
/// order supplied, blank line, body.
pub fn build_raw_request(
    method: &str,
    uri: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut raw = format!("{} {} HTTP/1.1\r\n", method, uri).into_bytes();
    for (name, value) in headers {
        raw.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
    }
    raw.extend_from_slice(b"\r\n");
    raw.extend_from_slice(body);
    raw
}

/// Rewrite the value of one header inside raw request bytes.
///
/// The first occurrence keeps its position and only its value changes; any
/// further occurrences are removed. When the header is absent it is inserted
/// right after the request line. Bytes without a terminated head section are
/// returned unchanged.
pub fn set_raw_header(raw: &[u8], name: &str, value: &str) -> Vec<u8> {
    let Some(head_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return raw.to_vec();
    };

    let (head, tail) = raw.split_at(head_end);
    let mut lines = split_crlf(head);
    let mut replaced = false;
    let mut index = 1;

    while index < lines.len() {
        let line = &lines[index];
        let colon = line.iter().position(|b| *b == b':').filter(|&colon| {
            String::from_utf8_lossy(&line[..colon])
                .trim()
                .eq_ignore_ascii_case(name)
        });

        let Some(colon) = colon else {
            index += 1;
            continue;
        };

        if replaced {
            lines.remove(index);
        } else {
            let mut rewritten = line[..colon].to_vec();
            rewritten.extend_from_slice(b": ");
            rewritten.extend_from_slice(value.as_bytes());
            lines[index] = rewritten;
            replaced = true;
            index += 1;
        }
    }

    if !replaced {
        let insert_at = 1.min(lines.len());
        lines.insert(insert_at, format!("{}: {}", name, value).into_bytes());
    }

    let mut out = lines.join(&b"\r\n"[..]);
    out.extend_from_slice(tail);
    out
}

fn split_crlf(bytes: &[u8]) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(offset) = bytes[start..].windows(2).position(|w| w == b"\r\n") {
        lines.push(bytes[start..start + offset].to_vec());
        start += offset + 2;
    }
    lines.push(bytes[start..].to_vec());
    lines
}

fn parse_query(uri: &str) -> Vec<(String, String)> {
    match uri.split_once('?') {
        Some((_, query)) => url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect(),
        None => Vec::new(),
    }
}

/// Decode chunked transfer encoding body
/// Parses format: SIZE\r\n...DATA...\r\n...SIZE\r\n...DATA...\r\n0\r\n\r\n
fn decode_chunked_body(chunked_data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    let mut pos = 0;

    while pos < chunked_data.len() {
        // Find the chunk size line (ends with \r\n)
        let size_end = match chunked_data[pos..].windows(2).position(|w| w == b"\r\n") {
            Some(p) => pos + p,
            None => break,
        };

        let size_str = match std::str::from_utf8(&chunked_data[pos..size_end]) {
            Ok(s) => s.split(';').next().unwrap_or("").trim(), // Handle chunk extensions
            Err(_) => break,
        };

        let chunk_size = match usize::from_str_radix(size_str, 16) {
            Ok(0) => break, // Final chunk
            Ok(size) => size,
            Err(_) => break,
        };

        pos = size_end + 2;

        if pos + chunk_size <= chunked_data.len() {
            decoded.extend_from_slice(&chunked_data[pos..pos + chunk_size]);
            pos += chunk_size;
        } else {
            // Incomplete chunk - take what we have
            decoded.extend_from_slice(&chunked_data[pos..]);
            break;
        }

        if pos + 2 <= chunked_data.len() && &chunked_data[pos..pos + 2] == b"\r\n" {
            pos += 2;
        }
    }

    decoded
}

/// Check if chunked transfer is complete
fn check_chunked_complete(body: &[u8]) -> bool {
    // Simple check: look for "0\r\n\r\n" pattern indicating final chunk
    if body.len() >= 5 {
        let end = &body[body.len().saturating_sub(5)..];
        if end == b"0\r\n\r\n" {
            return true;
        }
    }

    // Also check for "0\r\n" followed by "\r\n"
    body.windows(3)
        .position(|w| w == b"0\r\n")
        .map(|pos| {
            let after = &body[pos + 3..];
            after.windows(2).any(|w| w == b"\r\n")
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_request() {
        let parsed =
            ParsedRequest::parse(b"GET /path?a=1&b=two%20words HTTP/1.1\r\nHost: example.com\r\n\r\n")
                .unwrap();

        assert_eq!(parsed.method, "GET");
        assert_eq!(parsed.uri, "/path?a=1&b=two%20words");
        assert_eq!(parsed.header("host"), Some("example.com"));
        assert_eq!(
            parsed.query,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string())
            ]
        );
        assert!(parsed.body.is_empty());
    }

    #[test]
    fn test_parse_request_with_body() {
        let parsed = ParsedRequest::parse(
            b"POST /api HTTP/1.1\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: 13\r\n\r\n{\"key\":\"val\"}",
        )
        .unwrap();

        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.body, b"{\"key\":\"val\"}");
        assert_eq!(parsed.content_type().as_deref(), Some("application/json"));
    }

    #[test]
    fn test_parse_chunked_request_body() {
        let parsed = ParsedRequest::parse(
            b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap();

        assert_eq!(parsed.body, b"hello world");
    }

    #[test]
    fn test_parse_incomplete_request() {
        let result = ParsedRequest::parse(b"GET /path HTTP/1.1\r\nHost: exa");
        assert!(matches!(result, Err(ParseError::Incomplete)));
    }

    #[test]
    fn test_set_header_replaces_duplicates() {
        let mut parsed =
            ParsedRequest::parse(b"GET / HTTP/1.1\r\nX-Id: a\r\nAccept: */*\r\nx-id: b\r\n\r\n")
                .unwrap();

        parsed.set_header("x-id", "c");

        assert_eq!(
            parsed.headers,
            vec![
                ("X-Id".to_string(), "c".to_string()),
                ("Accept".to_string(), "*/*".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_simple_response() {
        let parsed = ParsedResponse::parse(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();

        assert_eq!(parsed.status, 200);
        assert_eq!(parsed.reason, "OK");
        assert_eq!(parsed.body(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"), b"hello");
    }

    #[test]
    fn test_parse_garbage_response() {
        assert!(ParsedResponse::parse(b"\x00\x01 not http").is_err());
    }

    #[test]
    fn test_incremental_parsing() {
        let mut parser = HttpResponseParser::new();

        parser.feed(b"HTTP/1.1 200 OK\r\n");
        assert!(!parser.is_complete());
        assert!(parser.parsed().is_none());

        parser.feed(b"Content-Length: 5\r\n\r\n");
        assert!(!parser.is_complete()); // Headers complete but no body yet
        assert!(parser.parsed().is_some());

        parser.feed(b"hello");
        assert!(parser.is_complete());
        assert_eq!(
            parser.into_bytes(),
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec()
        );
    }

    #[test]
    fn test_parse_204_no_content() {
        let mut parser = HttpResponseParser::new();
        parser.feed(b"HTTP/1.1 204 No Content\r\n\r\n");

        assert!(parser.is_complete());
        assert!(parser.parsed().unwrap().no_body);
    }

    #[test]
    fn test_parse_chunked_response() {
        let mut parser = HttpResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n");

        assert!(parser.is_complete());
        assert!(parser.parsed().unwrap().is_chunked);
    }

    #[test]
    fn test_build_raw_request_keeps_header_order() {
        let raw = build_raw_request(
            "POST",
            "/hook",
            &[
                ("Zeta".to_string(), "1".to_string()),
                ("Alpha".to_string(), "2".to_string()),
            ],
            b"{}",
        );

        assert_eq!(raw, b"POST /hook HTTP/1.1\r\nZeta: 1\r\nAlpha: 2\r\n\r\n{}".to_vec());
    }

    #[test]
    fn test_set_raw_header_rewrites_only_the_value() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\nX-Localup-Request-Id: old\r\n\r\nbody";

        let rewritten = set_raw_header(raw, "x-localup-request-id", "new");

        assert_eq!(
            rewritten,
            b"GET / HTTP/1.1\r\nHost: a\r\nX-Localup-Request-Id: new\r\n\r\nbody".to_vec()
        );
    }

    #[test]
    fn test_set_raw_header_inserts_when_missing() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n";

        let rewritten = set_raw_header(raw, "x-localup-request-id", "new");

        assert_eq!(
            rewritten,
            b"GET / HTTP/1.1\r\nx-localup-request-id: new\r\nHost: a\r\n\r\n".to_vec()
        );
    }

    #[test]
    fn test_set_raw_header_drops_duplicates() {
        let raw = b"GET / HTTP/1.1\r\nx-localup-request-id: one\r\nHost: a\r\nX-Localup-Request-Id: two\r\n\r\n";

        let rewritten = set_raw_header(raw, "x-localup-request-id", "new");

        assert_eq!(
            rewritten,
            b"GET / HTTP/1.1\r\nx-localup-request-id: new\r\nHost: a\r\n\r\n".to_vec()
        );
        let parsed = ParsedRequest::parse(&rewritten).unwrap();
        assert_eq!(parsed.header("x-localup-request-id"), Some("new"));
    }
}
