//! GitHub webhook deliveries

use super::{array_len, field, json_body, text_field, ClassificationResult, ClassifyError, RequestMatcher};
use crate::exchange::Exchange;

const EVENT_HEADER: &str = "x-github-event";

/// Claims requests whose user agent contains `GitHub-Hook` and that carry `x-github-event`
#[derive(Debug, Default, Clone, Copy)]
pub struct GitHubMatcher;

impl RequestMatcher for GitHubMatcher {
    fn name(&self) -> &str {
        "github"
    }

    fn matches(&self, exchange: &Exchange) -> bool {
        let request = exchange.request();
        request
            .header("user-agent")
            .is_some_and(|ua| ua.contains("GitHub-Hook"))
            && request.has_header(EVENT_HEADER)
    }

    fn classify(&self, exchange: &Exchange) -> Result<ClassificationResult, ClassifyError> {
        let event = exchange
            .request()
            .header(EVENT_HEADER)
            .ok_or_else(|| ClassifyError::MissingField(EVENT_HEADER.to_string()))?
            .to_string();
        let payload = json_body(exchange)?;

        // Events with an action are labelled "event.action"
        let label = match payload.get("action").and_then(|a| a.as_str()) {
            Some(action) => format!("{}.{}", event, action),
            None => event.clone(),
        };
        let result = ClassificationResult::new(self.name(), label);

        match event.as_str() {
            "push" => push_details(result, &payload),
            "pull_request" => pull_request_details(result, &payload),
            "issues" => issue_details(result, &payload),
            "ping" => ping_details(result, &payload),
            other => Ok(result.with_detail(
                format!("Unsupported event: {}", other),
                "This event is not supported yet.",
            )),
        }
    }
}

fn push_details(
    result: ClassificationResult,
    payload: &serde_json::Value,
) -> Result<ClassificationResult, ClassifyError> {
    let repository = text_field(payload, "repository.full_name")?;
    let branch = text_field(payload, "ref")?;
    let author = person(payload, "pusher")
        .ok_or_else(|| ClassifyError::MissingField("pusher.name".to_string()))?;

    let mut result = result
        .with_detail("Repository", repository)
        .with_detail("Branch", branch)
        .with_detail("Author", author);

    if let Ok(compare) = text_field(payload, "compare") {
        result = result.with_detail("Compare", compare);
    }

    // Deleted branches carry no head commit
    if field(payload, "head_commit").is_ok_and(|c| !c.is_null()) {
        let commit = format!(
            "{} ({} files added, {} files removed, {} files modified)",
            text_field(payload, "head_commit.message")?,
            array_len(payload, "head_commit.added")?,
            array_len(payload, "head_commit.removed")?,
            array_len(payload, "head_commit.modified")?
        );
        result = result.with_detail("Commit", commit);
    }

    Ok(result)
}

/// "name <email>" of a person object, or just the name when it has no email
fn person(payload: &serde_json::Value, path: &str) -> Option<String> {
    let name = text_field(payload, &format!("{}.name", path)).ok()?;
    match text_field(payload, &format!("{}.email", path)) {
        Ok(email) => Some(format!("{} <{}>", name, email)),
        Err(_) => Some(name),
    }
}

fn pull_request_details(
    result: ClassificationResult,
    payload: &serde_json::Value,
) -> Result<ClassificationResult, ClassifyError> {
    Ok(result
        .with_detail("Repository", text_field(payload, "repository.full_name")?)
        .with_detail(
            "Pull Request",
            format!(
                "#{} {}",
                text_field(payload, "pull_request.number")?,
                text_field(payload, "pull_request.title")?
            ),
        )
        .with_detail("Author", text_field(payload, "pull_request.user.login")?)
        .with_detail(
            "Branch",
            format!(
                "{} -> {}",
                text_field(payload, "pull_request.head.ref")?,
                text_field(payload, "pull_request.base.ref")?
            ),
        )
        .with_detail("URL", text_field(payload, "pull_request.html_url")?))
}

fn issue_details(
    result: ClassificationResult,
    payload: &serde_json::Value,
) -> Result<ClassificationResult, ClassifyError> {
    Ok(result
        .with_detail("Repository", text_field(payload, "repository.full_name")?)
        .with_detail(
            "Issue",
            format!(
                "#{} {}",
                text_field(payload, "issue.number")?,
                text_field(payload, "issue.title")?
            ),
        )
        .with_detail("Author", text_field(payload, "issue.user.login")?)
        .with_detail("URL", text_field(payload, "issue.html_url")?))
}

fn ping_details(
    result: ClassificationResult,
    payload: &serde_json::Value,
) -> Result<ClassificationResult, ClassifyError> {
    let events = field(payload, "hook.events")?
        .as_array()
        .ok_or_else(|| ClassifyError::MissingField("hook.events".to_string()))?
        .iter()
        .filter_map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut result = result
        .with_detail("Hook ID", text_field(payload, "hook_id")?)
        .with_detail("Hook Name", text_field(payload, "hook.name")?);

    // Organization hooks have no repository
    if let Ok(repository) = text_field(payload, "repository.full_name") {
        result = result.with_detail("Repository", repository);
    }

    Ok(result.with_detail("Hook Events", events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_parser::ParsedRequest;

    fn delivery(event: &str, body: &str) -> Exchange {
        let raw = format!(
            "POST /webhooks HTTP/1.1\r\nHost: app.localup.dev\r\nUser-Agent: GitHub-Hookshot/abc123\r\nX-GitHub-Event: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            event,
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
    fn test_matches_requires_user_agent_and_event() {
        assert!(GitHubMatcher.matches(&delivery("push", "{}")));

        let raw = b"POST / HTTP/1.1\r\nUser-Agent: curl/8.0\r\nX-GitHub-Event: push\r\n\r\n";
        let ex = Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None);
        assert!(!GitHubMatcher.matches(&ex));

        let raw = b"POST / HTTP/1.1\r\nUser-Agent: GitHub-Hookshot/1\r\n\r\n";
        let ex = Exchange::new(raw.to_vec(), ParsedRequest::parse(raw).unwrap(), None);
        assert!(!GitHubMatcher.matches(&ex));
    }

    #[test]
    fn test_push_event() {
        let body = r#"{"ref":"refs/heads/main","compare":"https://github.com/org/repo/compare/a...b","repository":{"full_name":"org/repo"},"pusher":{"name":"octocat","email":"octo@example.com"},"head_commit":{"message":"Fix bug","added":["a.rs"],"removed":[],"modified":["b.rs","c.rs"]}}"#;

        let result = GitHubMatcher.classify(&delivery("push", body)).unwrap();

        assert_eq!(result.label, "push");
        assert!(!result.is_error);
        assert_eq!(result.detail("Repository"), Some("org/repo"));
        assert_eq!(result.detail("Branch"), Some("refs/heads/main"));
        assert_eq!(result.detail("Author"), Some("octocat <octo@example.com>"));
        assert_eq!(
            result.detail("Commit"),
            Some("Fix bug (1 files added, 0 files removed, 2 files modified)")
        );
        let keys: Vec<&str> = result.details.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["Repository", "Branch", "Author", "Compare", "Commit"]);
    }

    #[test]
    fn test_push_author_is_pusher() {
        let body = r#"{"repository":{"full_name":"org/repo"},"ref":"refs/heads/main","pusher":{"name":"A","email":"a@x.com"},"compare":"https://x","head_commit":{"message":"m","added":[],"removed":[],"modified":[]}}"#;

        let result = GitHubMatcher.classify(&delivery("push", body)).unwrap();

        assert_eq!(result.label, "push");
        assert_eq!(result.detail("Repository"), Some("org/repo"));
        assert_eq!(result.detail("Author"), Some("A <a@x.com>"));
        assert_eq!(result.detail("Compare"), Some("https://x"));
        assert!(result.detail("Pusher").is_none());
    }

    #[test]
    fn test_pull_request_event_uses_action_label() {
        let body = r#"{"action":"opened","repository":{"full_name":"org/repo"},"pull_request":{"number":42,"title":"Add feature","user":{"login":"octocat"},"head":{"ref":"feature"},"base":{"ref":"main"},"html_url":"https://github.com/org/repo/pull/42"}}"#;

        let result = GitHubMatcher.classify(&delivery("pull_request", body)).unwrap();

        assert_eq!(result.label, "pull_request.opened");
        assert_eq!(result.detail("Pull Request"), Some("#42 Add feature"));
        assert_eq!(result.detail("Branch"), Some("feature -> main"));
    }

    #[test]
    fn test_ping_event() {
        let body = r#"{"zen":"Keep it simple.","hook_id":7,"hook":{"name":"web","events":["push","issues"]},"repository":{"full_name":"org/repo"}}"#;

        let result = GitHubMatcher.classify(&delivery("ping", body)).unwrap();

        assert_eq!(result.label, "ping");
        assert_eq!(result.detail("Hook ID"), Some("7"));
        assert_eq!(result.detail("Hook Name"), Some("web"));
        assert_eq!(result.detail("Repository"), Some("org/repo"));
        assert_eq!(result.detail("Hook Events"), Some("push, issues"));
        assert!(result.detail("Zen").is_none());
    }

    #[test]
    fn test_unsupported_event() {
        let result = GitHubMatcher.classify(&delivery("star", r#"{"action":"created"}"#)).unwrap();

        assert_eq!(result.label, "star.created");
        assert_eq!(
            result.detail("Unsupported event: star"),
            Some("This event is not supported yet.")
        );
    }

    #[test]
    fn test_push_missing_field_is_error() {
        let err = GitHubMatcher
            .classify(&delivery("push", r#"{"ref":"refs/heads/main"}"#))
            .unwrap_err();
        assert_eq!(err.location(), "repository.full_name");
    }
}
