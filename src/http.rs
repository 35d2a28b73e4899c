//! Request plumbing shared by the token manager and the channel session.

use std::time::Duration;

pub const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

const MAX_ERROR_BODY: usize = 512;

/// HTTP client with the bounded per-request timeout every call must carry
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("sensestream/", env!("CARGO_PKG_VERSION")))
        .build()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Read an error response body for diagnostics, bounded in size
pub async fn error_body(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    truncate(body.trim(), MAX_ERROR_BODY)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Base URL for a host reported by the service. Hosts without a scheme are
/// reached over HTTPS.
pub fn base_url(host: &str) -> String {
    if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_to_https() {
        assert_eq!(
            base_url("acct.ingest.snowflakecomputing.com"),
            "https://acct.ingest.snowflakecomputing.com"
        );
        assert_eq!(base_url("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "é".repeat(10);
        let truncated = truncate(&text, 5);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated, format!("{}...", "é".repeat(2)));
    }
}
