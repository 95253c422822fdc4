//! HTTP retry helpers for transient errors.
//!
//! Every outbound call to the geospatial index or the metric store goes
//! through [`send`] or [`send_json`] so it gets exponential backoff on
//! timeouts, connection failures, HTTP 429, and HTTP 5xx. Other 4xx
//! responses are permanent and returned immediately.
//!
//! ```ignore
//! let body: Vec<Row> = retry::send_json(&policy, || client.post(&url).json(&payload)).await?;
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 500;

/// Errors from a retried HTTP request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Transport-level failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// Body could not be decoded as the expected JSON shape.
    #[error("JSON parse failed: {source} (body preview: {preview})")]
    Json {
        /// Underlying parse error.
        source: serde_json::Error,
        /// Truncated response body.
        preview: String,
    },
}

impl RequestError {
    /// HTTP status, when the server responded.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(_) | Self::Json { .. } => None,
        }
    }
}

/// Retry schedule and per-request timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_backoff: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    /// 5 retries backing off 2s, 4s, 8s, 16s, 32s with a 60s timeout.
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(2),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no backoff.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
            timeout: Duration::from_secs(60),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1u32 << exponent)
    }
}

fn preview(body: &str) -> String {
    if body.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

/// Sends the request built by `build_request`, retrying on transient
/// errors. Returns the successful (2xx/3xx) response.
///
/// `build_request` is called on every attempt since builders are consumed
/// by `.send()`.
///
/// # Errors
///
/// Returns [`RequestError`] if the request fails after all retries or the
/// server returns a non-retryable status.
#[allow(clippy::future_not_send)]
pub async fn send<F>(policy: &RetryPolicy, build_request: F) -> Result<reqwest::Response, RequestError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        let error = match build_request().timeout(policy.timeout).send().await {
            Err(e) if is_transient(&e) => RequestError::Http(e),
            Err(e) => return Err(RequestError::Http(e)),
            Ok(response) => {
                let status = response.status();
                if !is_retryable_status(status) && !status.is_client_error() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                let error = RequestError::Status {
                    status: status.as_u16(),
                    body: preview(&body),
                };
                // Other 4xx responses are permanent
                if !is_retryable_status(status) {
                    return Err(error);
                }
                error
            }
        };

        if attempt >= policy.max_retries {
            if policy.max_retries > 0 {
                log::warn!("  giving up after {} retries: {error}", policy.max_retries);
            }
            return Err(error);
        }
        attempt += 1;
        let delay = policy.backoff(attempt);
        log::warn!(
            "  transient error: {error}; retry {attempt}/{} in {delay:?}...",
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
    }
}

/// Sends a request and parses the response body as JSON of type `T`.
///
/// # Errors
///
/// Returns [`RequestError`] if the request fails after all retries or
/// the body is not valid JSON of the expected shape.
#[allow(clippy::future_not_send)]
pub async fn send_json<T, F>(policy: &RetryPolicy, build_request: F) -> Result<T, RequestError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send(policy, build_request).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|source| RequestError::Json {
        source,
        preview: preview(&text),
    })
}

/// Returns `true` for statuses worth retrying: 429 and 5xx.
#[must_use]
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
    }

    #[test]
    fn none_policy_never_waits() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(reqwest::StatusCode::OK));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let body = "é".repeat(400);
        let p = preview(&body);
        assert!(p.ends_with("..."));
        assert!(p.len() <= BODY_PREVIEW_LEN + 3);
    }

    #[test]
    fn status_error_exposes_code() {
        let err = RequestError::Status {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.status(), Some(503));
    }
}
