use std::time::{Duration, SystemTime};

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backoff::{RetryPolicy, parse_retry_after};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("giving up after {attempts} attempts ({waited:?} spent waiting): {body}")]
    RetriesExhausted {
        attempts: u32,
        waited: Duration,
        status: Option<StatusCode>,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

impl RemoteError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            RemoteError::Api { status, .. } => Some(classify_api_status(*status)),
            RemoteError::RetriesExhausted {
                status: Some(status),
                ..
            } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    /// Terminal errors have already consumed the retry budget.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteError::RetriesExhausted { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            RemoteError::RetriesExhausted { status, .. } => *status,
            RemoteError::Request(err) => err.status(),
            _ => None,
        }
    }
}

pub(crate) fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

/// Sends the request built by `build` until it succeeds, fails permanently, or
/// `policy.max_attempts` is reached.
///
/// `build` is invoked once per attempt because a sent request cannot be reused.
pub async fn send_with_retry<F>(policy: &RetryPolicy, build: F) -> Result<Response, RemoteError>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;
    let mut waited = Duration::ZERO;
    loop {
        attempt += 1;
        let (delay, status, body) = match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| parse_retry_after(value, SystemTime::now()));
                let body = response.text().await.unwrap_or_default();
                match classify_api_status(status) {
                    ApiErrorClass::RateLimit => {
                        (policy.rate_limit_delay(retry_after), Some(status), body)
                    }
                    ApiErrorClass::Transient => {
                        (policy.transient_delay(attempt), Some(status), body)
                    }
                    ApiErrorClass::Auth | ApiErrorClass::Permanent => {
                        return Err(RemoteError::Api { status, body });
                    }
                }
            }
            Err(err) if err.is_timeout() || err.is_connect() => {
                (policy.transient_delay(attempt), None, err.to_string())
            }
            Err(err) => return Err(err.into()),
        };

        if attempt >= policy.max_attempts {
            warn!(attempts = attempt, ?status, "remote call failed, retries exhausted");
            return Err(RemoteError::RetriesExhausted {
                attempts: attempt,
                waited,
                status,
                body,
            });
        }
        debug!(attempt, ?status, ?delay, "remote call failed, retrying");
        tokio::time::sleep(delay).await;
        waited += delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::BAD_GATEWAY),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn exhausted_error_keeps_last_status() {
        let err = RemoteError::RetriesExhausted {
            attempts: 3,
            waited: Duration::from_secs(2),
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            body: "slow down".into(),
        };
        assert!(err.is_terminal());
        assert_eq!(err.classification(), Some(ApiErrorClass::RateLimit));
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    }
}
