//! Exchange error types with an explicit retry classification.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by an [`ExchangeClient`](super::ExchangeClient).
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Connection dropped or reset before a response arrived.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request did not complete within the configured timeout.
    #[error("Request timeout")]
    Timeout,

    /// Venue reported it is temporarily unavailable or overloaded.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Venue answered with a body that is not JSON (maintenance pages, proxies).
    #[error("Unexpected content type '{content_type}' (status {status})")]
    UnexpectedContentType { status: u16, content_type: String },

    /// Order rejected because the account cannot cover it.
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    /// Order rejected by venue-side validation (lot size, precision, notional).
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Credentials refused or request signature invalid.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Any other error code reported by the venue.
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Response could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ExchangeError {
    /// Whether the failed call may succeed if repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Transport(_)
                | ExchangeError::Timeout
                | ExchangeError::Unavailable(_)
                | ExchangeError::UnexpectedContentType { .. }
        )
    }

    /// Classify a non-success HTTP status that carried no venue error body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("{} - {}", status, truncate(body, 200));
        match status {
            StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::BAD_GATEWAY
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS => ExchangeError::Unavailable(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExchangeError::Auth(message),
            s if s.is_server_error() => ExchangeError::Unavailable(message),
            _ => ExchangeError::Api {
                code: i64::from(status.as_u16()),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            ExchangeError::Transport(err.to_string())
        } else if err.is_decode() {
            ExchangeError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            ExchangeError::from_status(status, "")
        } else {
            ExchangeError::Transport(err.to_string())
        }
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
