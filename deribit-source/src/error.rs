// Copyright (c) James Kassemi, SC, US. All rights reserved.

use thiserror::Error;

/// Deribit error code for "too_many_requests".
pub const RATE_LIMIT_ERROR_CODE: i64 = 10028;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("request timed out")]
    Timeout,
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("rate limited by exchange: {0}")]
    RateLimited(String),
    #[error("exchange error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("response carried no result")]
    MissingResult,
    #[error("response missing field {0}")]
    MissingField(&'static str),
}

impl SourceError {
    pub(crate) fn from_api(code: i64, message: String) -> Self {
        if code == RATE_LIMIT_ERROR_CODE {
            SourceError::RateLimited(message)
        } else {
            SourceError::Api { code, message }
        }
    }

    /// Transient failures worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Timeout | SourceError::RateLimited(_) => true,
            SourceError::HttpStatus(status) => *status >= 500,
            SourceError::Request(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_code_maps_to_rate_limited() {
        let err = SourceError::from_api(RATE_LIMIT_ERROR_CODE, "too_many_requests".into());
        assert!(err.is_rate_limit());
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(!SourceError::HttpStatus(400).is_retryable());
        assert!(SourceError::HttpStatus(503).is_retryable());
        assert!(!SourceError::from_api(10009, "not_enough_funds".into()).is_retryable());
        assert!(!SourceError::Malformed("bad".into()).is_retryable());
    }
}
