//! Error taxonomy for the analysis pipeline.
//!
//! Remote failures are split into retryable (network, rate limit) and permanent
//! (not found, forbidden, malformed). Classification failures never leave a
//! single item; synthesis and watchlist failures are surfaced to the caller.

use thiserror::Error;

/// Failure talking to the content source (subreddit listings / about records).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("malformed upstream payload: {0}")]
    Malformed(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<FetchError> },
}

impl FetchError {
    /// Only network hiccups and rate limits are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::RateLimited)
    }

    /// True for errors that mean "this source does not exist for us".
    pub fn is_permanent_rejection(&self) -> bool {
        matches!(self, FetchError::NotFound(_) | FetchError::Forbidden(_))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}

/// Failure of a single language-model call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle disabled")]
    Disabled,

    #[error("oracle api key missing")]
    MissingApiKey,

    #[error("oracle transport error: {0}")]
    Transport(String),

    #[error("oracle returned HTTP {0}")]
    Status(u16),

    #[error("oracle returned an empty completion")]
    EmptyResponse,

    #[error("oracle daily limit of {0} calls reached")]
    DailyLimit(u32),
}

/// Per-item classification failure. Absorbed by the batch scheduler.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("classification does not match schema: {0}")]
    Schema(String),

    #[error("classification timed out")]
    Timeout,
}

/// Idea synthesis failure. Fatal for the idea request only.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("invalid synthesis response: {0}")]
    InvalidResponse(String),
}

/// Watchlist mutation failure.
#[derive(Debug, Error)]
pub enum WatchlistError {
    #[error("could not validate subreddit: {0}")]
    Validation(#[from] FetchError),

    #[error("watchlist storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for WatchlistError {
    fn from(e: std::io::Error) -> Self {
        WatchlistError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for WatchlistError {
    fn from(e: serde_json::Error) -> Self {
        WatchlistError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split() {
        assert!(FetchError::Transient("reset".into()).is_retryable());
        assert!(FetchError::RateLimited.is_retryable());
        assert!(!FetchError::NotFound("x".into()).is_retryable());
        assert!(!FetchError::Forbidden("x".into()).is_retryable());
        assert!(!FetchError::Malformed("x".into()).is_retryable());
    }

    #[test]
    fn exhausted_message_carries_last_error() {
        let e = FetchError::Exhausted {
            attempts: 4,
            last: Box::new(FetchError::RateLimited),
        };
        assert_eq!(e.to_string(), "gave up after 4 attempts: rate limited by upstream");
        assert!(!e.is_retryable());
    }
}
