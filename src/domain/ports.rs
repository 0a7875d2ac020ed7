/*
   This module specifies the API by which the delivery engine talks to the outside world:
   the HTTP transport it posts through and the time source it signs with.
*/

use async_trait::async_trait;
use reqwest::Url;
use time::OffsetDateTime;

/// HTTP status the receiver uses to report a signature mismatch.
pub const AUTH_REJECTED_STATUS: u16 = 403;

/// Error type for a single delivery or time-sync exchange
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Signature rejected by receiver (status {0})")]
    AuthRejected(u16),

    #[error("Receiver responded with status {0}")]
    HttpStatus(u16),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DeliveryError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        if status == AUTH_REJECTED_STATUS {
            DeliveryError::AuthRejected(status)
        } else {
            DeliveryError::HttpStatus(status)
        }
    }

    /// Numeric code reported with a permanent failure; 0 when no HTTP status applies.
    pub fn code(&self) -> u16 {
        match self {
            DeliveryError::AuthRejected(status) | DeliveryError::HttpStatus(status) => *status,
            _ => 0,
        }
    }

    pub fn is_auth_rejected(&self) -> bool {
        matches!(self, DeliveryError::AuthRejected(_))
    }

    /// Whether the shared retry budget applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeliveryError::TransportFailure(_)
                | DeliveryError::AuthRejected(_)
                | DeliveryError::HttpStatus(_)
        )
    }
}

/// Transport used to POST signed envelopes.
///
/// Implementations send `body` as `application/json` and return the raw response
/// body on a 2xx status. Non-success statuses map through
/// [`DeliveryError::from_status`].
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post_json(&self, url: &Url, body: Vec<u8>) -> Result<Vec<u8>, DeliveryError>;
}

/// Source of local wall-clock time.
pub trait TimeSource: Send + Sync {
    fn now_utc(&self) -> OffsetDateTime;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classifies_forbidden() {
        assert_eq!(DeliveryError::from_status(403), DeliveryError::AuthRejected(403));
        assert_eq!(DeliveryError::from_status(500), DeliveryError::HttpStatus(500));
        assert_eq!(DeliveryError::from_status(404), DeliveryError::HttpStatus(404));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DeliveryError::AuthRejected(403).code(), 403);
        assert_eq!(DeliveryError::HttpStatus(502).code(), 502);
        assert_eq!(DeliveryError::TransportFailure("dns".to_string()).code(), 0);
        assert_eq!(DeliveryError::ProtocolError("bad body".to_string()).code(), 0);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(DeliveryError::TransportFailure("reset".to_string()).is_retryable());
        assert!(DeliveryError::AuthRejected(403).is_retryable());
        assert!(DeliveryError::HttpStatus(503).is_retryable());
        assert!(!DeliveryError::ProtocolError("x".to_string()).is_retryable());
        assert!(!DeliveryError::Configuration("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DeliveryError::AuthRejected(403);
        assert_eq!(err.to_string(), "Signature rejected by receiver (status 403)");

        let err = DeliveryError::TransportFailure("connection refused".to_string());
        assert_eq!(err.to_string(), "Transport failure: connection refused");
    }
}
