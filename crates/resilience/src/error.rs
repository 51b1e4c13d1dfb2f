//! Outbound call errors.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`crate::ServiceClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The destination's breaker is open; the call was never issued.
    #[error("circuit for '{destination}' is open")]
    CircuitOpen {
        destination: String,
        retry_after: Duration,
    },

    /// The call did not complete within its timeout.
    #[error("call to '{destination}' timed out after {timeout:?}")]
    Timeout {
        destination: String,
        timeout: Duration,
    },

    /// The destination refused or could not accept the connection.
    #[error("connection to '{destination}' refused: {reason}")]
    ConnectionRefused { destination: String, reason: String },

    /// Any other transport-level failure.
    #[error("transport error calling '{destination}': {reason}")]
    Transport { destination: String, reason: String },

    /// The destination answered with a non-success status.
    #[error("'{destination}' responded with HTTP {status}")]
    Http {
        destination: String,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded.
    #[error("could not decode response from '{destination}': {reason}")]
    Decode { destination: String, reason: String },

    /// No base URL is configured for the destination, or the request path
    /// could not be joined onto it.
    #[error("invalid destination '{0}'")]
    InvalidDestination(String),
}

impl ClientError {
    /// Returns true if this error says the destination is unhealthy.
    ///
    /// Timeouts, connection failures and 5xx responses count against the
    /// destination's breaker; 4xx responses are answers from a working
    /// service and do not.
    pub fn is_breaker_failure(&self) -> bool {
        match self {
            ClientError::Timeout { .. }
            | ClientError::ConnectionRefused { .. }
            | ClientError::Transport { .. } => true,
            ClientError::Http { status, .. } => *status >= 500,
            ClientError::CircuitOpen { .. }
            | ClientError::Decode { .. }
            | ClientError::InvalidDestination(_) => false,
        }
    }

    /// Returns the HTTP status if the destination answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the destination answered 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub(crate) fn from_reqwest(destination: &str, err: reqwest::Error, timeout: Duration) -> Self {
        let destination = destination.to_string();
        if err.is_timeout() {
            ClientError::Timeout {
                destination,
                timeout,
            }
        } else if err.is_connect() {
            ClientError::ConnectionRefused {
                destination,
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            ClientError::Decode {
                destination,
                reason: err.to_string(),
            }
        } else {
            ClientError::Transport {
                destination,
                reason: err.to_string(),
            }
        }
    }
}

/// Convenience type alias for client results.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> ClientError {
        ClientError::Http {
            destination: "ledger".into(),
            status,
            body: String::new(),
        }
    }

    #[test]
    fn test_breaker_classification() {
        assert!(http(500).is_breaker_failure());
        assert!(http(503).is_breaker_failure());
        assert!(!http(404).is_breaker_failure());
        assert!(!http(409).is_breaker_failure());
        assert!(
            ClientError::Timeout {
                destination: "ledger".into(),
                timeout: Duration::from_secs(1),
            }
            .is_breaker_failure()
        );
        assert!(
            !ClientError::CircuitOpen {
                destination: "ledger".into(),
                retry_after: Duration::ZERO,
            }
            .is_breaker_failure()
        );
    }

    #[test]
    fn test_not_found_detection() {
        assert!(http(404).is_not_found());
        assert!(!http(500).is_not_found());
        assert_eq!(ClientError::InvalidDestination("x".into()).status(), None);
    }
}
