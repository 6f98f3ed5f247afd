// Error handling module
// Defines the session error taxonomy shared by every component

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Kind of transport failure when no response was received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionFailed,
    RequestError,
    BodyError,
    DecodeError,
    Unknown,
}

impl NetworkErrorKind {
    /// Categorize a reqwest error for better debugging
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkErrorKind::Timeout
        } else if e.is_connect() {
            NetworkErrorKind::ConnectionFailed
        } else if e.is_request() {
            NetworkErrorKind::RequestError
        } else if e.is_body() {
            NetworkErrorKind::BodyError
        } else if e.is_decode() {
            NetworkErrorKind::DecodeError
        } else {
            NetworkErrorKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => "timeout",
            NetworkErrorKind::ConnectionFailed => "connection_failed",
            NetworkErrorKind::RequestError => "request_error",
            NetworkErrorKind::BodyError => "body_error",
            NetworkErrorKind::DecodeError => "decode_error",
            NetworkErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by a credential store backend
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backing store rejected the operation
    #[error("Credential store backend error: {0}")]
    Backend(String),

    /// The store's internal lock was poisoned
    #[error("Credential store lock poisoned")]
    Lock,
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Errors that can occur while running an authenticated session.
///
/// `Clone` is required: a single refresh outcome is handed to every caller
/// awaiting the same in-flight ticket.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Token is not three dot-separated segments or its payload is unreadable
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Token payload has no `exp` claim
    #[error("Token has no expiration claim")]
    MissingExpiry,

    /// No credentials are stored
    #[error("No active session")]
    NoSession,

    /// Stored refresh token expired before it could be used
    #[error("Refresh token expired at {0}")]
    RefreshTokenExpired(DateTime<Utc>),

    /// Backend or network failure while refreshing
    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[source] Box<SessionError>),

    /// Request was still unauthorized after one refresh-and-retry
    #[error("Authorization failed: {status} - {message}")]
    AuthorizationFailure { status: u16, message: String },

    /// Non-success HTTP status that is not session fatal
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// No response was received
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// Credential storage failed
    #[error("Credential storage error: {0}")]
    Storage(#[from] StoreError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Build a network error from a transport failure
    pub fn network(e: &reqwest::Error) -> Self {
        SessionError::Network {
            kind: NetworkErrorKind::from_reqwest(e),
            message: e.to_string(),
        }
    }

    /// Whether this error ends the session (teardown must follow)
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::MalformedToken(_)
                | SessionError::MissingExpiry
                | SessionError::NoSession
                | SessionError::RefreshTokenExpired(_)
                | SessionError::RefreshFailed(_)
        )
    }

    /// Underlying failure of a refresh, e.g. to tell a network outage from a rejection
    pub fn refresh_cause(&self) -> Option<&SessionError> {
        match self {
            SessionError::RefreshFailed(cause) => Some(&**cause),
            _ => None,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::AuthorizationFailure { status, .. } | SessionError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_error_messages() {
        let err = SessionError::NoSession;
        assert_eq!(err.to_string(), "No active session");

        let err = SessionError::MalformedToken("expected 3 segments, found 1".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed token: expected 3 segments, found 1"
        );

        let err = SessionError::Http {
            status: 404,
            message: "Not here".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error: 404 - Not here");
    }

    #[test]
    fn test_refresh_expired_message() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let err = SessionError::RefreshTokenExpired(at);
        assert!(err.to_string().starts_with("Refresh token expired at 2023-11-14"));
    }

    #[test]
    fn test_network_error_message() {
        let err = SessionError::Network {
            kind: NetworkErrorKind::Timeout,
            message: "operation timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Network error (timeout): operation timed out");
    }

    #[test]
    fn test_store_error_conversion() {
        let err: SessionError = StoreError::Lock.into();
        assert!(matches!(err, SessionError::Storage(StoreError::Lock)));
        assert_eq!(
            err.to_string(),
            "Credential storage error: Credential store lock poisoned"
        );
    }

    #[test]
    fn test_session_fatal_policy() {
        assert!(SessionError::NoSession.is_session_fatal());
        assert!(SessionError::MissingExpiry.is_session_fatal());
        assert!(SessionError::RefreshFailed(Box::new(SessionError::Internal("boom".to_string())))
            .is_session_fatal());
        assert!(SessionError::MalformedToken("x".to_string()).is_session_fatal());

        assert!(!SessionError::Http {
            status: 500,
            message: String::new()
        }
        .is_session_fatal());
        assert!(!SessionError::AuthorizationFailure {
            status: 401,
            message: String::new()
        }
        .is_session_fatal());
        assert!(!SessionError::Network {
            kind: NetworkErrorKind::ConnectionFailed,
            message: String::new()
        }
        .is_session_fatal());
    }

    #[test]
    fn test_refresh_failure_keeps_cause() {
        let err = SessionError::RefreshFailed(Box::new(SessionError::Network {
            kind: NetworkErrorKind::Timeout,
            message: "operation timed out".to_string(),
        }));

        assert_eq!(
            err.to_string(),
            "Token refresh failed: Network error (timeout): operation timed out"
        );
        assert!(matches!(
            err.refresh_cause(),
            Some(SessionError::Network {
                kind: NetworkErrorKind::Timeout,
                ..
            })
        ));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("Network error (timeout): operation timed out")
        );
        assert_eq!(SessionError::NoSession.refresh_cause().map(|_| ()), None);
    }

    #[test]
    fn test_status_accessor() {
        let err = SessionError::AuthorizationFailure {
            status: 401,
            message: "nope".to_string(),
        };
        assert_eq!(err.status(), Some(401));
        assert_eq!(SessionError::NoSession.status(), None);
    }

    #[test]
    fn test_network_kind_display() {
        assert_eq!(NetworkErrorKind::ConnectionFailed.to_string(), "connection_failed");
        assert_eq!(NetworkErrorKind::DecodeError.as_str(), "decode_error");
    }
}
