// Failure classification
// Maps HTTP and transport outcomes to a user-facing category, logs them and publishes alerts.
// Never decides retries or teardown.

use std::fmt;

use tokio::sync::broadcast;

use crate::error::NetworkErrorKind;

/// What went wrong with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A response arrived with a non-success status
    Status(u16),
    /// No response arrived
    Network(NetworkErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ServerError,
    ServiceUnavailable,
    OriginUnreachable,
    NetworkError,
    Default,
}

/// How loudly an outcome is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Debug,
    Warn,
    Error,
}

/// User-facing notice for a classified failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub category: FailureCategory,
    pub title: &'static str,
    pub message: &'static str,
}

impl FailureCategory {
    pub fn from_outcome(outcome: FailureOutcome) -> Self {
        match outcome {
            FailureOutcome::Network(_) => FailureCategory::NetworkError,
            FailureOutcome::Status(status) => match status {
                400 => FailureCategory::BadRequest,
                401 => FailureCategory::Unauthorized,
                403 => FailureCategory::Forbidden,
                404 => FailureCategory::NotFound,
                409 => FailureCategory::Conflict,
                500 => FailureCategory::ServerError,
                503 => FailureCategory::ServiceUnavailable,
                // Cloudflare: origin is unreachable
                523 => FailureCategory::OriginUnreachable,
                _ => FailureCategory::Default,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::BadRequest => "bad_request",
            FailureCategory::Unauthorized => "unauthorized",
            FailureCategory::Forbidden => "forbidden",
            FailureCategory::NotFound => "not_found",
            FailureCategory::Conflict => "conflict",
            FailureCategory::ServerError => "server_error",
            FailureCategory::ServiceUnavailable => "service_unavailable",
            FailureCategory::OriginUnreachable => "origin_unreachable",
            FailureCategory::NetworkError => "network_error",
            FailureCategory::Default => "default",
        }
    }

    pub fn log_action(&self) -> LogAction {
        match self {
            // Recovered by refresh or ends in teardown
            FailureCategory::Unauthorized => LogAction::Debug,
            FailureCategory::BadRequest
            | FailureCategory::Forbidden
            | FailureCategory::NotFound
            | FailureCategory::Conflict => LogAction::Warn,
            FailureCategory::ServerError
            | FailureCategory::ServiceUnavailable
            | FailureCategory::OriginUnreachable
            | FailureCategory::NetworkError
            | FailureCategory::Default => LogAction::Error,
        }
    }

    /// Stable title/message for the UI; `None` when the user should not be alerted
    pub fn alert(&self) -> Option<Alert> {
        let (title, message) = match self {
            FailureCategory::Unauthorized => return None,
            FailureCategory::BadRequest => (
                "Invalid request",
                "Some of the information sent was not accepted. Please check it and try again.",
            ),
            FailureCategory::Forbidden => (
                "Access denied",
                "You do not have permission to do this.",
            ),
            FailureCategory::NotFound => (
                "Not found",
                "The requested item could not be found.",
            ),
            FailureCategory::Conflict => (
                "Conflict",
                "This item already exists or was changed by someone else.",
            ),
            FailureCategory::ServerError => (
                "Server error",
                "Something went wrong on our side. Please try again later.",
            ),
            FailureCategory::ServiceUnavailable => (
                "Service unavailable",
                "The service is temporarily unavailable. Please try again shortly.",
            ),
            FailureCategory::OriginUnreachable => (
                "Server unreachable",
                "Our servers cannot be reached right now. Please try again later.",
            ),
            FailureCategory::NetworkError => (
                "Network error",
                "Check your internet connection and try again.",
            ),
            FailureCategory::Default => (
                "Unexpected error",
                "An unexpected error occurred. Please try again.",
            ),
        };

        Some(Alert {
            category: *self,
            title,
            message,
        })
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observes failed requests: logs each one and publishes an alert for the UI
pub struct FailureClassifier {
    alerts: broadcast::Sender<Alert>,
}

impl FailureClassifier {
    pub fn new() -> Self {
        let (alerts, _) = broadcast::channel(32);
        Self { alerts }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    /// Classify one failed outcome and perform its side effects
    pub fn observe(&self, outcome: FailureOutcome, method: &str, url: &str) -> FailureCategory {
        let category = FailureCategory::from_outcome(outcome);

        match (category.log_action(), outcome) {
            (LogAction::Debug, FailureOutcome::Status(status)) => {
                tracing::debug!(status, method, url, category = %category, "Request unauthorized");
            }
            (LogAction::Warn, FailureOutcome::Status(status)) => {
                tracing::warn!(status, method, url, category = %category, "Request rejected");
            }
            (_, FailureOutcome::Status(status)) => {
                tracing::error!(status, method, url, category = %category, "Request failed");
            }
            (_, FailureOutcome::Network(kind)) => {
                tracing::error!(error_kind = %kind, method, url, category = %category, "Request failed without response");
            }
        }

        if let Some(alert) = category.alert() {
            // No subscribers is fine
            let _ = self.alerts.send(alert);
        }

        category
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::new()
    }
}
