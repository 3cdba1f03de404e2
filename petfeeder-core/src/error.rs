//! Error types.
//!
//! Backend clients report [`ServiceError`]; pages and the dispatcher convert
//! those into [`SyncError`] before anything reaches display code.

use thiserror::Error;

/// Error reported by an external collaborator (data service, auth, storage).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Human-readable message as returned by the service
    pub message: String,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    /// Message safe to show to the user: bearer tokens and JWTs are redacted.
    pub fn display_message(&self) -> String {
        redact(&self.message)
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        // reqwest includes the full URL, which carries the apikey for realtime
        Self {
            message: redact(&e.without_url().to_string()),
            status,
        }
    }
}

/// Errors surfaced by stores, pages and the command dispatcher.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Local input check failed before any network call
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// No signed-in user
    #[error("Not signed in. Set account.email and account.password in config.")]
    AuthRequired,

    /// The data service rejected a mutation
    #[error("Write failed: {0}")]
    ExternalWrite(String),

    /// Initial fetch or page fetch failed
    #[error("Could not load data: {0}")]
    ExternalRead(String),

    /// The change feed could not be opened or was lost
    #[error("Live updates unavailable: {0}")]
    Subscription(String),

    /// Device command was written but the history row was not
    #[error("Food was dispensed ({amount}g) but the feeding history entry could not be saved: {message}")]
    PartialDispense { amount: u32, message: String },

    /// The same command is still in flight
    #[error("{0} is already in progress")]
    Busy(String),
}

impl SyncError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        SyncError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn write(e: ServiceError) -> Self {
        SyncError::ExternalWrite(e.display_message())
    }

    pub(crate) fn read(e: ServiceError) -> Self {
        SyncError::ExternalRead(e.display_message())
    }

    /// True for errors the user can fix by editing the input.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation { .. })
    }
}

/// Replace anything that looks like a bearer token or JWT with a marker.
pub(crate) fn redact(message: &str) -> String {
    let mut out = Vec::new();
    let mut after_bearer = false;
    for word in message.split(' ') {
        let bare = word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != '_');
        let looks_like_jwt = bare.starts_with("eyJ") && bare.matches('.').count() == 2;
        if after_bearer || looks_like_jwt {
            out.push("[redacted]".to_string());
        } else if let Some(pos) = word.find("apikey=") {
            out.push(format!("{}apikey=[redacted]", &word[..pos]));
        } else {
            out.push(word.to_string());
        }
        after_bearer = word.eq_ignore_ascii_case("bearer");
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_jwt() {
        let msg = "token eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiIxIn0.abc expired";
        assert_eq!(redact(msg), "token [redacted] expired");
    }

    #[test]
    fn test_redact_bearer_and_apikey() {
        assert_eq!(
            redact("header Bearer abc123 rejected"),
            "header Bearer [redacted] rejected"
        );
        assert_eq!(
            redact("GET /realtime?apikey=secret&vsn=1.0.0 failed"),
            "GET /realtime?apikey=[redacted] failed"
        );
    }

    #[test]
    fn test_redact_leaves_plain_messages() {
        let msg = "duplicate key value violates unique constraint";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn test_partial_dispense_message() {
        let err = SyncError::PartialDispense {
            amount: 10,
            message: "insert denied".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("dispensed"));
        assert!(text.contains("history"));
        assert!(text.contains("10g"));
    }

    #[test]
    fn test_service_error_display_message_redacts() {
        let err = ServiceError::with_status("bad jwt eyJa.eyJb.c", 401);
        assert_eq!(err.display_message(), "bad jwt [redacted]");
        assert_eq!(err.status, Some(401));
    }
}
