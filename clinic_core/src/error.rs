//! Error types for the clinic_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for clinic_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation needs a signed-in session
    #[error("Not signed in")]
    NotAuthenticated,

    /// Record missing from the cached collection
    #[error("{kind} record {id} not found")]
    NotFound { kind: String, id: String },

    /// Backend call failed
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Typed outcome of a failed backend call.
///
/// Kept `Clone` so a slice can hold on to the last failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// The server answered with a non-2xx status
    #[error("HTTP {}{}", .code, message_suffix(.server_message))]
    Status {
        code: u16,
        server_message: Option<String>,
    },

    /// The request never produced a response (DNS, connect, timeout, ...)
    #[error("Network error: {cause}")]
    Transport { cause: String },

    /// A 2xx response whose body could not be decoded
    #[error("Malformed response: {cause}")]
    Decode { cause: String },
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

impl HttpError {
    /// HTTP status code, `None` for transport and decode failures.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpError::Status { code, .. } => Some(*code),
            HttpError::Transport { .. } | HttpError::Decode { .. } => None,
        }
    }

    /// Message supplied by the server, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            HttpError::Status { server_message, .. } => server_message.as_deref(),
            _ => None,
        }
    }

    /// True when the backend rejected the bearer credential.
    ///
    /// Only 401 counts: a 403 means the role may not see the resource,
    /// which is no reason to end the session.
    pub fn is_auth_rejection(&self) -> bool {
        self.status_code() == Some(401)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_includes_server_message() {
        let err = HttpError::Status {
            code: 404,
            server_message: Some("Doctor not found".into()),
        };
        assert_eq!(err.to_string(), "HTTP 404: Doctor not found");

        let bare = HttpError::Status {
            code: 500,
            server_message: None,
        };
        assert_eq!(bare.to_string(), "HTTP 500");
    }

    #[test]
    fn test_only_401_is_auth_rejection() {
        let unauthorized = HttpError::Status {
            code: 401,
            server_message: None,
        };
        let forbidden = HttpError::Status {
            code: 403,
            server_message: None,
        };
        let offline = HttpError::Transport {
            cause: "connection refused".into(),
        };

        assert!(unauthorized.is_auth_rejection());
        assert!(!forbidden.is_auth_rejection());
        assert!(!offline.is_auth_rejection());
        assert_eq!(offline.status_code(), None);
    }
}
