//! Error types for the fetch-and-cache layer.
//!
//! Two severities exist in practice: hard failures abort the enclosing
//! operation, soft failures (an unobtainable hash, a single rejected
//! credential) are recorded in the manager's exception history while the
//! operation continues. Severity is decided by the caller, not by the
//! error type hierarchy.

use thiserror::Error;

/// Transport-level failure, decoded into a small set of user-facing
/// categories so callers can present a meaningful root cause.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("cannot connect to server <{host}>, check your network connection or the server address")]
    HostUnreachable { host: String },

    #[error("cannot find resource {uri}")]
    NotFound { uri: String },

    #[error("authentication failed for {uri}: {reason}")]
    AuthFailed { uri: String, reason: String },

    #[error("no transport registered for scheme '{scheme}'")]
    UnsupportedScheme { scheme: String },

    #[error("transfer failed for {uri}: {reason}")]
    Other { uri: String, reason: String },
}

impl TransferError {
    /// Auth-class failures may be retried with the next credential
    /// binding; every other category is structural and propagates.
    pub fn is_auth(&self) -> bool {
        matches!(self, TransferError::AuthFailed { .. })
    }

    /// Decode a reqwest error into a transfer category.
    pub fn from_reqwest(uri: &str, err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            let host = err
                .url()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| uri.to_string());
            return TransferError::HostUnreachable { host };
        }
        TransferError::Other {
            uri: uri.to_string(),
            reason: err.to_string(),
        }
    }

    /// Decode an HTTP status into a transfer category.
    pub fn from_status(uri: &str, status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            404 | 410 => TransferError::NotFound {
                uri: uri.to_string(),
            },
            401 | 403 | 407 => TransferError::AuthFailed {
                uri: uri.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            },
            code => TransferError::Other {
                uri: uri.to_string(),
                reason: format!("HTTP {code}"),
            },
        }
    }
}

/// Top-level error for fetch, cache and native-library operations.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid resource identifier '{input}': {reason}")]
    Syntax { input: String, reason: String },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("cannot obtain hash for {uri}: {reason}")]
    HashUnavailable { uri: String, reason: String },

    #[error("failed to install {dest}: {reason}")]
    AtomicInstall { dest: String, reason: String },

    #[error("no compatible version of library '{name}' found locally or remotely")]
    VersionResolution {
        name: String,
        #[source]
        cause: Option<Box<FetchError>>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn syntax(input: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Syntax {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// True for failures that a multi-step operation records rather
    /// than aborts on.
    pub fn is_soft(&self) -> bool {
        matches!(self, FetchError::HashUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_are_retryable() {
        let err = TransferError::AuthFailed {
            uri: "sftp://host/file".to_string(),
            reason: "bad key".to_string(),
        };
        assert!(err.is_auth());

        let err = TransferError::HostUnreachable {
            host: "host".to_string(),
        };
        assert!(!err.is_auth());
    }

    #[test]
    fn test_status_decoding() {
        let err = TransferError::from_status("http://h/f", reqwest::StatusCode::NOT_FOUND);
        assert!(matches!(err, TransferError::NotFound { .. }));

        let err = TransferError::from_status("http://h/f", reqwest::StatusCode::UNAUTHORIZED);
        assert!(err.is_auth());

        let err = TransferError::from_status("http://h/f", reqwest::StatusCode::BAD_GATEWAY);
        assert!(matches!(err, TransferError::Other { .. }));
    }

    #[test]
    fn test_hash_unavailable_is_soft() {
        let err = FetchError::HashUnavailable {
            uri: "http://h/f".to_string(),
            reason: "404".to_string(),
        };
        assert!(err.is_soft());
        assert!(!FetchError::syntax("x", "y").is_soft());
    }

    #[test]
    fn test_display_messages() {
        let err = TransferError::NotFound {
            uri: "http://h/missing".to_string(),
        };
        assert_eq!(err.to_string(), "cannot find resource http://h/missing");

        let err = FetchError::syntax("zip:foo", "archive identifiers require '!'");
        assert_eq!(
            err.to_string(),
            "invalid resource identifier 'zip:foo': archive identifiers require '!'"
        );
    }
}
