use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced to collaborators of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session could not be renewed; the caller must re-authenticate.
    #[error("session expired")]
    SessionExpired,

    /// An operation that needs a session was called without one.
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx answer to a call whose status is meaningful to the caller
    /// (login, for instance).
    #[error("gateway answered {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("session store error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            tracing::debug!(?err, "http request timed out");
            return Self::Timeout;
        }
        tracing::debug!(?err, "http request failed");
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Outcome of a failed token refresh.
///
/// `Clone` because a single in-flight refresh is awaited by every caller that
/// needed a fresh token at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    #[error("refresh rejected with status {0}")]
    Rejected(StatusCode),

    #[error("refresh response carried no access token")]
    MissingToken,

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("refresh timed out")]
    Timeout,

    /// The session was set or cleared while the refresh was in flight, so its
    /// result was discarded.
    #[error("session changed while refresh was in flight")]
    Superseded,

    #[error("refresh task aborted")]
    Aborted,
}

impl From<ClientError> for RenewalError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout => Self::Timeout,
            ClientError::Status { status, .. } => Self::Rejected(status),
            ClientError::Decode(_) => Self::MissingToken,
            other => Self::Network(other.to_string()),
        }
    }
}
