//! Error type shared by every client operation.

/// Errors from session handling, API calls and telemetry delivery.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("session expired")]
    SessionExpired,
    #[error("token storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("interaction batcher is closed")]
    BatcherClosed,
}

impl ClientError {
    /// True for errors that end (or stem from the absence of) a session.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ClientError::NotAuthenticated
                | ClientError::SessionExpired
                | ClientError::InvalidToken(_)
                | ClientError::Http { status: 401, .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Storage(e.to_string())
    }
}
