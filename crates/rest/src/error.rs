use lakestore_protocol::{Operation, RemoteExceptionResponse};

/// Errors surfaced by a [`RestTransport`](crate::RestTransport) call.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("not found: /{path}")]
    NotFound { path: String },

    #[error("permission denied: /{path}: {message}")]
    PermissionDenied { path: String, message: String },

    #[error("bad offset on /{path}: {message}")]
    BadOffset { path: String, message: String },

    #[error("HTTP {status} on /{path}: {message}")]
    Http {
        status: u16,
        path: String,
        message: String,
    },

    #[error("{op} on /{path} reported failure")]
    OperationFailed { op: Operation, path: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RestError {
    /// Map a non-success HTTP reply to an error.
    ///
    /// 403 and 404 map to their dedicated variants; a `BadOffsetException`
    /// in the body maps to [`RestError::BadOffset`] regardless of status.
    pub fn from_response(path: &str, status: u16, body: &[u8]) -> Self {
        let remote = serde_json::from_slice::<RemoteExceptionResponse>(body)
            .ok()
            .map(|r| r.remote_exception);
        let message = remote
            .as_ref()
            .map(|r| r.message.clone())
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());
        let path = path.to_string();

        if remote.as_ref().is_some_and(|r| r.is_bad_offset()) {
            return RestError::BadOffset { path, message };
        }
        match status {
            403 => RestError::PermissionDenied { path, message },
            404 => RestError::NotFound { path },
            _ => RestError::Http {
                status,
                path,
                message,
            },
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Transport failures, timeouts, 408, 429 and 5xx (except 501 and 505)
    /// are transient. Everything else is a definitive answer.
    pub fn is_transient(&self) -> bool {
        match self {
            RestError::Transport(_) | RestError::Timeout => true,
            RestError::Http { status, .. } => matches!(
                *status,
                408 | 429 | 500 | 502 | 503 | 504 | 506..=599
            ),
            _ => false,
        }
    }

    /// HTTP status associated with the error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RestError::NotFound { .. } => Some(404),
            RestError::PermissionDenied { .. } => Some(403),
            RestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
