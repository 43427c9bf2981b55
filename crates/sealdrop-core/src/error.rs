use thiserror::Error;

pub type ShareResult<T> = Result<T, ShareError>;

/// Message shown for every AEAD failure. Wrong key and tampering are not distinguished.
pub const INVALID_LINK_MESSAGE: &str = "invalid password/link";

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("malformed data: {0}")]
    Format(String),

    #[error("key rejected: {0}")]
    KeyImport(String),

    #[error("{}", INVALID_LINK_MESSAGE)]
    Decryption,

    #[error("image re-encode failed: {0}")]
    Reencode(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("another request is already in flight")]
    Busy,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShareError {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        ShareError::Server {
            status,
            message: message.into(),
        }
    }

    /// Build a server error from a non-2xx response body.
    ///
    /// The body is expected to be `{"message": "..."}`; anything else is surfaced raw.
    pub fn from_response_body(status: u16, body: &[u8]) -> Self {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            message: String,
        }

        let message = match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => parsed.message,
            Err(_) => String::from_utf8_lossy(body).trim().to_string(),
        };
        ShareError::server(status, message)
    }

    /// Internal-only failures are logged and swallowed instead of replacing the form.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, ShareError::Reencode(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ShareError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}
