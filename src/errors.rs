use thiserror::Error;

/// FCM Client Error Types
#[derive(Error, Debug)]
pub enum FCMError {
    /// Connection, DNS, or TLS failure before a status line was received,
    /// or a failure while reading the response body.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx status. The raw body is kept so
    /// callers can still inspect what the service returned.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    /// A JSON payload failed to encode or decode.
    #[error("JSON payload error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FCMError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FCMError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
