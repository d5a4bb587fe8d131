use thiserror::Error;

/// pCloud result code for "file or folder already exists".
pub const ALREADY_EXISTS_CODE: u32 = 2004;

/// Errors surfaced by a storage backend call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a backend answer (connection, timeout, HTTP status).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-zero result code.
    #[error("backend rejected request (result {code}): {message}")]
    Rejected { code: u32, message: String },

    /// The backend answered with result 0 but the payload lacked expected fields.
    #[error("unexpected backend response: {0}")]
    Malformed(String),
}

impl BackendError {
    pub fn rejected(code: u32, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::Rejected { code, .. } if *code == ALREADY_EXISTS_CODE)
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
