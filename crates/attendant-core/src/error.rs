use thiserror::Error;

/// Top-level error type shared by the composition root and anything that
/// doesn't warrant its own crate-specific error enum.
#[derive(Debug, Error)]
pub enum AttendantError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl AttendantError {
    /// Short, stable error code — useful when this surfaces in a log line
    /// or a user-facing message and a machine-readable tag is wanted.
    pub fn code(&self) -> &'static str {
        match self {
            AttendantError::Config(_) => "CONFIG_ERROR",
            AttendantError::Serialization(_) => "SERIALIZATION_ERROR",
            AttendantError::Io(_) => "IO_ERROR",
            AttendantError::Timeout { .. } => "TIMEOUT",
            AttendantError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendantError>;
