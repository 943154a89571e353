//! Error types shared across dayreel crates.

/// Top-level error type for dayreel operations.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    #[error("Fetch error: {message}")]
    Fetch { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Encoding error: {message}")]
    Encoding { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Clean early exit requested through a [`crate::clock::CancelToken`].
    /// Never reported to users as a failure.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelError.
pub type ReelResult<T> = Result<T, ReelError>;

impl ReelError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Whether this error is a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short name of the pipeline phase the error came from.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Decode { .. } => "decode",
            Self::Encoding { .. } => "encode",
            Self::Audio { .. } => "audio",
            Self::Storage { .. } => "storage",
            Self::Config { .. } => "config",
            Self::Cancelled => "cancel",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Unsupported { .. } | Self::Other(_) => "other",
        }
    }
}
