//! Error types shared across Cardcast crates.

/// Top-level error type for Cardcast export operations.
///
/// Every variant is fatal to the export that produced it. Callers that want
/// another attempt re-run the whole pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CardcastError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Encode error: {message}")]
    Encode { message: String },

    #[error("Mux error: {message}")]
    Mux { message: String },

    #[error("Export cancelled after {frames_captured} frame(s)")]
    Cancelled { frames_captured: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CardcastError.
pub type CardcastResult<T> = Result<T, CardcastError>;

impl CardcastError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode {
            message: msg.into(),
        }
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux {
            message: msg.into(),
        }
    }

    /// Short machine-readable label for the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Capture { .. } => "capture",
            Self::Encode { .. } => "encode",
            Self::Mux { .. } => "mux",
            Self::Cancelled { .. } => "cancelled",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}
