use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemeError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("document extraction failed: {0}")]
    Extraction(String),

    #[error("embedding provider unavailable: {details}")]
    EmbeddingUnavailable { details: String, transient: bool },

    #[error("storage error from {backend}: {details}")]
    Storage {
        backend: String,
        details: String,
        transient: bool,
    },

    #[error("vector dimension {found} does not match repository dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("scheme not found: {0}")]
    NotFound(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("judge request failed: {details}")]
    Judge { details: String, transient: bool },
}

impl SchemeError {
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation(details.into())
    }

    pub fn embedding(details: impl Into<String>, transient: bool) -> Self {
        Self::EmbeddingUnavailable {
            details: details.into(),
            transient,
        }
    }

    pub fn storage(backend: impl Into<String>, details: impl Into<String>, transient: bool) -> Self {
        Self::Storage {
            backend: backend.into(),
            details: details.into(),
            transient,
        }
    }

    /// Network failures, timeouts, HTTP 429 and 5xx. Only these are retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingUnavailable { transient, .. }
            | Self::Storage { transient, .. }
            | Self::Judge { transient, .. } => *transient,
            Self::Timeout(_) => true,
            _ => false,
        }
    }

    /// 4xx-equivalent failures caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }

    /// Text suitable for showing to an end user at a request boundary.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(details) => details.clone(),
            Self::NotFound(id) => format!("no scheme with id {id}"),
            Self::Extraction(_) => "the uploaded document could not be read".to_string(),
            Self::EmbeddingUnavailable { .. } => "search temporarily unavailable".to_string(),
            Self::Storage { .. } | Self::Io(_) | Self::Timeout(_) | Self::DimensionMismatch { .. } => {
                "service temporarily unavailable, please retry".to_string()
            }
            Self::Judge { .. } => "eligibility check temporarily unavailable".to_string(),
        }
    }
}

/// Classifies an HTTP status the same way for every backend.
pub(crate) fn status_is_transient(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
