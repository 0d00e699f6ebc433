use thiserror::Error;

#[derive(Error, Debug)]
pub enum TutorError {
    /// Missing credential or unknown provider. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The vendor answered with a non-success status.
    #[error("Provider error (status {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    /// The quiz pipeline could not turn the model output into questions.
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TutorError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, TutorError::Configuration(_))
    }
}

impl From<reqwest::Error> for TutorError {
    fn from(e: reqwest::Error) -> Self {
        TutorError::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;
