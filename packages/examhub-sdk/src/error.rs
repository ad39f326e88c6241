use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("API returned error status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Unauthorized: token missing, invalid or expired")]
    Unauthorized,

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl SdkError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SdkError::Unauthorized)
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
