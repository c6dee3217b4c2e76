use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Network response not ok: status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Not found in cache: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Version v{requested} is older than current v{current}")]
    StaleVersion { requested: u32, current: u32 },

    #[error("Invalid lifecycle state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Version v{0} is not installed")]
    NotInstalled(u32),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl CacheError {
    /// Truncate a detail string to avoid logging excessive data
    pub(crate) fn truncate_detail(detail: &str) -> String {
        if detail.len() <= MAX_ERROR_BODY_LENGTH {
            detail.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &detail[..end],
                detail.len()
            )
        }
    }

    pub fn from_status(status: u16, url: &str) -> Self {
        CacheError::Status {
            status,
            url: url.to_string(),
        }
    }

    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        CacheError::Storage(Self::truncate_detail(&format!("{}: {}", context, err)))
    }

    /// Whether a strategy should answer this error with its fallback path.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, CacheError::Network(_) | CacheError::Status { .. })
    }
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        CacheError::Network(Self::truncate_detail(&err.to_string()))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
