// Error types for the interception cache.

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A standard fetch completed with a status outside 2xx.
    #[error("non-ok response status {status} for {url}")]
    NonOkStatus { url: String, status: u16 },

    /// A no-cors fetch completed with a status other than the opaque sentinel.
    #[error("non-opaque status {status} for opaque request {url}")]
    UnexpectedOpaqueStatus { url: String, status: u16 },

    /// Both the standard and the opaque attempt failed.
    #[error("fetch failed for {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    /// Transport-level failure of a single fetch attempt.
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    /// The underlying store rejected an open/put/read/delete.
    #[error("store failure: {message}")]
    StoreFailure { message: String },

    /// A URL could not be parsed or resolved against the scope.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An event arrived in a lifecycle state that cannot handle it.
    #[error("lifecycle error: {message}")]
    Lifecycle { message: String },
}

impl CacheError {
    pub(crate) fn store(message: impl Into<String>) -> Self {
        Self::StoreFailure {
            message: message.into(),
        }
    }

    pub(crate) fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Whether re-dispatching the triggering event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NonOkStatus { .. }
                | Self::UnexpectedOpaqueStatus { .. }
                | Self::FetchFailure { .. }
                | Self::Network { .. }
                | Self::StoreFailure { .. }
        )
    }

    /// HTTP status the front-end server answers with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NonOkStatus { .. }
            | Self::UnexpectedOpaqueStatus { .. }
            | Self::FetchFailure { .. }
            | Self::Network { .. } => 502,
            Self::InvalidUrl { .. } => 400,
            Self::Lifecycle { .. } => 503,
            Self::StoreFailure { .. } | Self::Config { .. } => 500,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
