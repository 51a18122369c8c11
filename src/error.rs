/// Error type for cache and get-helper operations.
///
/// Errors are `Clone` so that a single failed fetch can be handed to every
/// caller sharing its promise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The fetch function for a key returned an error.
    #[error("fetch failed for key '{key}': {message}")]
    Fetch { key: String, message: String },
    /// The fetch did not settle within the configured timeout.
    #[error("fetch for key '{key}' timed out after {timeout_ms}ms")]
    Timeout { key: String, timeout_ms: u64 },
    /// The fetch task panicked or was cancelled by the runtime.
    #[error("fetch task for key '{key}' aborted: {message}")]
    Aborted { key: String, message: String },
    /// The get helper was asked for a resource it does not know.
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    /// A query option could not be parsed.
    #[error("invalid value '{value}' for option '{name}'")]
    InvalidOption { name: String, value: String },
    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),
    /// A metrics sink failed to flush.
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl CacheError {
    /// Create a new fetch error.
    pub fn fetch(key: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Fetch {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(key: impl Into<String>, timeout_ms: u64) -> Self {
        CacheError::Timeout {
            key: key.into(),
            timeout_ms,
        }
    }

    /// Create a new invalid option error.
    pub fn invalid_option(name: impl Into<String>, value: impl Into<String>) -> Self {
        CacheError::InvalidOption {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::fetch("postsPublic::browse::{}", "connection refused");
        assert_eq!(
            err.to_string(),
            "fetch failed for key 'postsPublic::browse::{}': connection refused"
        );

        let err = CacheError::timeout("tagsPublic::browse::{}", 250);
        assert_eq!(
            err.to_string(),
            "fetch for key 'tagsPublic::browse::{}' timed out after 250ms"
        );

        let err = CacheError::invalid_option("limit", "lots");
        assert_eq!(err.to_string(), "invalid value 'lots' for option 'limit'");
    }
}
