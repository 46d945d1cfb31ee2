use thiserror::Error;

/// Errors surfaced by cache loads.
///
/// Cloneable because a single in-flight load hands its outcome to every
/// caller waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache load failed: {0}")]
    LoadFailed(String),
    #[error("Cache load abandoned before producing a value")]
    LoadAbandoned,
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_display() {
        let error = CacheError::LoadFailed("connection refused".to_string());
        assert_eq!(error.to_string(), "Cache load failed: connection refused");
    }

    #[test]
    fn test_load_abandoned_display() {
        assert_eq!(
            CacheError::LoadAbandoned.to_string(),
            "Cache load abandoned before producing a value"
        );
    }
}
