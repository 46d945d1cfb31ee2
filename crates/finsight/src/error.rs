use thiserror::Error;

use finsight_core::{
    cache::CacheError, feed::FeedError, lifecycle::LifecycleError, source::SourceError,
};

use crate::config::ConfigError;

/// Any error surfaced by the finsight runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for finsight runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_transparent() {
        let error: Error = FeedError::ConnectionLost { attempts: 3 }.into();
        assert_eq!(
            error.to_string(),
            "Feed connection lost after 3 reconnection attempts"
        );
    }

    #[test]
    fn test_from_source_error() {
        let error: Error = SourceError::Unavailable("offline".to_string()).into();
        assert_eq!(
            error,
            Error::Source(SourceError::Unavailable("offline".to_string()))
        );
    }
}
