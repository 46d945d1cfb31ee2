use thiserror::Error;

/// Errors raised by change-feed transports and the bridge on top of them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Feed connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Feed connection lost after {attempts} reconnection attempts")]
    ConnectionLost { attempts: u32 },
    #[error("Publish failed: {0}")]
    PublishFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failed_display() {
        let error = FeedError::ConnectionFailed("timeout".to_string());
        assert_eq!(error.to_string(), "Feed connection failed: timeout");
    }

    #[test]
    fn test_connection_lost_display() {
        let error = FeedError::ConnectionLost { attempts: 5 };
        assert_eq!(
            error.to_string(),
            "Feed connection lost after 5 reconnection attempts"
        );
    }

    #[test]
    fn test_publish_failed_display() {
        let error = FeedError::PublishFailed("channel closed".to_string());
        assert_eq!(error.to_string(), "Publish failed: channel closed");
    }
}
