use thiserror::Error;

use super::{LifecycleEvent, SubscriptionState};

/// Errors raised by the subscription lifecycle state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition: {event:?} while {from:?}")]
    InvalidTransition {
        from: SubscriptionState,
        event: LifecycleEvent,
    },
}

/// Result type for lifecycle transitions.
pub type Result<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let error = LifecycleError::InvalidTransition {
            from: SubscriptionState::Unsubscribed,
            event: LifecycleEvent::Opened,
        };
        assert_eq!(
            error.to_string(),
            "Invalid lifecycle transition: Opened while Unsubscribed"
        );
    }
}
