//! Transition table for a view's change-feed subscription.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{LifecycleError, Result};

/// Where a view's subscription currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
}

/// Inputs driving the subscription state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// The owning view mounted (or re-mounted).
    Mount,
    /// The feed connection finished its handshake.
    Opened,
    /// The feed connection could not be established.
    OpenFailed,
    /// The owning view unmounted.
    Unmount,
}

/// Returns the state that follows `event` in `from`.
///
/// Mounting while `Active` is allowed: the shell closes the live connection
/// before opening the next one. Unmounting is idempotent.
pub fn transition(from: SubscriptionState, event: LifecycleEvent) -> Result<SubscriptionState> {
    use LifecycleEvent::*;
    use SubscriptionState::*;

    match (from, event) {
        (Unsubscribed, Mount) | (Active, Mount) => Ok(Subscribing),
        (Subscribing, Opened) => Ok(Active),
        (Subscribing, OpenFailed) => Ok(Unsubscribed),
        (_, Unmount) => Ok(Unsubscribed),
        (from, event) => Err(LifecycleError::InvalidTransition { from, event }),
    }
}

/// Monotonic stamp identifying one mount of a view.
///
/// Work tagged with an older generation belongs to a torn-down mount and
/// must be dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}
