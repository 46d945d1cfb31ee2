mod error;
mod state;

pub use error::{LifecycleError, Result};
pub use state::{transition, Generation, LifecycleEvent, SubscriptionState};
