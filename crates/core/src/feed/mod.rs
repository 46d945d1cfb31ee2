mod error;
mod routing;
mod traits;
mod types;

pub use error::{FeedError, Result};
pub use routing::InvalidationMap;
pub use traits::ChangeFeed;
pub use types::{feed_channel, ChangeEvent, EventKind};
