//! Query cache shared by every derived view.
//!
//! Keys and matchers live in `finsight_core::cache`; this module holds the
//! stateful store.

mod store;

pub use finsight_core::cache::{aggregate_key, resource_prefix, CacheError, KeyMatcher};
pub use store::{CacheStats, CacheStore, EntrySnapshot, EntryStatus, LoadFuture, Subscription};
