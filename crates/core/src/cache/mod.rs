mod error;
mod keys;
mod patterns;

pub use error::{CacheError, Result};
pub use keys::{aggregate_key, resource_from_key, resource_prefix, AGGREGATE_NAMESPACE};
pub use patterns::{pattern_matches, KeyMatcher};
