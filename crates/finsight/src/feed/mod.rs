//! Change-feed transports and the bridge that keeps one connection alive.
//!
//! # Feature Flags
//!
//! - `redis`: Redis pub/sub transport. The in-memory transport is always
//!   available.

mod bridge;
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_impl;

pub use bridge::{ChangeFeedBridge, Connection, FeedHealth};
pub use finsight_core::feed::{ChangeEvent, ChangeFeed, EventKind, FeedError, InvalidationMap};
pub use memory::MemoryFeed;

#[cfg(feature = "redis")]
pub use redis_impl::RedisFeed;
