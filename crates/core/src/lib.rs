//! Functional core for finsight.
//!
//! Everything in this crate is pure: period aggregation, cache key and
//! pattern helpers, change-feed event types and routing, the subscription
//! lifecycle transition table, and the collaborator traits the shell
//! implements. Nothing here spawns tasks or touches I/O.

pub mod aggregate;
pub mod cache;
pub mod feed;
pub mod lifecycle;
pub mod source;
