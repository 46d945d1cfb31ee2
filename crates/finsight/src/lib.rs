//! Imperative shell for finsight.
//!
//! Owns everything with state or I/O: the aggregate cache, change-feed
//! transports, the subscription lifecycle and the bound views. The pure
//! pieces live in `finsight_core`.

pub mod binding;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod source;

pub use binding::{AggregateBinding, AggregateView, BoundAggregate, Clock, FixedClock, SystemClock};
pub use config::{Config, ConfigError, ReconnectPolicy};
pub use dashboard::Dashboard;
pub use error::{Error, Result};
pub use finsight_core::aggregate::{DatedAmount, Granularity, PeriodAggregate, Trend};
pub use lifecycle::{LifecycleStatus, SubscriptionManager};
