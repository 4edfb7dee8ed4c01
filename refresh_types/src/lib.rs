//! Shared types for the partition refresh service.
//!
//! This crate holds the values that flow between the queue consumer, the query engine client
//! and the orchestrator: the [`BucketSet`] produced by deduplication, the per-bucket
//! [`RefreshStrategy`] lookup, the static [`RefreshConfig`] and the [`ServiceError`] returned
//! by the networked collaborators.

#[cfg(feature = "aws")]
pub mod aws;
pub mod bucket;
pub mod config;
pub mod error;
pub mod strategy;

pub use bucket::BucketSet;
pub use config::{ConfigError, RefreshConfig};
pub use error::ServiceError;
pub use strategy::{RefreshStrategy, StrategyMap};
