//! Shared configuration, error types, IDs, and observability primitives for quarry crates.
//!
//! Architecture role:
//! - defines engine configuration passed across planner and execution layers
//! - provides common [`QuarryError`] / [`Result`] contracts
//! - hosts the prometheus metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::EngineConfig;
pub use error::{QuarryError, Result};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
