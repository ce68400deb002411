//! Persistent storage for the monitoring loop.

pub mod manager;
pub mod schema;

pub use manager::{MetricStore, PruneCounts};
