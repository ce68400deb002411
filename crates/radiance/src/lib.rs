//! Radiance Watch core: z-score anomaly scoring, trending ranking, and loop phase tracking.

pub mod loop_state;
pub mod scorer;
pub mod stats;
pub mod trending;
pub mod types;

pub use loop_state::{LoopSnapshot, LoopStatus, LoopTracker};
pub use scorer::{
    severity_for_z, Anomaly, DedupContext, DedupPolicy, NoDedup, RecentlyAlerted, ScoringPlan,
};
pub use trending::{rank, SeverityBucket, TrendItem, TrendLimit, TrendRange};
pub use types::*;
