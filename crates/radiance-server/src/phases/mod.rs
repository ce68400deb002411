//! The four loop phases. Each runner persists its work and its event in one
//! transaction, then stamps the tracker.

pub mod act;
pub mod learn;
pub mod reason;
pub mod sense;

pub use act::{LogNotifier, Notifier};
pub use reason::ScoreOutcome;
