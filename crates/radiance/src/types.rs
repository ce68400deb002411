//! Core data types for entities, metrics, alerts, and phase events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A monitored geographic unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub region: String,
    pub source: String,
}

/// One dated observation for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub entity_id: i64,
    pub date: NaiveDate,
    pub value: f64,
}

/// Ordinal alert priority derived from z-score bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Severity {
    /// Numeric level as stored and summed by the trending ranker.
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Decode a stored level. Anything outside 1..=3 is rejected.
    pub fn from_level(level: i64) -> Option<Self> {
        match level {
            1 => Some(Severity::Low),
            2 => Some(Severity::Medium),
            3 => Some(Severity::High),
            _ => None,
        }
    }

    /// Human message attached to alerts of this severity.
    pub fn message(self) -> &'static str {
        match self {
            Severity::High => "Critical anomaly",
            Severity::Medium => "Anomaly detected",
            Severity::Low => "Mild anomaly",
        }
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.level()
    }
}

impl TryFrom<u8> for Severity {
    type Error = RadianceError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Severity::from_level(level as i64)
            .ok_or_else(|| RadianceError::Validation(format!("severity out of range: {level}")))
    }
}

/// A persisted anomaly notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub entity_id: i64,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// An alert the scorer wants written. The store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub entity_id: i64,
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

/// Minimal alert view consumed by the trending ranker and dedup policies.
///
/// `severity` is `None` when the stored value could not be decoded; the
/// ranker weighs such alerts as 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertMark {
    pub entity_id: i64,
    pub severity: Option<Severity>,
    pub detected_at: DateTime<Utc>,
}

/// One of the four named stages of the monitoring loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Sense,
    Reason,
    Act,
    Learn,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Sense, Phase::Reason, Phase::Act, Phase::Learn];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Sense => "SENSE",
            Phase::Reason => "REASON",
            Phase::Act => "ACT",
            Phase::Learn => "LEARN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENSE" => Some(Phase::Sense),
            "REASON" => Some(Phase::Reason),
            "ACT" => Some(Phase::Act),
            "LEARN" => Some(Phase::Learn),
            _ => None,
        }
    }
}

/// Audit-log row for one phase execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub phase: Phase,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An event to append; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub phase: Phase,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Errors raised by the core library.
///
/// Statistical edge cases (zero deviation, short windows) are never errors;
/// only malformed caller input is.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RadianceError {
    #[error("Invalid input: {0}")]
    Validation(String),
}

/// Convenience result type.
pub type RadianceResult<T> = Result<T, RadianceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_levels() {
        assert_eq!(Severity::Low.level(), 1);
        assert_eq!(Severity::Medium.level(), 2);
        assert_eq!(Severity::High.level(), 3);
        assert_eq!(Severity::from_level(0), None);
        assert_eq!(Severity::from_level(4), None);
        assert!(Severity::High > Severity::Low);
    }

    #[test]
    fn test_severity_serializes_as_number() {
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "2");
        let back: Severity = serde_json::from_str("3").unwrap();
        assert_eq!(back, Severity::High);
        assert!(serde_json::from_str::<Severity>("7").is_err());
    }

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::Reason).unwrap(), "\"REASON\"");
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("reason"), None);
    }
}
