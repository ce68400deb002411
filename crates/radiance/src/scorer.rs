//! Anomaly scoring: z-score of each entity's latest value against its window.
//!
//! One invocation looks at every metric in the trailing window, scores each
//! entity independently, and produces at most one alert per entity. Nothing
//! here touches storage; the caller persists the resulting [`ScoringPlan`]
//! atomically.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::stats;
use crate::types::{AlertMark, Metric, NewAlert, Severity};

/// Trailing window the scorer reads, in days.
pub const SCORING_WINDOW_DAYS: i64 = 30;

/// Entities with fewer observations than this in the window are skipped.
pub const MIN_OBSERVATIONS: usize = 5;

/// Lower bound (inclusive) of the high band.
pub const HIGH_Z: f64 = 2.0;
/// Lower bound (inclusive) of the medium band.
pub const MEDIUM_Z: f64 = 1.5;
/// Lower bound (inclusive) of the low band.
pub const LOW_Z: f64 = 1.2;

/// First calendar date of a `days`-long window that ends on `today`.
///
/// Both ends are inclusive, so a 30-day window ending on the 30th starts on
/// the 1st.
pub fn window_start(today: NaiveDate, days: i64) -> NaiveDate {
    today - Duration::days(days.max(1) - 1)
}

/// Midnight UTC at the start of the window, for timestamp columns.
pub fn window_start_utc(today: NaiveDate, days: i64) -> DateTime<Utc> {
    window_start(today, days).and_time(NaiveTime::MIN).and_utc()
}

/// Summary statistics for one entity's window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowScore {
    pub observations: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub last: f64,
    pub z: f64,
}

/// An entity whose latest value landed in one of the severity bands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub entity_id: i64,
    pub severity: Severity,
    pub score: WindowScore,
}

/// What a dedup policy gets to look at besides the anomaly itself.
#[derive(Debug, Clone, Copy)]
pub struct DedupContext<'a> {
    /// Time of the current scoring run.
    pub now: DateTime<Utc>,
    /// Earlier alerts for the same entity inside the scoring window.
    pub prior: &'a [AlertMark],
}

/// Decides whether an anomaly should be dropped because the entity was
/// already alerted on.
///
/// The shipped behavior is [`NoDedup`]: an entity that stays above threshold
/// gets a fresh alert on every run.
pub trait DedupPolicy: Send + Sync {
    fn suppress(&self, anomaly: &Anomaly, ctx: &DedupContext<'_>) -> bool;
}

/// Never suppresses anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDedup;

impl DedupPolicy for NoDedup {
    fn suppress(&self, _anomaly: &Anomaly, _ctx: &DedupContext<'_>) -> bool {
        false
    }
}

/// Suppresses an anomaly when the entity already has an alert of the same or
/// higher severity detected within `within` of the run.
#[derive(Debug, Clone, Copy)]
pub struct RecentlyAlerted {
    pub within: Duration,
}

impl RecentlyAlerted {
    pub fn new(within: Duration) -> Self {
        Self { within }
    }
}

impl DedupPolicy for RecentlyAlerted {
    fn suppress(&self, anomaly: &Anomaly, ctx: &DedupContext<'_>) -> bool {
        let cutoff = ctx.now - self.within;
        ctx.prior.iter().any(|mark| {
            mark.detected_at >= cutoff
                && mark.severity.map_or(true, |s| s >= anomaly.severity)
        })
    }
}

/// Alerts one scoring run wants to write, plus bookkeeping for the event row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoringPlan {
    pub alerts: Vec<NewAlert>,
    /// Entities that had enough observations to be scored.
    pub entities_scored: usize,
    /// Anomalies dropped by the dedup policy.
    pub suppressed: usize,
}

/// Map a z-score onto a severity band. Highest band wins; bounds are inclusive.
pub fn severity_for_z(z: f64) -> Option<Severity> {
    if z >= HIGH_Z {
        Some(Severity::High)
    } else if z >= MEDIUM_Z {
        Some(Severity::Medium)
    } else if z >= LOW_Z {
        Some(Severity::Low)
    } else {
        None
    }
}

/// Score a chronologically ordered series. `None` if it is too short.
pub fn score_series(values: &[f64]) -> Option<WindowScore> {
    if values.len() < MIN_OBSERVATIONS {
        return None;
    }
    let mean = stats::mean(values)?;
    let std_dev = stats::population_std_dev(values)?;
    let last = *values.last()?;

    Some(WindowScore {
        observations: values.len(),
        mean,
        std_dev,
        last,
        z: stats::z_score(last, mean, std_dev),
    })
}

/// Group metrics by entity, ordered by date within each entity.
pub fn group_by_entity(metrics: &[Metric]) -> BTreeMap<i64, Vec<Metric>> {
    let mut grouped: BTreeMap<i64, Vec<Metric>> = BTreeMap::new();
    for m in metrics {
        grouped.entry(m.entity_id).or_default().push(*m);
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|m| m.date);
    }
    grouped
}

/// Score every entity in the window. Returns the anomalies and the number of
/// entities that qualified for scoring.
pub fn detect(metrics: &[Metric]) -> (Vec<Anomaly>, usize) {
    let mut anomalies = Vec::new();
    let mut scored = 0;

    for (entity_id, series) in group_by_entity(metrics) {
        let values: Vec<f64> = series.iter().map(|m| m.value).collect();
        let Some(score) = score_series(&values) else {
            tracing::trace!(entity_id, observations = values.len(), "insufficient data");
            continue;
        };
        scored += 1;

        if let Some(severity) = severity_for_z(score.z) {
            anomalies.push(Anomaly {
                entity_id,
                severity,
                score,
            });
        }
    }

    (anomalies, scored)
}

/// Run the detector and turn its anomalies into alert rows.
///
/// `codes` maps entity id to entity code; an anomaly for an id that is not in
/// the map is dropped, since an alert must reference a known entity. `prior`
/// holds alerts already on record, handed to `dedup` per entity.
pub fn plan(
    metrics: &[Metric],
    codes: &HashMap<i64, String>,
    prior: &[AlertMark],
    dedup: &dyn DedupPolicy,
    detected_at: DateTime<Utc>,
) -> ScoringPlan {
    let (anomalies, entities_scored) = detect(metrics);
    let mut history: HashMap<i64, Vec<AlertMark>> = HashMap::new();
    for mark in prior {
        history.entry(mark.entity_id).or_default().push(*mark);
    }
    let mut plan = ScoringPlan {
        entities_scored,
        ..ScoringPlan::default()
    };

    for anomaly in anomalies {
        let Some(code) = codes.get(&anomaly.entity_id) else {
            tracing::warn!(entity_id = anomaly.entity_id, "anomaly for unknown entity dropped");
            continue;
        };
        let ctx = DedupContext {
            now: detected_at,
            prior: history
                .get(&anomaly.entity_id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        if dedup.suppress(&anomaly, &ctx) {
            plan.suppressed += 1;
            continue;
        }
        tracing::debug!(
            code = %code,
            z = anomaly.score.z,
            severity = anomaly.severity.level(),
            "anomaly detected"
        );
        plan.alerts.push(NewAlert {
            entity_id: anomaly.entity_id,
            code: code.clone(),
            severity: anomaly.severity,
            message: anomaly.severity.message().to_string(),
            detected_at,
        });
    }

    plan
}
