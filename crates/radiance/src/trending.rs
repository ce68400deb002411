//! Trending ranker: which entities are moving, weighted by their alerts.
//!
//! Each entity's recent sub-window (last 7 observations) is compared with the
//! 7 before it. The relative change, in percent, is added to ten times the
//! summed severity of the entity's alerts in the same lookback range, so a
//! single alert outweighs a modest statistical drift.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::scorer::group_by_entity;
use crate::stats;
use crate::types::{AlertMark, Metric, RadianceError, RadianceResult};

/// Observations per sub-window.
pub const SUB_WINDOW: usize = 7;
/// Maximum points returned in a sparkline.
pub const SPARKLINE_LEN: usize = 30;
/// Each unit of alert weight is worth this many trend points.
pub const ALERT_WEIGHT_FACTOR: f64 = 10.0;

pub const DEFAULT_RANGE_DAYS: u32 = 30;
pub const MAX_RANGE_DAYS: u32 = 365;
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

/// Validated lookback range, written on the wire as `<N>d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendRange {
    days: u32,
}

impl TrendRange {
    pub fn days(self) -> u32 {
        self.days
    }

    /// Parse a `range` query value. Absent or blank means the default 30d;
    /// anything else must be `<N>d` with N in 1..=365.
    ///
    /// A malformed value is an error rather than a silent fallback to 30d,
    /// so a typo such as `range=7` is reported instead of quietly widening
    /// the lookback.
    pub fn parse(raw: Option<&str>) -> RadianceResult<Self> {
        let raw = match raw.map(str::trim) {
            None | Some("") => {
                return Ok(Self {
                    days: DEFAULT_RANGE_DAYS,
                })
            }
            Some(r) => r,
        };

        let days = raw
            .strip_suffix('d')
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| {
                RadianceError::Validation(format!("range must look like '30d', got '{raw}'"))
            })?;

        if !(1..=MAX_RANGE_DAYS).contains(&days) {
            return Err(RadianceError::Validation(format!(
                "range must be between 1d and {MAX_RANGE_DAYS}d, got '{raw}'"
            )));
        }
        Ok(Self { days })
    }
}

impl Default for TrendRange {
    fn default() -> Self {
        Self {
            days: DEFAULT_RANGE_DAYS,
        }
    }
}

/// Validated result limit in 1..=50.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendLimit(usize);

impl TrendLimit {
    pub fn get(self) -> usize {
        self.0
    }

    /// Clamp an arbitrary count into the allowed range.
    pub fn clamped(n: i64) -> Self {
        Self(n.clamp(1, MAX_LIMIT as i64) as usize)
    }

    /// Parse a `limit` query value. Absent means 10; non-numeric is an error;
    /// numbers outside 1..=50 are clamped.
    pub fn parse(raw: Option<&str>) -> RadianceResult<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self(DEFAULT_LIMIT)),
            Some(r) => r.parse::<i64>().map(Self::clamped).map_err(|_| {
                RadianceError::Validation(format!("limit must be an integer, got '{r}'"))
            }),
        }
    }
}

impl Default for TrendLimit {
    fn default() -> Self {
        Self(DEFAULT_LIMIT)
    }
}

/// Display bucket derived from alert weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBucket {
    Low,
    Medium,
    High,
}

impl SeverityBucket {
    pub fn from_weight(weight: u32) -> Self {
        if weight > 5 {
            SeverityBucket::High
        } else if weight > 2 {
            SeverityBucket::Medium
        } else {
            SeverityBucket::Low
        }
    }
}

/// One ranked entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendItem {
    pub entity_id: i64,
    pub score: f64,
    pub trend_score: f64,
    pub alert_weight: u32,
    pub severity: SeverityBucket,
    pub spark: Vec<f64>,
    /// Most recent raw value.
    pub radiance: f64,
}

/// Absolute percent change between the previous and recent sub-windows.
///
/// Needs at least two values. An empty previous window falls back to the
/// recent average (zero trend); a non-positive previous average scores 0.
pub fn trend_score(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let split = values.len().saturating_sub(SUB_WINDOW);
    let recent = &values[split..];
    let previous = &values[split.saturating_sub(SUB_WINDOW)..split];

    let recent_avg = stats::mean(recent)?;
    let previous_avg = stats::mean(previous).unwrap_or(recent_avg);

    if previous_avg > 0.0 {
        Some(((recent_avg - previous_avg) / previous_avg).abs() * 100.0)
    } else {
        Some(0.0)
    }
}

/// Weight of one alert: its severity level, or 1 when the severity is unknown.
pub fn alert_weight(mark: &AlertMark) -> u32 {
    mark.severity.map_or(1, |s| u32::from(s.level()))
}

/// Rank entities by `trendScore + alertWeight * 10`, highest first.
///
/// Entities with fewer than two observations are left out. Ties are broken
/// by entity id so the output is stable.
pub fn rank(metrics: &[Metric], alerts: &[AlertMark], limit: TrendLimit) -> Vec<TrendItem> {
    let mut weights: HashMap<i64, u32> = HashMap::new();
    for mark in alerts {
        *weights.entry(mark.entity_id).or_default() += alert_weight(mark);
    }

    let mut items: Vec<TrendItem> = group_by_entity(metrics)
        .into_iter()
        .filter_map(|(entity_id, series)| {
            let values: Vec<f64> = series.iter().map(|m| m.value).collect();
            let trend = trend_score(&values)?;
            let weight = weights.get(&entity_id).copied().unwrap_or(0);
            let spark_start = values.len().saturating_sub(SPARKLINE_LEN);

            Some(TrendItem {
                entity_id,
                score: trend + f64::from(weight) * ALERT_WEIGHT_FACTOR,
                trend_score: trend,
                alert_weight: weight,
                severity: SeverityBucket::from_weight(weight),
                radiance: *values.last()?,
                spark: values[spark_start..].to_vec(),
            })
        })
        .collect();

    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.entity_id.cmp(&b.entity_id))
    });
    items.truncate(limit.get());
    items
}
