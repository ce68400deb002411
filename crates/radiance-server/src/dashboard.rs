//! Read-only views: trending entities, loop status, and list limits.

use chrono::{DateTime, Duration, Utc};

use radiance::scorer::{window_start, window_start_utc};
use radiance::{rank, LoopSnapshot, TrendLimit, TrendRange};

use crate::store::MetricStore;
use crate::types::{ApiError, ApiResult, LoopStatusResponse, TrendingItem, TrendingResponse};

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

/// Parse the `limit` query of the alert and event listings.
pub fn list_limit(raw: Option<&str>) -> ApiResult<usize> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(DEFAULT_LIST_LIMIT),
        Some(r) => r,
    };
    let n: i64 = raw
        .parse()
        .map_err(|_| ApiError::Validation(format!("limit must be an integer, got '{raw}'")))?;
    Ok(n.clamp(1, MAX_LIST_LIMIT as i64) as usize)
}

/// Rank entities over the last `range` calendar days (today included) and
/// attach their display fields.
pub fn trending(
    store: &MetricStore,
    range: TrendRange,
    limit: TrendLimit,
    now: DateTime<Utc>,
) -> ApiResult<TrendingResponse> {
    let today = now.date_naive();
    let days = i64::from(range.days());
    let metrics = store.metrics_since(window_start(today, days))?;
    let marks = store.alert_marks_since(window_start_utc(today, days))?;
    let entities = store.entity_map()?;

    let top_items = rank(&metrics, &marks, limit)
        .into_iter()
        .filter_map(|item| {
            let entity = entities.get(&item.entity_id)?;
            Some(TrendingItem {
                code: entity.code.clone(),
                name: entity.name.clone(),
                region: entity.region.clone(),
                score: item.score,
                spark: item.spark,
                radiance: item.radiance,
                severity: item.severity,
            })
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        range_days = range.days(),
        items = top_items.len(),
        "trending computed"
    );

    Ok(TrendingResponse {
        top_items,
        timestamp: now,
    })
}

pub fn loop_status(
    snapshot: LoopSnapshot,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> LoopStatusResponse {
    LoopStatusResponse {
        status: snapshot.status(now, stale_after),
        latency_minutes: snapshot.latency_minutes(),
        phases: snapshot,
    }
}
