//! SQLite-backed storage for entities, metrics, alerts, and phase events.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use radiance::{Alert, AlertMark, Entity, Event, Metric, NewAlert, NewEvent, Phase, Severity};

use super::schema::SCHEMA;
use crate::types::{ApiError, ApiResult, EntityInput, MetricInput};

const ALERT_COLUMNS: &str =
    "id, entity_id, code, severity, message, detected_at, created_at, acknowledged_at, sent_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Rows removed by a retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PruneCounts {
    pub alerts: usize,
    pub events: usize,
}

/// Owns the SQLite connection. Every multi-row write runs in one transaction.
pub struct MetricStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MetricStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> ApiResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::info!("Opening metric store: {}", path.display());
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> ApiResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> ApiResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path })
    }

    /// File backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ── Sense ───────────────────────────────────────────────────

    /// Upsert entities, upsert metrics, and append the SENSE event atomically.
    ///
    /// A metric whose code matches neither an existing entity nor one in
    /// `entities` aborts the whole batch.
    pub fn ingest(
        &mut self,
        entities: &[EntityInput],
        metrics: &[MetricInput],
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> ApiResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert_entity = tx.prepare(
                "INSERT INTO entities (code, name, region, source) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(code) DO UPDATE SET
                    name = excluded.name, region = excluded.region, source = excluded.source",
            )?;
            for e in entities {
                upsert_entity.execute(params![e.code, e.name, e.region, e.source])?;
            }

            let mut lookup = tx.prepare("SELECT id FROM entities WHERE code = ?1")?;
            let mut upsert_metric = tx.prepare(
                "INSERT INTO metrics (entity_id, date, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(entity_id, date) DO UPDATE SET value = excluded.value",
            )?;
            let mut ids: HashMap<&str, i64> = HashMap::new();
            for m in metrics {
                let entity_id = match ids.get(m.code.as_str()) {
                    Some(id) => *id,
                    None => {
                        let id: i64 = lookup
                            .query_row(params![m.code], |row| row.get(0))
                            .optional()?
                            .ok_or_else(|| {
                                ApiError::Validation(format!("unknown entity code '{}'", m.code))
                            })?;
                        ids.insert(m.code.as_str(), id);
                        id
                    }
                };
                upsert_metric.execute(params![
                    entity_id,
                    m.date.format(DATE_FORMAT).to_string(),
                    m.value
                ])?;
            }
        }
        insert_event(&tx, event, now)?;
        tx.commit()?;
        Ok(())
    }

    pub fn entities(&self) -> ApiResult<Vec<Entity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, code, name, region, source FROM entities ORDER BY code")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Entity {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                    region: row.get(3)?,
                    source: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Entities keyed by id.
    pub fn entity_map(&self) -> ApiResult<HashMap<i64, Entity>> {
        Ok(self.entities()?.into_iter().map(|e| (e.id, e)).collect())
    }

    /// All metrics dated on or after `since`, ordered by entity then date.
    pub fn metrics_since(&self, since: NaiveDate) -> ApiResult<Vec<Metric>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, date, value FROM metrics WHERE date >= ?1 ORDER BY entity_id, date",
        )?;
        let rows = stmt
            .query_map(params![since.format(DATE_FORMAT).to_string()], |row| {
                Ok(Metric {
                    entity_id: row.get(0)?,
                    date: date_from_sql(row, 1)?,
                    value: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Reason ──────────────────────────────────────────────────

    /// Write one scoring run: every alert plus its REASON event, or nothing.
    pub fn record_scoring(
        &mut self,
        alerts: &[NewAlert],
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> ApiResult<Vec<i64>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(alerts.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO alerts (entity_id, code, severity, message, detected_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for a in alerts {
                stmt.execute(params![
                    a.entity_id,
                    a.code,
                    a.severity.level(),
                    a.message,
                    ts_to_sql(a.detected_at),
                    ts_to_sql(now),
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        insert_event(&tx, event, now)?;
        tx.commit()?;
        Ok(ids)
    }

    /// Entity, decoded severity and detection time of every alert detected
    /// since `since`.
    pub fn alert_marks_since(&self, since: DateTime<Utc>) -> ApiResult<Vec<AlertMark>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, severity, detected_at FROM alerts WHERE detected_at >= ?1",
        )?;
        let rows = stmt
            .query_map(params![ts_to_sql(since)], |row| {
                let level: Option<i64> = row.get(1)?;
                Ok(AlertMark {
                    entity_id: row.get(0)?,
                    severity: level.and_then(Severity::from_level),
                    detected_at: ts_from_sql(row, 2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Act ─────────────────────────────────────────────────────

    /// Alerts not yet sent, oldest first.
    pub fn unsent_alerts(&self, limit: usize) -> ApiResult<Vec<Alert>> {
        self.query_alerts(
            &format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE sent_at IS NULL
                 ORDER BY created_at ASC, id ASC LIMIT ?1"
            ),
            params![limit as i64],
        )
    }

    /// Stamp `sent_at` on the given alerts and append the ACT event atomically.
    /// Returns how many alerts changed.
    pub fn mark_sent(
        &mut self,
        ids: &[i64],
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> ApiResult<usize> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE alerts SET sent_at = ?1 WHERE id = ?2 AND sent_at IS NULL")?;
            for id in ids {
                changed += stmt.execute(params![ts_to_sql(now), id])?;
            }
        }
        insert_event(&tx, event, now)?;
        tx.commit()?;
        Ok(changed)
    }

    // ── Learn ───────────────────────────────────────────────────

    pub fn alert(&self, id: i64) -> ApiResult<Option<Alert>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], row_to_alert).optional()?)
    }

    /// Acknowledge an alert. The LEARN event is written only when the alert
    /// was not already acknowledged. Returns `None` for an unknown id, else
    /// the alert and whether this call changed it.
    pub fn acknowledge(
        &mut self,
        id: i64,
        event: &NewEvent,
        now: DateTime<Utc>,
    ) -> ApiResult<Option<(Alert, bool)>> {
        let tx = self.conn.transaction()?;
        let changed = tx.execute(
            "UPDATE alerts SET acknowledged_at = ?1 WHERE id = ?2 AND acknowledged_at IS NULL",
            params![ts_to_sql(now), id],
        )? > 0;
        if changed {
            insert_event(&tx, event, now)?;
        }
        let alert = tx
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
                params![id],
                row_to_alert,
            )
            .optional()?;
        tx.commit()?;
        Ok(alert.map(|a| (a, changed)))
    }

    // ── Listings ────────────────────────────────────────────────

    /// Newest alerts first.
    pub fn alerts(&self, limit: usize, unacknowledged_only: bool) -> ApiResult<Vec<Alert>> {
        self.query_alerts(
            &format!(
                "SELECT {ALERT_COLUMNS} FROM alerts
                 WHERE (?1 = 0 OR acknowledged_at IS NULL)
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ),
            params![unacknowledged_only, limit as i64],
        )
    }

    /// Newest events first.
    pub fn events(&self, limit: usize) -> ApiResult<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phase, message, metadata, created_at FROM events
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                let phase: String = row.get(1)?;
                let metadata: String = row.get(3)?;
                Ok(Event {
                    id: row.get(0)?,
                    phase: Phase::parse(&phase).ok_or_else(|| {
                        conversion_error(1, Type::Text, format!("unknown phase '{phase}'"))
                    })?,
                    message: row.get(2)?,
                    metadata: serde_json::from_str(&metadata).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
                    })?,
                    created_at: ts_from_sql(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_alerts(&self) -> ApiResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?)
    }

    pub fn count_events(&self, phase: Phase) -> ApiResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE phase = ?1",
            params![phase.as_str()],
            |row| row.get(0),
        )?)
    }

    // ── Retention ───────────────────────────────────────────────

    /// Delete alerts and events created before `before`. Entities and
    /// metrics are never touched.
    pub fn prune(&mut self, before: DateTime<Utc>) -> ApiResult<PruneCounts> {
        let cutoff = ts_to_sql(before);
        let tx = self.conn.transaction()?;
        let alerts = tx.execute("DELETE FROM alerts WHERE created_at < ?1", params![cutoff])?;
        let events = tx.execute("DELETE FROM events WHERE created_at < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(PruneCounts { alerts, events })
    }

    fn query_alerts(&self, sql: &str, params: impl rusqlite::Params) -> ApiResult<Vec<Alert>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_alert)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn insert_event(conn: &Connection, event: &NewEvent, now: DateTime<Utc>) -> ApiResult<i64> {
    conn.execute(
        "INSERT INTO events (phase, message, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            event.phase.as_str(),
            event.message,
            serde_json::to_string(&event.metadata)?,
            ts_to_sql(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let level: i64 = row.get(3)?;
    Ok(Alert {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        code: row.get(2)?,
        severity: Severity::from_level(level).ok_or_else(|| {
            conversion_error(3, Type::Integer, format!("severity out of range: {level}"))
        })?,
        message: row.get(4)?,
        detected_at: ts_from_sql(row, 5)?,
        created_at: ts_from_sql(row, 6)?,
        acknowledged_at: opt_ts_from_sql(row, 7)?,
        sent_at: opt_ts_from_sql(row, 8)?,
    })
}

/// Fixed-width UTC timestamps so string comparison in SQL orders correctly.
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        None => Ok(None),
        Some(_) => ts_from_sql(row, idx).map(Some),
    }
}

fn date_from_sql(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entity(code: &str) -> EntityInput {
        EntityInput {
            code: code.to_string(),
            name: format!("{code} name"),
            region: "north".to_string(),
            source: "viirs".to_string(),
        }
    }

    fn metric(code: &str, date: &str, value: f64) -> MetricInput {
        MetricInput {
            code: code.to_string(),
            date: NaiveDate::parse_from_str(date, DATE_FORMAT).unwrap(),
            value,
        }
    }

    fn sense_event() -> NewEvent {
        NewEvent {
            phase: Phase::Sense,
            message: "ingest".to_string(),
            metadata: json!({}),
        }
    }

    fn reason_event(n: usize) -> NewEvent {
        NewEvent {
            phase: Phase::Reason,
            message: "scored".to_string(),
            metadata: json!({ "alertsRaised": n }),
        }
    }

    fn seeded() -> MetricStore {
        let mut store = MetricStore::open_in_memory().unwrap();
        store
            .ingest(
                &[entity("E1"), entity("E2")],
                &[
                    metric("E1", "2026-10-01", 10.0),
                    metric("E1", "2026-10-02", 11.0),
                    metric("E2", "2026-09-01", 3.0),
                ],
                &sense_event(),
                Utc::now(),
            )
            .unwrap();
        store
    }

    fn new_alert(entity_id: i64, severity: Severity) -> NewAlert {
        NewAlert {
            entity_id,
            code: "E1".to_string(),
            severity,
            message: severity.message().to_string(),
            detected_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("radiance.db");
        let store = MetricStore::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_ingest_and_window_read() {
        let store = seeded();
        assert_eq!(store.entities().unwrap().len(), 2);
        assert_eq!(store.count_events(Phase::Sense).unwrap(), 1);

        let since = NaiveDate::from_ymd_opt(2026, 9, 15).unwrap();
        let metrics = store.metrics_since(since).unwrap();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| m.date >= since));
    }

    #[test]
    fn test_entity_date_uniqueness_upserts() {
        let mut store = seeded();
        store
            .ingest(&[], &[metric("E1", "2026-10-01", 99.0)], &sense_event(), Utc::now())
            .unwrap();
        let since = NaiveDate::from_ymd_opt(2026, 10, 1).unwrap();
        let metrics = store.metrics_since(since).unwrap();
        let oct1: Vec<_> = metrics.iter().filter(|m| m.date == since).collect();
        assert_eq!(oct1.len(), 1);
        assert_eq!(oct1[0].value, 99.0);
    }

    #[test]
    fn test_entity_rename_keeps_id() {
        let mut store = seeded();
        let before = store.entities().unwrap();
        let mut renamed = entity("E1");
        renamed.name = "Renamed".to_string();
        store.ingest(&[renamed], &[], &sense_event(), Utc::now()).unwrap();
        let after = store.entities().unwrap();
        let e1_before = before.iter().find(|e| e.code == "E1").unwrap();
        let e1_after = after.iter().find(|e| e.code == "E1").unwrap();
        assert_eq!(e1_before.id, e1_after.id);
        assert_eq!(e1_after.name, "Renamed");
    }

    #[test]
    fn test_unknown_code_rolls_back_ingest() {
        let mut store = seeded();
        let err = store
            .ingest(
                &[entity("E3")],
                &[metric("E3", "2026-10-03", 1.0), metric("NOPE", "2026-10-03", 1.0)],
                &sense_event(),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(store.entities().unwrap().len(), 2);
        assert_eq!(store.count_events(Phase::Sense).unwrap(), 1);
    }

    #[test]
    fn test_record_scoring_writes_alerts_and_event() {
        let mut store = seeded();
        let e1 = store.entities().unwrap()[0].id;
        let ids = store
            .record_scoring(
                &[new_alert(e1, Severity::High), new_alert(e1, Severity::Low)],
                &reason_event(2),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.count_alerts().unwrap(), 2);
        assert_eq!(store.count_events(Phase::Reason).unwrap(), 1);

        let events = store.events(10).unwrap();
        assert_eq!(events[0].phase, Phase::Reason);
        assert_eq!(events[0].metadata["alertsRaised"], 2);
    }

    #[test]
    fn test_record_scoring_is_all_or_nothing() {
        let mut store = seeded();
        let e1 = store.entities().unwrap()[0].id;
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER fail_events BEFORE INSERT ON events
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let err = store
            .record_scoring(&[new_alert(e1, Severity::High)], &reason_event(1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ApiError::Persistence(_)));
        assert_eq!(store.count_alerts().unwrap(), 0);
    }

    #[test]
    fn test_alert_requires_valid_entity() {
        let mut store = seeded();
        let err = store
            .record_scoring(&[new_alert(4242, Severity::High)], &reason_event(1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, ApiError::Persistence(_)));
        assert_eq!(store.count_alerts().unwrap(), 0);
        assert_eq!(store.count_events(Phase::Reason).unwrap(), 0);
    }

    #[test]
    fn test_alert_marks_since() {
        let mut store = seeded();
        let e1 = store.entities().unwrap()[0].id;
        let mut old = new_alert(e1, Severity::Medium);
        old.detected_at = Utc::now() - Duration::days(60);
        store
            .record_scoring(&[old, new_alert(e1, Severity::High)], &reason_event(2), Utc::now())
            .unwrap();

        let marks = store.alert_marks_since(Utc::now() - Duration::days(30)).unwrap();
        assert_eq!(marks.len(), 1);
        assert_eq!(marks[0].severity, Some(Severity::High));
        assert!(marks[0].detected_at > Utc::now() - Duration::days(1));
    }

    #[test]
    fn test_mark_sent_and_acknowledge() {
        let mut store = seeded();
        let e1 = store.entities().unwrap()[0].id;
        let ids = store
            .record_scoring(&[new_alert(e1, Severity::High)], &reason_event(1), Utc::now())
            .unwrap();

        let unsent = store.unsent_alerts(10).unwrap();
        assert_eq!(unsent.len(), 1);

        let act = NewEvent {
            phase: Phase::Act,
            message: "sent".to_string(),
            metadata: json!({ "alertsSent": 1 }),
        };
        assert_eq!(store.mark_sent(&ids, &act, Utc::now()).unwrap(), 1);
        assert_eq!(store.mark_sent(&ids, &act, Utc::now()).unwrap(), 0);
        assert!(store.unsent_alerts(10).unwrap().is_empty());

        let learn = NewEvent {
            phase: Phase::Learn,
            message: "ack".to_string(),
            metadata: json!({ "alertId": ids[0] }),
        };
        let (alert, changed) = store.acknowledge(ids[0], &learn, Utc::now()).unwrap().unwrap();
        assert!(changed);
        assert!(alert.acknowledged_at.is_some());
        assert!(alert.sent_at.is_some());

        let (again, changed) = store.acknowledge(ids[0], &learn, Utc::now()).unwrap().unwrap();
        assert!(!changed);
        assert_eq!(again.acknowledged_at, alert.acknowledged_at);
        assert_eq!(store.count_events(Phase::Learn).unwrap(), 1);

        assert!(store.acknowledge(9999, &learn, Utc::now()).unwrap().is_none());
        assert!(store.alerts(10, true).unwrap().is_empty());
        assert_eq!(store.alerts(10, false).unwrap().len(), 1);
    }

    #[test]
    fn test_prune_removes_only_old_alerts_and_events() {
        let mut store = seeded();
        let e1 = store.entities().unwrap()[0].id;
        let long_ago = Utc::now() - Duration::days(200);
        store
            .record_scoring(&[new_alert(e1, Severity::Low)], &reason_event(1), long_ago)
            .unwrap();
        store
            .record_scoring(&[new_alert(e1, Severity::High)], &reason_event(1), Utc::now())
            .unwrap();

        let counts = store.prune(Utc::now() - Duration::days(90)).unwrap();
        assert_eq!(counts, PruneCounts { alerts: 1, events: 1 });
        assert_eq!(store.count_alerts().unwrap(), 1);
        assert_eq!(store.entities().unwrap().len(), 2);
        let all = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        assert_eq!(store.metrics_since(all).unwrap().len(), 3);
    }
}
