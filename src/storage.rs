//! Event and heatmap persistence.
//!
//! `EventStore` is the persistence boundary the tracker writes through and
//! the aggregation engine reads from. Zone events are append-only; derived
//! heatmap records are written once per aggregation run (re-runs append
//! duplicates, which the store does not guard against).
//!
//! Records are stored as JSON payloads alongside the scalar columns the
//! query paths filter on.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::aggregate::{DailyHeatmap, DailyInsight, HourlyHeatmap};
use crate::{open_db_connection, EventType, Zone, ZoneEvent};

pub trait EventStore {
    fn insert_zone(&mut self, zone: &Zone) -> Result<()>;

    /// Every configured zone, in insertion order.
    fn all_zones(&self) -> Result<Vec<Zone>>;

    fn zones_for_camera(&self, camera_id: &str) -> Result<Vec<Zone>>;

    fn append_event(&mut self, event: &ZoneEvent) -> Result<()>;

    /// All events for a store in append order.
    fn events_for_store(&self, store_id: &str) -> Result<Vec<ZoneEvent>>;

    /// Exit events with `is_valid_visit = true`, in append order.
    fn valid_exit_events(&self, store_id: &str) -> Result<Vec<ZoneEvent>>;

    /// All exit events (valid and invalid) for one zone within a half-open
    /// time window.
    fn exit_events_between(
        &self,
        store_id: &str,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>>;

    /// Valid exit events across all zones within a half-open time window.
    fn valid_exit_events_between(
        &self,
        store_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>>;

    fn insert_hourly_heatmap(&mut self, heatmap: &HourlyHeatmap) -> Result<()>;
    fn hourly_heatmaps(&self, store_id: &str) -> Result<Vec<HourlyHeatmap>>;

    fn insert_daily_heatmap(&mut self, heatmap: &DailyHeatmap) -> Result<()>;
    fn daily_heatmaps(&self, store_id: &str) -> Result<Vec<DailyHeatmap>>;

    fn insert_daily_insight(&mut self, insight: &DailyInsight) -> Result<()>;
    fn daily_insights(&self, store_id: &str) -> Result<Vec<DailyInsight>>;
}

fn event_type_tag(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Entry => "entry",
        EventType::Exit => "exit",
    }
}

// -------------------- SQLite --------------------

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zones (
              id TEXT PRIMARY KEY,
              camera_id TEXT NOT NULL,
              seq INTEGER,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS zone_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              store_id TEXT NOT NULL,
              zone_id TEXT NOT NULL,
              event_type TEXT NOT NULL,
              is_valid_visit INTEGER NOT NULL,
              timestamp_ms INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hourly_heatmaps (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              store_id TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_heatmaps (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              store_id TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_insights (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              store_id TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_store_time
              ON zone_events(store_id, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_events_zone
              ON zone_events(store_id, zone_id, event_type);
            "#,
        )?;
        Ok(())
    }

    fn query_events(
        &self,
        sql: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ZoneEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(bind)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }
}

impl EventStore for SqliteEventStore {
    fn insert_zone(&mut self, zone: &Zone) -> Result<()> {
        zone.validate()?;
        let payload_json = serde_json::to_string(zone)?;
        let next_seq: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM zones", [], |row| {
                row.get(0)
            })?;
        self.conn.execute(
            "INSERT OR REPLACE INTO zones(id, camera_id, seq, payload_json) VALUES (?1, ?2, ?3, ?4)",
            params![zone.id, zone.camera_id, next_seq, payload_json],
        )?;
        Ok(())
    }

    fn all_zones(&self) -> Result<Vec<Zone>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM zones ORDER BY seq ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    fn zones_for_camera(&self, camera_id: &str) -> Result<Vec<Zone>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM zones WHERE camera_id = ?1 ORDER BY seq ASC")?;
        let mut rows = stmt.query(params![camera_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    fn append_event(&mut self, event: &ZoneEvent) -> Result<()> {
        let timestamp_ms = event.timestamp.timestamp_millis();
        let payload_json = serde_json::to_string(event)?;
        self.conn.execute(
            r#"
            INSERT INTO zone_events(store_id, zone_id, event_type, is_valid_visit, timestamp_ms, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.store_id,
                event.zone_id,
                event_type_tag(event.event_type),
                event.is_valid_visit as i64,
                timestamp_ms,
                payload_json
            ],
        )?;
        Ok(())
    }

    fn events_for_store(&self, store_id: &str) -> Result<Vec<ZoneEvent>> {
        self.query_events(
            "SELECT payload_json FROM zone_events WHERE store_id = ?1 ORDER BY id ASC",
            &[&store_id],
        )
    }

    fn valid_exit_events(&self, store_id: &str) -> Result<Vec<ZoneEvent>> {
        self.query_events(
            r#"
            SELECT payload_json FROM zone_events
            WHERE store_id = ?1 AND event_type = 'exit' AND is_valid_visit = 1
            ORDER BY id ASC
            "#,
            &[&store_id],
        )
    }

    fn exit_events_between(
        &self,
        store_id: &str,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        self.query_events(
            r#"
            SELECT payload_json FROM zone_events
            WHERE store_id = ?1 AND zone_id = ?2 AND event_type = 'exit'
              AND timestamp_ms >= ?3 AND timestamp_ms < ?4
            ORDER BY id ASC
            "#,
            &[&store_id, &zone_id, &start_ms, &end_ms],
        )
    }

    fn valid_exit_events_between(
        &self,
        store_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>> {
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();
        self.query_events(
            r#"
            SELECT payload_json FROM zone_events
            WHERE store_id = ?1 AND event_type = 'exit' AND is_valid_visit = 1
              AND timestamp_ms >= ?2 AND timestamp_ms < ?3
            ORDER BY id ASC
            "#,
            &[&store_id, &start_ms, &end_ms],
        )
    }

    fn insert_hourly_heatmap(&mut self, heatmap: &HourlyHeatmap) -> Result<()> {
        let payload_json = serde_json::to_string(heatmap)?;
        self.conn.execute(
            "INSERT INTO hourly_heatmaps(store_id, payload_json) VALUES (?1, ?2)",
            params![heatmap.store_id, payload_json],
        )?;
        Ok(())
    }

    fn hourly_heatmaps(&self, store_id: &str) -> Result<Vec<HourlyHeatmap>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM hourly_heatmaps WHERE store_id = ?1 ORDER BY id ASC")?;
        let mut rows = stmt.query(params![store_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    fn insert_daily_heatmap(&mut self, heatmap: &DailyHeatmap) -> Result<()> {
        let payload_json = serde_json::to_string(heatmap)?;
        self.conn.execute(
            "INSERT INTO daily_heatmaps(store_id, payload_json) VALUES (?1, ?2)",
            params![heatmap.store_id, payload_json],
        )?;
        Ok(())
    }

    fn daily_heatmaps(&self, store_id: &str) -> Result<Vec<DailyHeatmap>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM daily_heatmaps WHERE store_id = ?1 ORDER BY id ASC")?;
        let mut rows = stmt.query(params![store_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    fn insert_daily_insight(&mut self, insight: &DailyInsight) -> Result<()> {
        let payload_json = serde_json::to_string(insight)?;
        self.conn.execute(
            "INSERT INTO daily_insights(store_id, payload_json) VALUES (?1, ?2)",
            params![insight.store_id, payload_json],
        )?;
        Ok(())
    }

    fn daily_insights(&self, store_id: &str) -> Result<Vec<DailyInsight>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload_json FROM daily_insights WHERE store_id = ?1 ORDER BY id ASC")?;
        let mut rows = stmt.query(params![store_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }
}

// -------------------- In-Memory --------------------

/// Vec-backed store with the same filtering semantics as the SQLite store.
/// Used by unit and scenario tests.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    zones: Vec<Zone>,
    events: Vec<ZoneEvent>,
    hourly: Vec<HourlyHeatmap>,
    daily: Vec<DailyHeatmap>,
    insights: Vec<DailyInsight>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl EventStore for InMemoryEventStore {
    fn insert_zone(&mut self, zone: &Zone) -> Result<()> {
        zone.validate()?;
        if self.zones.iter().any(|z| z.id == zone.id) {
            return Err(anyhow!("zone {} already exists", zone.id));
        }
        self.zones.push(zone.clone());
        Ok(())
    }

    fn all_zones(&self) -> Result<Vec<Zone>> {
        Ok(self.zones.clone())
    }

    fn zones_for_camera(&self, camera_id: &str) -> Result<Vec<Zone>> {
        Ok(self
            .zones
            .iter()
            .filter(|z| z.camera_id == camera_id)
            .cloned()
            .collect())
    }

    fn append_event(&mut self, event: &ZoneEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn events_for_store(&self, store_id: &str) -> Result<Vec<ZoneEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.store_id == store_id)
            .cloned()
            .collect())
    }

    fn valid_exit_events(&self, store_id: &str) -> Result<Vec<ZoneEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.store_id == store_id && e.is_valid_exit())
            .cloned()
            .collect())
    }

    fn exit_events_between(
        &self,
        store_id: &str,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| {
                e.store_id == store_id
                    && e.zone_id == zone_id
                    && e.event_type == EventType::Exit
                    && start <= e.timestamp
                    && e.timestamp < end
            })
            .cloned()
            .collect())
    }

    fn valid_exit_events_between(
        &self,
        store_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ZoneEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| {
                e.store_id == store_id
                    && e.is_valid_exit()
                    && start <= e.timestamp
                    && e.timestamp < end
            })
            .cloned()
            .collect())
    }

    fn insert_hourly_heatmap(&mut self, heatmap: &HourlyHeatmap) -> Result<()> {
        self.hourly.push(heatmap.clone());
        Ok(())
    }

    fn hourly_heatmaps(&self, store_id: &str) -> Result<Vec<HourlyHeatmap>> {
        Ok(self
            .hourly
            .iter()
            .filter(|h| h.store_id == store_id)
            .cloned()
            .collect())
    }

    fn insert_daily_heatmap(&mut self, heatmap: &DailyHeatmap) -> Result<()> {
        self.daily.push(heatmap.clone());
        Ok(())
    }

    fn daily_heatmaps(&self, store_id: &str) -> Result<Vec<DailyHeatmap>> {
        Ok(self
            .daily
            .iter()
            .filter(|h| h.store_id == store_id)
            .cloned()
            .collect())
    }

    fn insert_daily_insight(&mut self, insight: &DailyInsight) -> Result<()> {
        self.insights.push(insight.clone());
        Ok(())
    }

    fn daily_insights(&self, store_id: &str) -> Result<Vec<DailyInsight>> {
        Ok(self
            .insights
            .iter()
            .filter(|i| i.store_id == store_id)
            .cloned()
            .collect())
    }
}
