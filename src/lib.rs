//! Footfall Analytics Kernel
//!
//! This crate implements the analytics core for video-derived retail
//! occupancy and engagement analysis.
//!
//! # Architecture
//!
//! Detections flow through three stateful stages and one batch engine:
//!
//! 1. **Identity Matcher** (`identity`): re-associates per-frame detections
//!    into persistent person identities via embedding similarity.
//! 2. **Zone-Dwell Tracker** (`tracker`): converts per-frame zone membership
//!    into validated entry/exit visit events.
//! 3. **Event Store** (`storage`): append-only persistence for zone events
//!    and derived heatmap records.
//! 4. **Aggregation Engine** (`aggregate`): rolls persisted events into
//!    hourly heatmaps, daily heatmaps, and end-of-day insights.
//!
//! The HTTP surface, real video decode, and neural inference backends live
//! outside this crate; `detect` defines the call boundary they plug into.
//!
//! # Module Structure
//!
//! - `geometry`: point-in-polygon and ground-point projection
//! - `identity`: embedding feature database and matcher
//! - `tracker`: per-camera zone-dwell state machine
//! - `aggregate`: hourly/daily/insight batch stages
//! - `storage`: SQLite and in-memory event stores
//! - `detect`: detection and embedding source boundary
//! - `config`: daemon configuration loading
//! - `pipeline`: per-camera frame loop and orchestration

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub mod aggregate;
pub mod config;
pub mod detect;
pub mod geometry;
pub mod identity;
pub mod pipeline;
pub mod storage;
pub mod tracker;

pub use aggregate::{DailyHeatmap, DailyInsight, HeatmapGenerator, HourlyHeatmap, ZoneInsight};
pub use detect::{
    BoundingBox, Detection, DetectionSource, EmbeddingSource, StubCameraSource,
    StubEmbeddingSource,
};
pub use identity::{IdentityMatcher, MatcherConfig};
pub use pipeline::{Pipeline, ProcessingState, ProcessingStatus, StatusRegistry};
pub use storage::{EventStore, InMemoryEventStore, SqliteEventStore};
pub use tracker::{ZoneDwellTracker, ZoneLookup, ZoneSet};

/// Shared-cache in-memory SQLite URI, unique per call. Test databases only.
pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:footfall_kernel_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

// -------------------- Zone Descriptors --------------------

/// Default minimum dwell threshold in seconds for zones that do not set one.
pub const DEFAULT_MINIMUM_DWELL_S: u32 = 5;

/// A 2D point in camera pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Zone descriptor, immutable for the duration of a processing session.
///
/// The polygon is an ordered vertex list defining a simple closed region;
/// the closing edge back to the first vertex is implicit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub camera_id: String,
    pub zone_identifier: String,
    pub name: String,
    pub polygon: Vec<Point>,
    pub zone_type: String,
    #[serde(default = "default_minimum_dwell")]
    pub minimum_dwell_threshold_s: u32,
}

fn default_minimum_dwell() -> u32 {
    DEFAULT_MINIMUM_DWELL_S
}

impl Zone {
    /// Reject malformed geometry before tracking begins. A zone with fewer
    /// than three polygon points is a configuration error, never a
    /// frame-processing error.
    pub fn validate(&self) -> Result<()> {
        validate_zone_identifier(&self.zone_identifier)?;
        if self.polygon.len() < 3 {
            return Err(anyhow!(
                "zone {}: polygon needs at least 3 points, got {}",
                self.zone_identifier,
                self.polygon.len()
            ));
        }
        Ok(())
    }
}

// -------------------- Zone Identifier Discipline --------------------

/// A conforming zone identifier is a short local slug, not free text.
///
/// Allowed: "entrance", "aisle_3", "checkout-west"
/// Disallowed: anything with whitespace, slashes, or punctuation outside [_-].
pub fn validate_zone_identifier(zone_identifier: &str) -> Result<()> {
    // Compile once for hot paths.
    static ZONE_IDENT_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_IDENT_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap());

    let ident = zone_identifier.to_lowercase();
    if !re.is_match(&ident) {
        return Err(anyhow!("zone identifier must match ^[a-z0-9_-]{{1,64}}$"));
    }
    Ok(())
}

// -------------------- Zone Events --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Entry,
    Exit,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    BelowMinimumDwell,
    StaleVisitTimeout,
}

/// An immutable fact once emitted: one person crossed one zone boundary.
///
/// Entry events never carry a dwell time; exit events always do. This is
/// the sole unit handed to persistence and consumed by aggregation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneEvent {
    pub store_id: String,
    pub camera_id: String,
    pub zone_id: String,
    pub person_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub dwell_time_s: Option<f64>,
    pub is_valid_visit: bool,
    pub rejection_reason: Option<RejectionReason>,
}

impl ZoneEvent {
    /// True for exit events that passed the minimum-dwell validation.
    pub fn is_valid_exit(&self) -> bool {
        self.event_type == EventType::Exit && self.is_valid_visit
    }
}
