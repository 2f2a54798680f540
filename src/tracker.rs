//! Zone-dwell tracker.
//!
//! Per-camera state machine converting per-frame ground points into
//! validated entry/exit visit events. Each person is either absent or in
//! exactly one zone; transitions emit [`ZoneEvent`]s in a deterministic
//! order within one call: stale-eviction exits first, then the current
//! frame's exit, then the current frame's entry.
//!
//! The tracker owns its active-visit map exclusively for one camera's
//! processing session and is not thread-safe by contract.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::geometry::point_in_polygon;
use crate::{EventType, Point, RejectionReason, Zone, ZoneEvent};

/// Default seconds after which an unseen active visit is force-exited.
pub const DEFAULT_VISIT_TIMEOUT_S: u64 = 300;

/// Zone membership lookup for a ground point.
///
/// The linear first-match-wins scan in [`ZoneSet`] is the default; a
/// spatial index can implement this trait without changing the tracker.
pub trait ZoneLookup {
    /// First zone (in configured order) containing the point, if any.
    fn locate(&self, point: Point) -> Option<&Zone>;

    /// Zone by id, for threshold lookups on exit.
    fn zone_by_id(&self, zone_id: &str) -> Option<&Zone>;
}

/// Ordered zone list with linear scan. Zones are assumed non-overlapping
/// by convention; if they do overlap, the earliest configured zone wins.
pub struct ZoneSet {
    zones: Vec<Zone>,
}

impl ZoneSet {
    /// Validates every zone's geometry up front; malformed zones are a
    /// configuration error, rejected before any frame is processed.
    pub fn new(zones: Vec<Zone>) -> anyhow::Result<Self> {
        for zone in &zones {
            zone.validate()?;
        }
        Ok(Self { zones })
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter()
    }
}

impl ZoneLookup for ZoneSet {
    fn locate(&self, point: Point) -> Option<&Zone> {
        self.zones
            .iter()
            .find(|zone| point_in_polygon(point, &zone.polygon))
    }

    fn zone_by_id(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.id == zone_id)
    }
}

#[derive(Clone, Debug)]
struct ActiveVisit {
    zone_id: String,
    entry_time: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Per-camera zone-dwell state machine.
pub struct ZoneDwellTracker {
    store_id: String,
    zones: ZoneSet,
    active_visits: HashMap<String, ActiveVisit>,
    visit_timeout: Duration,
}

impl ZoneDwellTracker {
    pub fn new(store_id: &str, zones: ZoneSet) -> Self {
        Self::with_visit_timeout(store_id, zones, DEFAULT_VISIT_TIMEOUT_S)
    }

    pub fn with_visit_timeout(store_id: &str, zones: ZoneSet, visit_timeout_s: u64) -> Self {
        Self {
            store_id: store_id.to_string(),
            zones,
            active_visits: HashMap::new(),
            visit_timeout: Duration::seconds(visit_timeout_s as i64),
        }
    }

    /// Advance the state machine for one person observation.
    ///
    /// Returned events are in emission order: stale-eviction exits, then
    /// the current frame's exit (if the person changed zone or left all
    /// zones), then the current frame's entry (if a zone was entered).
    pub fn check_zones(
        &mut self,
        person_id: &str,
        ground_point: Point,
        timestamp: DateTime<Utc>,
    ) -> Vec<ZoneEvent> {
        let mut events = self.evict_stale_visits(timestamp);

        let current_zone = self.zones.locate(ground_point).cloned();

        let Some(visit) = self.active_visits.get(person_id).cloned() else {
            if let Some(zone) = current_zone {
                events.push(self.open_visit(person_id, &zone, timestamp));
            }
            return events;
        };

        if let Some(zone) = &current_zone {
            if zone.id == visit.zone_id {
                // Same zone: just refresh.
                if let Some(visit) = self.active_visits.get_mut(person_id) {
                    visit.last_seen = timestamp;
                }
                return events;
            }
        }

        // Zone change or zone departure: close the previous visit.
        self.active_visits.remove(person_id);

        if let Some(zone) = self.zones.zone_by_id(&visit.zone_id) {
            events.push(make_exit_event(
                &self.store_id,
                zone,
                person_id,
                visit.entry_time,
                timestamp,
                RejectionReason::BelowMinimumDwell,
            ));
        }

        if let Some(zone) = current_zone {
            events.push(self.open_visit(person_id, &zone, timestamp));
        }

        events
    }

    /// Force-exit every remaining active visit at `final_timestamp`.
    ///
    /// Must be called once at the end of a stream (including cancelled
    /// streams) so in-progress visits are not silently dropped.
    pub fn finalize_all(&mut self, final_timestamp: DateTime<Utc>) -> Vec<ZoneEvent> {
        let mut events = Vec::new();
        let visits: Vec<(String, ActiveVisit)> = self.active_visits.drain().collect();

        for (person_id, visit) in visits {
            if let Some(zone) = self.zones.zone_by_id(&visit.zone_id) {
                events.push(make_exit_event(
                    &self.store_id,
                    zone,
                    &person_id,
                    visit.entry_time,
                    final_timestamp,
                    RejectionReason::BelowMinimumDwell,
                ));
            }
        }

        events
    }

    /// Number of currently open visits.
    pub fn active_visit_count(&self) -> usize {
        self.active_visits.len()
    }

    /// Snapshot of current occupancy: zone id -> open visit count.
    pub fn occupancy_snapshot(&self) -> HashMap<String, usize> {
        let mut occupancy = HashMap::new();
        for visit in self.active_visits.values() {
            *occupancy.entry(visit.zone_id.clone()).or_insert(0) += 1;
        }
        occupancy
    }

    /// Force-exit visits whose `last_seen` fell behind the visit timeout.
    ///
    /// The exit timestamp is the visit's own `last_seen`, not the current
    /// frame's timestamp; an invalid dwell is tagged as a stale timeout.
    fn evict_stale_visits(&mut self, now: DateTime<Utc>) -> Vec<ZoneEvent> {
        let stale: Vec<(String, ActiveVisit)> = self
            .active_visits
            .iter()
            .filter(|(_, visit)| now - visit.last_seen > self.visit_timeout)
            .map(|(person_id, visit)| (person_id.clone(), visit.clone()))
            .collect();

        let mut events = Vec::new();
        for (person_id, visit) in stale {
            self.active_visits.remove(&person_id);
            if let Some(zone) = self.zones.zone_by_id(&visit.zone_id) {
                events.push(make_exit_event(
                    &self.store_id,
                    zone,
                    &person_id,
                    visit.entry_time,
                    visit.last_seen,
                    RejectionReason::StaleVisitTimeout,
                ));
            }
        }
        events
    }

    fn open_visit(&mut self, person_id: &str, zone: &Zone, timestamp: DateTime<Utc>) -> ZoneEvent {
        self.active_visits.insert(
            person_id.to_string(),
            ActiveVisit {
                zone_id: zone.id.clone(),
                entry_time: timestamp,
                last_seen: timestamp,
            },
        );
        ZoneEvent {
            store_id: self.store_id.clone(),
            camera_id: zone.camera_id.clone(),
            zone_id: zone.id.clone(),
            person_id: person_id.to_string(),
            event_type: EventType::Entry,
            timestamp,
            dwell_time_s: None,
            is_valid_visit: false,
            rejection_reason: None,
        }
    }
}

fn make_exit_event(
    store_id: &str,
    zone: &Zone,
    person_id: &str,
    entry_time: DateTime<Utc>,
    exit_time: DateTime<Utc>,
    invalid_reason: RejectionReason,
) -> ZoneEvent {
    let dwell_ms = (exit_time - entry_time).num_milliseconds();
    let dwell_time_s = dwell_ms as f64 / 1000.0;
    let is_valid = dwell_time_s >= f64::from(zone.minimum_dwell_threshold_s);
    ZoneEvent {
        store_id: store_id.to_string(),
        camera_id: zone.camera_id.clone(),
        zone_id: zone.id.clone(),
        person_id: person_id.to_string(),
        event_type: EventType::Exit,
        timestamp: exit_time,
        dwell_time_s: Some(dwell_time_s),
        is_valid_visit: is_valid,
        rejection_reason: if is_valid { None } else { Some(invalid_reason) },
    }
}
