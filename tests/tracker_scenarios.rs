//! Zone-dwell tracker scenario tests: a person walking through two zones,
//! the single-visit invariant, finalize semantics, and stale eviction.

use chrono::{DateTime, Duration, TimeZone, Utc};

use footfall_kernel::tracker::{ZoneDwellTracker, ZoneSet};
use footfall_kernel::{EventType, Point, RejectionReason, Zone};

const STORE: &str = "store_test";
const CAMERA: &str = "cam_1";

fn zone(id: &str, ident: &str, x_min: f64, x_max: f64) -> Zone {
    Zone {
        id: id.to_string(),
        camera_id: CAMERA.to_string(),
        zone_identifier: ident.to_string(),
        name: ident.to_string(),
        polygon: vec![
            Point::new(x_min, 0.0),
            Point::new(x_max, 0.0),
            Point::new(x_max, 480.0),
            Point::new(x_min, 480.0),
        ],
        zone_type: "retail".to_string(),
        minimum_dwell_threshold_s: 5,
    }
}

fn two_zone_tracker() -> ZoneDwellTracker {
    let zones = ZoneSet::new(vec![
        zone("zone_a", "aisle_a", 0.0, 100.0),
        zone("zone_b", "aisle_b", 100.0, 200.0),
    ])
    .unwrap();
    ZoneDwellTracker::new(STORE, zones)
}

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap() + Duration::seconds(seconds)
}

#[test]
fn walk_through_two_zones_emits_validated_events() {
    let mut tracker = two_zone_tracker();

    // Enters zone A.
    let events = tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Entry);
    assert_eq!(events[0].zone_id, "zone_a");
    assert!(events[0].dwell_time_s.is_none(), "entries carry no dwell");

    // Ten seconds later, moves to zone B: exit A (valid) then entry B.
    let events = tracker.check_zones("p1", Point::new(150.0, 240.0), t(10));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::Exit);
    assert_eq!(events[0].zone_id, "zone_a");
    assert_eq!(events[0].dwell_time_s, Some(10.0));
    assert!(events[0].is_valid_visit);
    assert!(events[0].rejection_reason.is_none());
    assert_eq!(events[1].event_type, EventType::Entry);
    assert_eq!(events[1].zone_id, "zone_b");

    // Two seconds later, leaves all zones: exit B below the threshold.
    let events = tracker.check_zones("p1", Point::new(500.0, 240.0), t(12));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Exit);
    assert_eq!(events[0].zone_id, "zone_b");
    assert_eq!(events[0].dwell_time_s, Some(2.0));
    assert!(!events[0].is_valid_visit);
    assert_eq!(
        events[0].rejection_reason,
        Some(RejectionReason::BelowMinimumDwell)
    );

    assert_eq!(tracker.active_visit_count(), 0);
}

#[test]
fn person_holds_at_most_one_active_visit() {
    let mut tracker = two_zone_tracker();

    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    assert_eq!(tracker.active_visit_count(), 1);

    // Zone change closes the old visit in the same call it opens the new one.
    tracker.check_zones("p1", Point::new(150.0, 240.0), t(6));
    assert_eq!(tracker.active_visit_count(), 1);

    let occupancy = tracker.occupancy_snapshot();
    assert_eq!(occupancy.get("zone_b"), Some(&1));
    assert!(occupancy.get("zone_a").is_none());
}

#[test]
fn same_zone_observation_only_refreshes() {
    let mut tracker = two_zone_tracker();

    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    let events = tracker.check_zones("p1", Point::new(60.0, 250.0), t(3));
    assert!(events.is_empty(), "no events while the person stays put");
    assert_eq!(tracker.active_visit_count(), 1);
}

#[test]
fn outside_every_zone_emits_nothing_for_absent_person() {
    let mut tracker = two_zone_tracker();
    let events = tracker.check_zones("p1", Point::new(500.0, 240.0), t(0));
    assert!(events.is_empty());
    assert_eq!(tracker.active_visit_count(), 0);
}

#[test]
fn finalize_closes_every_open_visit() {
    let mut tracker = two_zone_tracker();

    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    tracker.check_zones("p2", Point::new(150.0, 240.0), t(0));

    let mut events = tracker.finalize_all(t(20));
    assert_eq!(events.len(), 2);
    events.sort_by(|a, b| a.person_id.cmp(&b.person_id));
    for event in &events {
        assert_eq!(event.event_type, EventType::Exit);
        assert_eq!(event.dwell_time_s, Some(20.0));
        assert!(event.is_valid_visit);
    }
    assert_eq!(tracker.active_visit_count(), 0);

    // Finalizing again is a no-op.
    assert!(tracker.finalize_all(t(30)).is_empty());
}

#[test]
fn finalize_below_threshold_is_invalid() {
    let mut tracker = two_zone_tracker();
    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));

    let events = tracker.finalize_all(t(2));
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_valid_visit);
    assert_eq!(
        events[0].rejection_reason,
        Some(RejectionReason::BelowMinimumDwell)
    );
}

#[test]
fn stale_visit_exits_at_its_own_last_seen() {
    let mut tracker = two_zone_tracker();

    // p1 is seen at t=0 and t=2, then disappears.
    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    tracker.check_zones("p1", Point::new(55.0, 240.0), t(2));

    // A later observation of p2 sweeps p1 out first. The exit timestamp is
    // p1's last observation, not the sweeping frame's timestamp.
    let events = tracker.check_zones("p2", Point::new(150.0, 240.0), t(400));
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].event_type, EventType::Exit);
    assert_eq!(events[0].person_id, "p1");
    assert_eq!(events[0].timestamp, t(2));
    assert_eq!(events[0].dwell_time_s, Some(2.0));
    assert!(!events[0].is_valid_visit);
    assert_eq!(
        events[0].rejection_reason,
        Some(RejectionReason::StaleVisitTimeout)
    );

    assert_eq!(events[1].event_type, EventType::Entry);
    assert_eq!(events[1].person_id, "p2");
}

#[test]
fn stale_visit_with_sufficient_dwell_stays_valid() {
    let mut tracker = two_zone_tracker();

    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));
    tracker.check_zones("p1", Point::new(55.0, 240.0), t(30));

    let events = tracker.check_zones("p2", Point::new(150.0, 240.0), t(400));
    let stale = &events[0];
    assert_eq!(stale.person_id, "p1");
    assert_eq!(stale.dwell_time_s, Some(30.0));
    assert!(stale.is_valid_visit);
    assert!(stale.rejection_reason.is_none());
}

#[test]
fn visit_within_timeout_is_not_swept() {
    let mut tracker = two_zone_tracker();

    tracker.check_zones("p1", Point::new(50.0, 240.0), t(0));

    // 300s gap is exactly the timeout; eviction requires strictly greater.
    let events = tracker.check_zones("p2", Point::new(150.0, 240.0), t(300));
    assert_eq!(events.len(), 1, "only p2's entry");
    assert_eq!(tracker.active_visit_count(), 2);
}
