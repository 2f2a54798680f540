//! Aggregation cascade tests over an in-memory event store: hourly
//! bucketing, daily rollups with unique-visitor recomputation, and the
//! cross-zone daily insight.

use chrono::{DateTime, TimeZone, Utc};

use footfall_kernel::{
    EventStore, EventType, HeatmapGenerator, InMemoryEventStore, Point, RejectionReason, Zone,
    ZoneEvent,
};

const STORE: &str = "store_test";
const CAMERA: &str = "cam_1";

fn zone(id: &str, ident: &str, name: &str) -> Zone {
    Zone {
        id: id.to_string(),
        camera_id: CAMERA.to_string(),
        zone_identifier: ident.to_string(),
        name: name.to_string(),
        polygon: vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ],
        zone_type: "retail".to_string(),
        minimum_dwell_threshold_s: 5,
    }
}

fn exit_event(zone_id: &str, person: &str, ts: DateTime<Utc>, dwell: f64, valid: bool) -> ZoneEvent {
    ZoneEvent {
        store_id: STORE.to_string(),
        camera_id: CAMERA.to_string(),
        zone_id: zone_id.to_string(),
        person_id: person.to_string(),
        event_type: EventType::Exit,
        timestamp: ts,
        dwell_time_s: Some(dwell),
        is_valid_visit: valid,
        rejection_reason: if valid {
            None
        } else {
            Some(RejectionReason::BelowMinimumDwell)
        },
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
}

fn store_with_zone() -> InMemoryEventStore {
    let mut store = InMemoryEventStore::new();
    store
        .insert_zone(&zone("zone_a", "aisle_a", "Aisle A"))
        .unwrap();
    store
}

#[test]
fn empty_store_produces_no_derived_records() {
    let mut store = store_with_zone();
    let generator = HeatmapGenerator::new(STORE);
    assert!(generator.generate_hourly(&mut store).unwrap().is_empty());
    assert!(generator.generate_daily(&mut store).unwrap().is_empty());
    assert!(generator.generate_insights(&mut store).unwrap().is_empty());
}

#[test]
fn single_visit_lands_in_one_hourly_bucket() {
    let mut store = store_with_zone();
    store
        .append_event(&exit_event("zone_a", "p1", at(14, 7), 120.0, true))
        .unwrap();

    let hourly = HeatmapGenerator::new(STORE)
        .generate_hourly(&mut store)
        .unwrap();

    assert_eq!(hourly.len(), 1);
    let bucket = &hourly[0];
    assert_eq!(bucket.hour_start, at(14, 0));
    assert_eq!(bucket.hour_end, at(15, 0));
    assert_eq!(bucket.visit_count, 1);
    assert_eq!(bucket.unique_visitors, 1);
    assert_eq!(bucket.total_dwell_time_s, 120.0);
    assert_eq!(bucket.avg_dwell_time_s, 120.0);
    assert_eq!(bucket.crowd_density, 0.0167, "1 visit / 60 min, 4dp");
}

#[test]
fn invalid_exits_are_excluded_from_hourly() {
    let mut store = store_with_zone();
    store
        .append_event(&exit_event("zone_a", "p1", at(14, 7), 60.0, true))
        .unwrap();
    store
        .append_event(&exit_event("zone_a", "p2", at(14, 8), 2.0, false))
        .unwrap();

    let hourly = HeatmapGenerator::new(STORE)
        .generate_hourly(&mut store)
        .unwrap();
    assert_eq!(hourly.len(), 1);
    assert_eq!(hourly[0].visit_count, 1);
}

#[test]
fn zero_dwell_counts_as_visit_but_not_toward_average() {
    let mut store = store_with_zone();
    store
        .append_event(&exit_event("zone_a", "p1", at(14, 5), 0.0, true))
        .unwrap();
    store
        .append_event(&exit_event("zone_a", "p2", at(14, 6), 10.0, true))
        .unwrap();

    let hourly = HeatmapGenerator::new(STORE)
        .generate_hourly(&mut store)
        .unwrap();
    assert_eq!(hourly.len(), 1);
    assert_eq!(hourly[0].visit_count, 2);
    assert_eq!(hourly[0].total_dwell_time_s, 10.0);
    assert_eq!(hourly[0].avg_dwell_time_s, 10.0, "zero dwell excluded");
}

#[test]
fn hours_without_events_produce_no_buckets() {
    let mut store = store_with_zone();
    store
        .append_event(&exit_event("zone_a", "p1", at(9, 30), 60.0, true))
        .unwrap();
    store
        .append_event(&exit_event("zone_a", "p2", at(14, 30), 60.0, true))
        .unwrap();

    let hourly = HeatmapGenerator::new(STORE)
        .generate_hourly(&mut store)
        .unwrap();
    assert_eq!(hourly.len(), 2, "sparse: 9:00 and 14:00 only");
    assert_eq!(hourly[0].hour_start, at(9, 0));
    assert_eq!(hourly[1].hour_start, at(14, 0));
}

#[test]
fn daily_recomputes_unique_visitors_from_raw_events() {
    let mut store = store_with_zone();
    // The same person leaves the zone in two different hours.
    store
        .append_event(&exit_event("zone_a", "p1", at(10, 15), 60.0, true))
        .unwrap();
    store
        .append_event(&exit_event("zone_a", "p1", at(11, 45), 90.0, true))
        .unwrap();

    let generator = HeatmapGenerator::new(STORE);
    let hourly = generator.generate_hourly(&mut store).unwrap();
    assert_eq!(hourly.len(), 2);
    assert_eq!(hourly[0].unique_visitors, 1);
    assert_eq!(hourly[1].unique_visitors, 1);

    let daily = generator.generate_daily(&mut store).unwrap();
    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].total_visits, 2);
    assert_eq!(
        daily[0].unique_visitors, 1,
        "not the sum of hourly uniques"
    );
    assert_eq!(daily[0].total_dwell_time_s, 150.0);
    assert_eq!(daily[0].avg_dwell_time_s, 75.0);
}

#[test]
fn daily_engagement_counts_pass_throughs() {
    let mut store = store_with_zone();
    for i in 0..8 {
        let person = format!("p{}", i);
        store
            .append_event(&exit_event("zone_a", &person, at(14, i), 60.0, true))
            .unwrap();
    }
    store
        .append_event(&exit_event("zone_a", "q1", at(14, 20), 2.0, false))
        .unwrap();
    store
        .append_event(&exit_event("zone_a", "q2", at(14, 21), 1.0, false))
        .unwrap();

    let generator = HeatmapGenerator::new(STORE);
    generator.generate_hourly(&mut store).unwrap();
    let daily = generator.generate_daily(&mut store).unwrap();

    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].total_visits, 8);
    assert_eq!(daily[0].engagement_rate, 80.0, "8 valid of 10 exits");
}

#[test]
fn peak_hour_tie_goes_to_the_earlier_hour() {
    let mut store = store_with_zone();
    for (hour, person) in [(10, "a"), (10, "b"), (11, "c"), (11, "d")] {
        store
            .append_event(&exit_event("zone_a", person, at(hour, 15), 60.0, true))
            .unwrap();
    }

    let generator = HeatmapGenerator::new(STORE);
    generator.generate_hourly(&mut store).unwrap();
    let daily = generator.generate_daily(&mut store).unwrap();

    assert_eq!(daily.len(), 1);
    assert_eq!(daily[0].peak_hour, 10);
    assert_eq!(daily[0].max_hourly_crowd, 2);
    assert_eq!(daily[0].crowd_density, 2.0, "4 visits over 2 active hours");
}

#[test]
fn insight_ranks_zones_and_weights_store_dwell_by_visits() {
    let mut store = InMemoryEventStore::new();
    store
        .insert_zone(&zone("zone_a", "aisle_a", "Aisle A"))
        .unwrap();
    store
        .insert_zone(&zone("zone_b", "aisle_b", "Aisle B"))
        .unwrap();

    // Zone A: three visits of 10s. Zone B: one visit of 30s.
    for (person, minute) in [("p1", 5), ("p2", 10), ("p3", 15)] {
        store
            .append_event(&exit_event("zone_a", person, at(14, minute), 10.0, true))
            .unwrap();
    }
    store
        .append_event(&exit_event("zone_b", "p4", at(14, 20), 30.0, true))
        .unwrap();

    let generator = HeatmapGenerator::new(STORE);
    generator.generate_hourly(&mut store).unwrap();
    generator.generate_daily(&mut store).unwrap();
    let insights = generator.generate_insights(&mut store).unwrap();

    assert_eq!(insights.len(), 1);
    let insight = &insights[0];
    assert_eq!(insight.total_unique_customers, 4);
    assert_eq!(insight.total_zones_analyzed, 2);

    let hottest = insight.hottest_zone.as_ref().unwrap();
    assert_eq!(hottest.zone_name, "Aisle A");
    assert_eq!(hottest.visits, 3);
    let coldest = insight.coldest_zone.as_ref().unwrap();
    assert_eq!(coldest.zone_name, "Aisle B");
    assert_eq!(coldest.visits, 1);

    // (3*10 + 1*30) / 4 visits.
    assert_eq!(insight.avg_store_dwell_time_s, 15.0);
    assert_eq!(insight.peak_hour, Some(14));
    assert_eq!(insight.peak_hour_customers, 4, "3 + 1 at the shared peak");
}

#[test]
fn insight_counts_returning_customer_once_across_zones() {
    let mut store = InMemoryEventStore::new();
    store
        .insert_zone(&zone("zone_a", "aisle_a", "Aisle A"))
        .unwrap();
    store
        .insert_zone(&zone("zone_b", "aisle_b", "Aisle B"))
        .unwrap();

    store
        .append_event(&exit_event("zone_a", "p1", at(10, 5), 20.0, true))
        .unwrap();
    store
        .append_event(&exit_event("zone_b", "p1", at(11, 5), 40.0, true))
        .unwrap();

    let generator = HeatmapGenerator::new(STORE);
    generator.generate_hourly(&mut store).unwrap();
    generator.generate_daily(&mut store).unwrap();
    let insights = generator.generate_insights(&mut store).unwrap();

    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].total_unique_customers, 1);
    assert_eq!(insights[0].total_zones_analyzed, 2);
}
