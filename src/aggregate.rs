//! Aggregation engine.
//!
//! Three cascading batch stages over one store's persisted zone events:
//!
//! - **Hourly**: valid exit events bucketed per (zone, hour).
//! - **Daily**: hourly records rolled up per (zone, calendar date), with
//!   unique visitors recomputed from raw events.
//! - **Insights**: daily records rolled up per date across all zones.
//!
//! Each stage reads a fixed snapshot from the store and writes new derived
//! records. Stages are idempotent-per-bucket pure transforms; re-running a
//! stage without clearing prior output produces duplicate records, which
//! the engine does not detect. Deduplication is the caller's job.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::storage::EventStore;

// -------------------- Derived Records --------------------

/// Per (store, zone, hour bucket) aggregate. Sparse: hours with no valid
/// exit events produce no record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HourlyHeatmap {
    pub store_id: String,
    pub zone_id: String,
    pub zone_name: String,
    pub camera_id: String,
    pub hour_start: DateTime<Utc>,
    pub hour_end: DateTime<Utc>,
    pub visit_count: u64,
    pub unique_visitors: u64,
    pub total_dwell_time_s: f64,
    pub avg_dwell_time_s: f64,
    /// Visits per minute within the hour.
    pub crowd_density: f64,
    pub created_at: DateTime<Utc>,
}

/// Per (store, zone, calendar date) aggregate derived from hourly records
/// plus raw events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DailyHeatmap {
    pub store_id: String,
    pub zone_id: String,
    pub zone_name: String,
    pub camera_id: String,
    pub date: NaiveDate,
    pub total_visits: u64,
    pub unique_visitors: u64,
    pub total_dwell_time_s: f64,
    pub avg_dwell_time_s: f64,
    /// Visit count of the busiest hour.
    pub max_hourly_crowd: u64,
    /// Hour of day (0-23) of the busiest hourly record.
    pub peak_hour: u32,
    /// Visits per active hour (hours with at least one record, not 24).
    pub crowd_density: f64,
    /// Validated visits as a percentage of all exits including rejected
    /// pass-throughs.
    pub engagement_rate: f64,
    pub created_at: DateTime<Utc>,
}

/// Per-zone entry inside a daily insight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneInsight {
    pub zone_id: String,
    pub zone_name: String,
    pub zone_type: String,
    pub total_visits: u64,
    pub unique_visitors: u64,
    pub avg_dwell_time_s: f64,
    pub crowd_density: f64,
    pub engagement_rate: f64,
    pub peak_hour: u32,
}

/// Hottest/coldest zone summary carried on a daily insight.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneHighlight {
    pub zone_name: String,
    pub visits: u64,
    pub avg_dwell_time_s: f64,
    pub crowd_density: f64,
}

/// Per (store, date) end-of-day summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DailyInsight {
    pub store_id: String,
    pub date: NaiveDate,
    pub total_unique_customers: u64,
    pub total_zones_analyzed: u64,
    pub zone_insights: Vec<ZoneInsight>,
    pub hottest_zone: Option<ZoneHighlight>,
    pub coldest_zone: Option<ZoneHighlight>,
    /// Visit-weighted mean of zone dwell times.
    pub avg_store_dwell_time_s: f64,
    pub peak_hour: Option<u32>,
    pub peak_hour_customers: u64,
    pub created_at: DateTime<Utc>,
}

// -------------------- Generator --------------------

/// Batch aggregation for one store.
pub struct HeatmapGenerator {
    store_id: String,
}

impl HeatmapGenerator {
    pub fn new(store_id: &str) -> Self {
        Self {
            store_id: store_id.to_string(),
        }
    }

    /// Stage A: hourly heatmaps from valid exit events.
    ///
    /// The scanned span covers the earliest event's hour (floored) through
    /// the latest event's hour (ceiled to the next boundary). Buckets and
    /// zones with no events are skipped, not zero-filled.
    pub fn generate_hourly(&self, store: &mut dyn EventStore) -> Result<Vec<HourlyHeatmap>> {
        log::info!("generating hourly heatmaps for store {}", self.store_id);

        let events = store.valid_exit_events(&self.store_id)?;
        if events.is_empty() {
            log::info!("no valid visit events found");
            return Ok(Vec::new());
        }

        let mut start = events[0].timestamp;
        let mut end = events[0].timestamp;
        for event in &events {
            start = start.min(event.timestamp);
            end = end.max(event.timestamp);
        }
        let start_hour = floor_hour(start);
        let end_hour = floor_hour(end) + Duration::hours(1);

        let zones = store.all_zones()?;

        let mut heatmaps = Vec::new();
        let mut current_hour = start_hour;

        while current_hour < end_hour {
            let next_hour = current_hour + Duration::hours(1);
            let hour_events: Vec<_> = events
                .iter()
                .filter(|e| current_hour <= e.timestamp && e.timestamp < next_hour)
                .collect();

            // Group by zone, preserving first-appearance order.
            let mut zone_order: Vec<&str> = Vec::new();
            for event in &hour_events {
                if !zone_order.contains(&event.zone_id.as_str()) {
                    zone_order.push(&event.zone_id);
                }
            }

            for zone_id in zone_order {
                let Some(zone) = zones.iter().find(|z| z.id == zone_id) else {
                    // Events for zones deleted since recording are dropped.
                    continue;
                };
                let zone_events: Vec<_> = hour_events
                    .iter()
                    .filter(|e| e.zone_id == zone_id)
                    .collect();

                let visit_count = zone_events.len() as u64;
                let unique_visitors = zone_events
                    .iter()
                    .map(|e| e.person_id.as_str())
                    .collect::<HashSet<_>>()
                    .len() as u64;
                let dwell_times: Vec<f64> = zone_events
                    .iter()
                    .filter_map(|e| e.dwell_time_s)
                    .filter(|d| *d > 0.0)
                    .collect();
                let total_dwell: f64 = dwell_times.iter().sum();
                let avg_dwell = if dwell_times.is_empty() {
                    0.0
                } else {
                    total_dwell / dwell_times.len() as f64
                };
                let crowd_density = visit_count as f64 / 60.0;

                let heatmap = HourlyHeatmap {
                    store_id: self.store_id.clone(),
                    zone_id: zone.id.clone(),
                    zone_name: zone.name.clone(),
                    camera_id: zone.camera_id.clone(),
                    hour_start: current_hour,
                    hour_end: next_hour,
                    visit_count,
                    unique_visitors,
                    total_dwell_time_s: round2(total_dwell),
                    avg_dwell_time_s: round2(avg_dwell),
                    crowd_density: round4(crowd_density),
                    created_at: Utc::now(),
                };

                log::debug!(
                    "hour {:02}:00 zone '{}': {} visits",
                    current_hour.hour(),
                    zone.name,
                    visit_count
                );
                store.insert_hourly_heatmap(&heatmap)?;
                heatmaps.push(heatmap);
            }

            current_hour = next_hour;
        }

        log::info!("generated {} hourly heatmaps", heatmaps.len());
        Ok(heatmaps)
    }

    /// Stage B: daily heatmaps from hourly records plus raw events.
    ///
    /// Unique visitors are recomputed from the day's raw valid-exit events
    /// rather than summed from hourly records, so a visitor who returns in
    /// a later hour is counted once.
    pub fn generate_daily(&self, store: &mut dyn EventStore) -> Result<Vec<DailyHeatmap>> {
        log::info!("generating daily heatmaps for store {}", self.store_id);

        let hourly = store.hourly_heatmaps(&self.store_id)?;
        if hourly.is_empty() {
            log::info!("no hourly heatmaps found");
            return Ok(Vec::new());
        }

        // Zone grouping preserves first-appearance order; dates scan in
        // ascending order.
        let mut zone_order: Vec<&str> = Vec::new();
        for record in &hourly {
            if !zone_order.contains(&record.zone_id.as_str()) {
                zone_order.push(&record.zone_id);
            }
        }
        let mut dates: Vec<NaiveDate> = hourly
            .iter()
            .map(|h| h.hour_start.date_naive())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        dates.sort();

        let mut daily = Vec::new();

        for date in dates {
            let (day_start, day_end) = day_window(date);

            for zone_id in &zone_order {
                let day_data: Vec<_> = hourly
                    .iter()
                    .filter(|h| h.zone_id == *zone_id && h.hour_start.date_naive() == date)
                    .collect();
                if day_data.is_empty() {
                    continue;
                }

                let total_visits: u64 = day_data.iter().map(|h| h.visit_count).sum();

                let day_exits =
                    store.exit_events_between(&self.store_id, zone_id, day_start, day_end)?;
                let unique_visitors = day_exits
                    .iter()
                    .filter(|e| e.is_valid_visit)
                    .map(|e| e.person_id.as_str())
                    .collect::<HashSet<_>>()
                    .len() as u64;

                let total_dwell: f64 = day_data.iter().map(|h| h.total_dwell_time_s).sum();
                let avg_dwell = if total_visits > 0 {
                    total_dwell / total_visits as f64
                } else {
                    0.0
                };

                // Peak hour: highest hourly visit count, first occurrence
                // wins ties.
                let mut peak = &day_data[0];
                for record in &day_data[1..] {
                    if record.visit_count > peak.visit_count {
                        peak = record;
                    }
                }
                let peak_hour = peak.hour_start.hour();
                let max_hourly_crowd = peak.visit_count;

                let hours_active = day_data.len() as u64;
                let crowd_density = total_visits as f64 / hours_active as f64;

                let pass_through = day_exits.iter().filter(|e| !e.is_valid_visit).count() as u64;
                let engagement_rate = if total_visits + pass_through > 0 {
                    total_visits as f64 / (total_visits + pass_through) as f64 * 100.0
                } else {
                    0.0
                };

                let heatmap = DailyHeatmap {
                    store_id: self.store_id.clone(),
                    zone_id: (*zone_id).to_string(),
                    zone_name: day_data[0].zone_name.clone(),
                    camera_id: day_data[0].camera_id.clone(),
                    date,
                    total_visits,
                    unique_visitors,
                    total_dwell_time_s: round2(total_dwell),
                    avg_dwell_time_s: round2(avg_dwell),
                    max_hourly_crowd,
                    peak_hour,
                    crowd_density: round2(crowd_density),
                    engagement_rate: round2(engagement_rate),
                    created_at: Utc::now(),
                };

                log::debug!(
                    "zone '{}': {} visits, peak at {}:00",
                    heatmap.zone_name,
                    total_visits,
                    peak_hour
                );
                store.insert_daily_heatmap(&heatmap)?;
                daily.push(heatmap);
            }
        }

        log::info!("generated {} daily heatmaps", daily.len());
        Ok(daily)
    }

    /// Stage C: per-date insights across all zones of the store.
    pub fn generate_insights(&self, store: &mut dyn EventStore) -> Result<Vec<DailyInsight>> {
        log::info!("generating daily insights for store {}", self.store_id);

        let daily = store.daily_heatmaps(&self.store_id)?;
        if daily.is_empty() {
            log::info!("no daily heatmaps found");
            return Ok(Vec::new());
        }

        let zones = store.all_zones()?;

        let mut dates: Vec<NaiveDate> = daily
            .iter()
            .map(|h| h.date)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        dates.sort();

        let mut insights = Vec::new();

        for date in dates {
            let date_heatmaps: Vec<_> = daily.iter().filter(|h| h.date == date).collect();
            let (day_start, day_end) = day_window(date);

            let day_events =
                store.valid_exit_events_between(&self.store_id, day_start, day_end)?;
            let total_unique_customers = day_events
                .iter()
                .map(|e| e.person_id.as_str())
                .collect::<HashSet<_>>()
                .len() as u64;

            let zone_insights: Vec<ZoneInsight> = date_heatmaps
                .iter()
                .map(|h| ZoneInsight {
                    zone_id: h.zone_id.clone(),
                    zone_name: h.zone_name.clone(),
                    zone_type: zones
                        .iter()
                        .find(|z| z.id == h.zone_id)
                        .map(|z| z.zone_type.clone())
                        .unwrap_or_else(|| "retail".to_string()),
                    total_visits: h.total_visits,
                    unique_visitors: h.unique_visitors,
                    avg_dwell_time_s: h.avg_dwell_time_s,
                    crowd_density: h.crowd_density,
                    engagement_rate: h.engagement_rate,
                    peak_hour: h.peak_hour,
                })
                .collect();

            // Descending by visits; stable sort keeps ties in insertion
            // order. With a single zone, hottest and coldest coincide.
            let mut sorted_zones = zone_insights.clone();
            sorted_zones.sort_by(|a, b| b.total_visits.cmp(&a.total_visits));

            let hottest_zone = sorted_zones.first().map(highlight);
            let coldest_zone = sorted_zones.last().map(highlight);

            let total_visits: u64 = zone_insights.iter().map(|z| z.total_visits).sum();
            let weighted_dwell: f64 = zone_insights
                .iter()
                .map(|z| z.avg_dwell_time_s * z.total_visits as f64)
                .sum();
            let avg_store_dwell = if total_visits > 0 {
                weighted_dwell / total_visits as f64
            } else {
                0.0
            };

            // Store-wide peak hour: the hour with the largest summed
            // busiest-hour crowd across zones reporting it. First-seen
            // order breaks ties.
            let mut hour_crowds: Vec<(u32, u64)> = Vec::new();
            for heatmap in &date_heatmaps {
                match hour_crowds.iter_mut().find(|(h, _)| *h == heatmap.peak_hour) {
                    Some((_, crowd)) => *crowd += heatmap.max_hourly_crowd,
                    None => hour_crowds.push((heatmap.peak_hour, heatmap.max_hourly_crowd)),
                }
            }
            let mut peak: Option<(u32, u64)> = None;
            for (hour, crowd) in &hour_crowds {
                if peak.map_or(true, |(_, best)| *crowd > best) {
                    peak = Some((*hour, *crowd));
                }
            }

            let insight = DailyInsight {
                store_id: self.store_id.clone(),
                date,
                total_unique_customers,
                total_zones_analyzed: zone_insights.len() as u64,
                zone_insights,
                hottest_zone,
                coldest_zone,
                avg_store_dwell_time_s: round2(avg_store_dwell),
                peak_hour: peak.map(|(hour, _)| hour),
                peak_hour_customers: peak.map_or(0, |(_, crowd)| crowd),
                created_at: Utc::now(),
            };

            log_insight_summary(&insight, &sorted_zones);
            store.insert_daily_insight(&insight)?;
            insights.push(insight);
        }

        Ok(insights)
    }
}

fn highlight(zone: &ZoneInsight) -> ZoneHighlight {
    ZoneHighlight {
        zone_name: zone.zone_name.clone(),
        visits: zone.total_visits,
        avg_dwell_time_s: zone.avg_dwell_time_s,
        crowd_density: zone.crowd_density,
    }
}

fn log_insight_summary(insight: &DailyInsight, sorted_zones: &[ZoneInsight]) {
    log::info!("daily insights summary - {}", insight.date);
    log::info!(
        "unique customers: {}, zones analyzed: {}, avg store dwell: {:.2}s",
        insight.total_unique_customers,
        insight.total_zones_analyzed,
        insight.avg_store_dwell_time_s
    );
    if let Some(hour) = insight.peak_hour {
        log::info!(
            "peak hour: {}:00 with {} customers",
            hour,
            insight.peak_hour_customers
        );
    }
    if let (Some(hot), Some(cold)) = (&insight.hottest_zone, &insight.coldest_zone) {
        log::info!(
            "hottest zone: {} ({} visits), coldest zone: {} ({} visits)",
            hot.zone_name,
            hot.visits,
            cold.zone_name,
            cold.visits
        );
    }
    for zone in sorted_zones {
        log::info!(
            "  {}: {} visits, {:.2}s avg dwell, {:.2} visits/hour",
            zone.zone_name,
            zone.total_visits,
            zone.avg_dwell_time_s,
            zone.crowd_density
        );
    }
}

// -------------------- Time Helpers --------------------

/// Floor a timestamp to its hour boundary.
pub fn floor_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    // rem_euclid keeps the result on an exact hour boundary, always valid.
    Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
}

/// Half-open UTC window covering one calendar date.
pub fn day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
