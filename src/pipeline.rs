//! Pipeline orchestrator.
//!
//! Feeds each camera's frame stream through detection, identity
//! resolution, and zone tracking, then triggers the three aggregation
//! stages once every camera session has finished.
//!
//! One logical worker owns one camera session at a time; the identity
//! matcher is shared across all cameras of a store and is serialized by
//! that single-worker discipline. Cancellation is cooperative and checked
//! between frames; a cancelled session still finalizes its tracker so
//! in-progress visits are not silently dropped.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::aggregate::HeatmapGenerator;
use crate::detect::{DetectionSource, EmbeddingSource};
use crate::geometry::ground_point;
use crate::identity::{IdentityMatcher, MatcherConfig};
use crate::storage::EventStore;
use crate::tracker::{ZoneDwellTracker, ZoneSet};

/// Progress is reported every this many frames.
const PROGRESS_TICK_FRAMES: u64 = 30;

/// Bounded session capacity of the status registry.
const DEFAULT_STATUS_CAPACITY: usize = 64;

// -------------------- Processing Status --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingState {
    Created,
    Processing,
    Aggregating,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Clone, Debug)]
pub struct ProcessingStatus {
    pub state: ProcessingState,
    pub progress_pct: f64,
    pub updated_at: DateTime<Utc>,
}

/// Bounded map of session id to processing status.
///
/// A status is created when a session starts, overwritten at each progress
/// tick, and retained until superseded or evicted (oldest first) when the
/// capacity limit is reached.
pub struct StatusRegistry {
    capacity: usize,
    sessions: Vec<(String, ProcessingStatus)>,
}

impl StatusRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: Vec::new(),
        }
    }

    pub fn update(&mut self, session_id: &str, state: ProcessingState, progress_pct: f64) {
        let status = ProcessingStatus {
            state,
            progress_pct,
            updated_at: Utc::now(),
        };
        if let Some((_, existing)) = self
            .sessions
            .iter_mut()
            .find(|(id, _)| id == session_id)
        {
            *existing = status;
            return;
        }
        if self.sessions.len() >= self.capacity {
            self.sessions.remove(0);
        }
        self.sessions.push((session_id.to_string(), status));
    }

    pub fn get(&self, session_id: &str) -> Option<&ProcessingStatus> {
        self.sessions
            .iter()
            .find(|(id, _)| id == session_id)
            .map(|(_, status)| status)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_CAPACITY)
    }
}

// -------------------- Pipeline --------------------

/// Outcome of one camera session.
#[derive(Clone, Debug)]
pub struct SessionReport {
    pub camera_id: String,
    pub frames_processed: u64,
    pub events_emitted: u64,
    pub cancelled: bool,
}

/// Counts of derived records written by one aggregation run.
#[derive(Clone, Copy, Debug, Default)]
pub struct AggregationSummary {
    pub hourly_heatmaps: usize,
    pub daily_heatmaps: usize,
    pub daily_insights: usize,
}

/// Per-store pipeline: one shared identity matcher, one tracker per
/// camera session, one aggregation pass after all sessions finish.
pub struct Pipeline {
    store_id: String,
    matcher: IdentityMatcher,
    visit_timeout_s: u64,
    status: StatusRegistry,
}

impl Pipeline {
    pub fn new(store_id: &str, matcher_config: MatcherConfig, visit_timeout_s: u64) -> Self {
        Self {
            store_id: store_id.to_string(),
            matcher: IdentityMatcher::new(matcher_config),
            visit_timeout_s,
            status: StatusRegistry::default(),
        }
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    /// Process one camera's frame stream to completion or cancellation.
    ///
    /// A single frame's detection or embedding failure is logged and
    /// skipped; the stream continues. The tracker is always finalized,
    /// cancelled or not.
    pub fn process_camera(
        &mut self,
        store: &mut dyn EventStore,
        camera_id: &str,
        source: &mut dyn DetectionSource,
        embedder: &mut dyn EmbeddingSource,
        session_start: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> Result<SessionReport> {
        self.status.update(camera_id, ProcessingState::Created, 0.0);

        let zones = store.zones_for_camera(camera_id)?;
        if zones.is_empty() {
            log::warn!("no zones defined for camera {}, skipping", camera_id);
            return Ok(SessionReport {
                camera_id: camera_id.to_string(),
                frames_processed: 0,
                events_emitted: 0,
                cancelled: false,
            });
        }

        let mut tracker = ZoneDwellTracker::with_visit_timeout(
            &self.store_id,
            ZoneSet::new(zones)?,
            self.visit_timeout_s,
        );

        log::info!(
            "processing camera {} from source {} ({} fps)",
            camera_id,
            source.name(),
            source.fps()
        );
        self.status
            .update(camera_id, ProcessingState::Processing, 0.0);

        let fps = source.fps();
        let total_frames = source.total_frames();
        let mut frames_processed = 0u64;
        let mut events_emitted = 0u64;
        let mut cancelled = false;

        loop {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("camera {}: cancellation requested", camera_id);
                cancelled = true;
                break;
            }

            let detections = match source.next_frame() {
                Ok(Some(detections)) => detections,
                Ok(None) => break,
                Err(e) => {
                    // One bad frame never aborts the stream.
                    log::warn!("camera {}: frame skipped: {}", camera_id, e);
                    frames_processed += 1;
                    continue;
                }
            };

            let timestamp = frame_timestamp(session_start, frames_processed, fps);

            for detection in &detections {
                let embedding = match embedder.embed(&detection.bbox) {
                    Ok(embedding) => embedding,
                    Err(e) => {
                        log::warn!("camera {}: embedding skipped: {}", camera_id, e);
                        continue;
                    }
                };
                let person_id = self.matcher.resolve(embedding.as_deref(), timestamp);
                let point = ground_point(&detection.bbox);

                for event in tracker.check_zones(&person_id, point, timestamp) {
                    store.append_event(&event)?;
                    events_emitted += 1;
                }
            }

            frames_processed += 1;
            if frames_processed % PROGRESS_TICK_FRAMES == 0 {
                let progress = match total_frames {
                    Some(total) if total > 0 => {
                        (frames_processed as f64 / total as f64 * 100.0).min(100.0)
                    }
                    _ => 0.0,
                };
                self.status
                    .update(camera_id, ProcessingState::Processing, progress);
                log::debug!(
                    "camera {}: {} frames, {} open visits",
                    camera_id,
                    frames_processed,
                    tracker.active_visit_count()
                );
            }
        }

        // Finalize unconditionally so open visits become exit events.
        let final_timestamp = frame_timestamp(session_start, frames_processed, fps);
        for event in tracker.finalize_all(final_timestamp) {
            store.append_event(&event)?;
            events_emitted += 1;
        }

        let final_state = if cancelled {
            ProcessingState::Cancelled
        } else {
            ProcessingState::Completed
        };
        self.status.update(camera_id, final_state, 100.0);

        log::info!(
            "camera {} finished: {} frames, {} events{}",
            camera_id,
            frames_processed,
            events_emitted,
            if cancelled { " (cancelled)" } else { "" }
        );

        Ok(SessionReport {
            camera_id: camera_id.to_string(),
            frames_processed,
            events_emitted,
            cancelled,
        })
    }

    /// Run the three aggregation stages in order. Batch-only: call after
    /// every camera session has finished.
    pub fn aggregate(&mut self, store: &mut dyn EventStore) -> Result<AggregationSummary> {
        self.status
            .update(&self.store_id, ProcessingState::Aggregating, 0.0);

        match self.run_stages(store) {
            Ok(summary) => {
                self.status
                    .update(&self.store_id, ProcessingState::Completed, 100.0);
                Ok(summary)
            }
            Err(e) => {
                self.status
                    .update(&self.store_id, ProcessingState::Failed, 100.0);
                Err(e)
            }
        }
    }

    fn run_stages(&self, store: &mut dyn EventStore) -> Result<AggregationSummary> {
        let generator = HeatmapGenerator::new(&self.store_id);
        let hourly = generator.generate_hourly(store)?;
        let daily = generator.generate_daily(store)?;
        let insights = generator.generate_insights(store)?;
        Ok(AggregationSummary {
            hourly_heatmaps: hourly.len(),
            daily_heatmaps: daily.len(),
            daily_insights: insights.len(),
        })
    }
}

/// Frame timestamp from frame index and source frame rate.
fn frame_timestamp(session_start: DateTime<Utc>, frame_index: u64, fps: f64) -> DateTime<Utc> {
    let offset_ms = (frame_index as f64 / fps * 1000.0).round() as i64;
    session_start + Duration::milliseconds(offset_ms)
}
