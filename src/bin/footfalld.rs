//! footfalld - footfall analytics daemon
//!
//! This daemon:
//! 1. Loads zones and camera definitions from configuration
//! 2. Processes each camera's frame stream through detection, identity
//!    resolution, and zone-dwell tracking
//! 3. Appends validated entry/exit events to the SQLite event store
//! 4. Runs the hourly/daily/insight aggregation stages once all camera
//!    streams have finished
//!
//! Real video decode and inference backends plug in at the `detect`
//! boundary; sources named `stub://...` run the built-in synthetic walker.

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use footfall_kernel::config::FootfalldConfig;
use footfall_kernel::{
    BoundingBox, Detection, EventStore, Pipeline, SqliteEventStore, StubCameraSource,
    StubEmbeddingSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file path (JSON). Overrides the FOOTFALL_CONFIG env var.
    #[arg(long)]
    config: Option<String>,
    /// Skip frame processing and only re-run the aggregation stages.
    #[arg(long, default_value_t = false)]
    aggregate_only: bool,
    /// Frames of synthetic footage per stub camera.
    #[arg(long, default_value_t = 600)]
    stub_frames: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("FOOTFALL_CONFIG", path);
    }
    let cfg = FootfalldConfig::load()?;

    let mut store = SqliteEventStore::open(&cfg.db_path)?;
    for zone in &cfg.zones {
        store.insert_zone(zone)?;
    }
    log::info!(
        "footfalld running. store={} db={} zones={} cameras={}",
        cfg.store_id,
        cfg.db_path,
        cfg.zones.len(),
        cfg.cameras.len()
    );

    // Cooperative cancellation: finish the current frame, finalize every
    // open visit, then aggregate whatever was recorded.
    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_handler = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, finishing sessions");
        cancel_handler.store(true, Ordering::Relaxed);
    })?;

    let mut pipeline = Pipeline::new(&cfg.store_id, cfg.matcher, cfg.visit_timeout_s);

    if !args.aggregate_only {
        let session_start = Utc::now();
        for camera in &cfg.cameras {
            if !camera.video_source.starts_with("stub://") {
                return Err(anyhow!(
                    "camera {}: source {} requires an external decode integration; \
                     only stub:// sources run in-process",
                    camera.camera_id,
                    camera.video_source
                ));
            }
            let mut source = StubCameraSource::new(
                &camera.video_source,
                camera.fps,
                synthetic_walk(args.stub_frames, camera.fps),
            );
            let mut embedder = StubEmbeddingSource;
            let report = pipeline.process_camera(
                &mut store,
                &camera.camera_id,
                &mut source,
                &mut embedder,
                session_start,
                &cancel,
            )?;
            log::info!(
                "session {}: {} frames, {} events",
                report.camera_id,
                report.frames_processed,
                report.events_emitted
            );
        }
    }

    let summary = pipeline.aggregate(&mut store)?;
    log::info!(
        "aggregation complete: {} hourly, {} daily, {} insights",
        summary.hourly_heatmaps,
        summary.daily_heatmaps,
        summary.daily_insights
    );

    Ok(())
}

/// Synthetic footage: one walker crossing the frame left to right, pausing
/// mid-frame, plus a second walker appearing for a short pass-through.
fn synthetic_walk(frames: u64, fps: f64) -> Vec<Vec<Detection>> {
    let mut script = Vec::with_capacity(frames as usize);
    let dwell_frames = (fps * 20.0) as u64;
    for i in 0..frames {
        let mut detections = Vec::new();

        // Walker one: advances 4px per frame, then lingers mid-frame.
        let x = (40 + i * 4).min(600) as i32;
        detections.push(Detection {
            bbox: BoundingBox {
                x_min: x,
                y_min: 120,
                x_max: x + 60,
                y_max: 440,
            },
            confidence: 0.92,
        });

        // Walker two: brief pass-through near the end of the clip.
        if i > dwell_frames && i < dwell_frames + (fps * 2.0) as u64 {
            detections.push(Detection {
                bbox: BoundingBox {
                    x_min: 700,
                    y_min: 100,
                    x_max: 780,
                    y_max: 430,
                },
                confidence: 0.81,
            });
        }

        script.push(detections);
    }
    script
}
