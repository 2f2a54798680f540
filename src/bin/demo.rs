//! demo - end-to-end synthetic run of the footfall analytics core
//!
//! Builds an in-memory store with two zones, walks two synthetic shoppers
//! through them, then runs the full aggregation cascade and prints the
//! resulting daily insight.

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::atomic::AtomicBool;

use footfall_kernel::config::CameraSettings;
use footfall_kernel::{
    shared_memory_uri, BoundingBox, Detection, EventStore, MatcherConfig, Pipeline, Point,
    SqliteEventStore, StubCameraSource, StubEmbeddingSource, Zone,
};

const DEMO_STORE_ID: &str = "store_demo";
const DEMO_CAMERA_ID: &str = "cam_entrance";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Seconds of synthetic footage.
    #[arg(long, default_value_t = 60)]
    seconds: u64,
    /// Frames per second of the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut store = SqliteEventStore::open(&shared_memory_uri())?;
    for zone in demo_zones() {
        store.insert_zone(&zone)?;
    }

    let camera = CameraSettings {
        camera_id: DEMO_CAMERA_ID.to_string(),
        video_source: "stub://entrance".to_string(),
        fps: f64::from(args.fps),
    };

    let frames = args.seconds * u64::from(args.fps);
    let mut source = StubCameraSource::new(
        &camera.video_source,
        camera.fps,
        shopper_script(frames, camera.fps),
    );
    let mut embedder = StubEmbeddingSource;

    let mut pipeline = Pipeline::new(DEMO_STORE_ID, MatcherConfig::default(), 300);
    let cancel = AtomicBool::new(false);
    let report = pipeline.process_camera(
        &mut store,
        &camera.camera_id,
        &mut source,
        &mut embedder,
        Utc::now(),
        &cancel,
    )?;
    println!(
        "processed {} frames, emitted {} events",
        report.frames_processed, report.events_emitted
    );

    let summary = pipeline.aggregate(&mut store)?;
    println!(
        "derived {} hourly heatmaps, {} daily heatmaps, {} insights",
        summary.hourly_heatmaps, summary.daily_heatmaps, summary.daily_insights
    );

    for insight in store.daily_insights(DEMO_STORE_ID)? {
        println!();
        println!("daily insight - {}", insight.date);
        println!("  unique customers: {}", insight.total_unique_customers);
        println!(
            "  avg store dwell:  {:.2}s",
            insight.avg_store_dwell_time_s
        );
        if let Some(hot) = &insight.hottest_zone {
            println!("  hottest zone:     {} ({} visits)", hot.zone_name, hot.visits);
        }
        if let Some(cold) = &insight.coldest_zone {
            println!("  coldest zone:     {} ({} visits)", cold.zone_name, cold.visits);
        }
        for zone in &insight.zone_insights {
            println!(
                "    {}: {} visits, {:.2}s avg dwell, {:.1}% engagement",
                zone.zone_name, zone.total_visits, zone.avg_dwell_time_s, zone.engagement_rate
            );
        }
    }

    Ok(())
}

fn demo_zones() -> Vec<Zone> {
    vec![
        Zone {
            id: "zone_entrance".to_string(),
            camera_id: DEMO_CAMERA_ID.to_string(),
            zone_identifier: "entrance".to_string(),
            name: "Entrance".to_string(),
            polygon: vec![
                Point::new(0.0, 200.0),
                Point::new(320.0, 200.0),
                Point::new(320.0, 480.0),
                Point::new(0.0, 480.0),
            ],
            zone_type: "entrance".to_string(),
            minimum_dwell_threshold_s: 5,
        },
        Zone {
            id: "zone_display".to_string(),
            camera_id: DEMO_CAMERA_ID.to_string(),
            zone_identifier: "display".to_string(),
            name: "Display Wall".to_string(),
            polygon: vec![
                Point::new(320.0, 200.0),
                Point::new(640.0, 200.0),
                Point::new(640.0, 480.0),
                Point::new(320.0, 480.0),
            ],
            zone_type: "retail".to_string(),
            minimum_dwell_threshold_s: 5,
        },
    ]
}

/// One shopper lingering in the entrance then moving to the display wall;
/// a second shopper cutting through the display zone too quickly to count,
/// then walking off the right edge so the tracker closes the visit.
fn shopper_script(frames: u64, fps: f64) -> Vec<Vec<Detection>> {
    let half = frames / 2;
    let pass_start = frames * 3 / 4;
    let pass_len = fps as u64; // one second, below the dwell threshold

    let mut script = Vec::with_capacity(frames as usize);
    for i in 0..frames {
        let mut detections = Vec::new();

        // Shopper one sits in the entrance for the first half, then at
        // the display wall for the rest.
        let (x, y) = if i < half { (120, 420) } else { (480, 420) };
        detections.push(Detection {
            bbox: BoundingBox {
                x_min: x - 30,
                y_min: y - 300,
                x_max: x + 30,
                y_max: y,
            },
            confidence: 0.94,
        });

        if i >= pass_start && i < pass_start + 2 * pass_len {
            // Inside the display zone for one second, then beyond the
            // frame's zones while still detected.
            let x = if i < pass_start + pass_len { 590 } else { 690 };
            detections.push(Detection {
                bbox: BoundingBox {
                    x_min: x - 30,
                    y_min: 60,
                    x_max: x + 30,
                    y_max: 400,
                },
                confidence: 0.77,
            });
        }

        script.push(detections);
    }
    script
}
