//! Daemon configuration.
//!
//! `footfalld` reads a JSON config file named by `FOOTFALL_CONFIG`, applies
//! `FOOTFALL_*` environment overrides, then validates. Zone definitions
//! ride along in the config file and are loaded into the store before any
//! frame is processed, so malformed geometry fails startup rather than a
//! frame.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::identity::MatcherConfig;
use crate::Zone;

const DEFAULT_DB_PATH: &str = "footfall.db";
const DEFAULT_STORE_ID: &str = "store_main";
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
const DEFAULT_MAX_PERSONS: usize = 1000;
const DEFAULT_PERSON_TIMEOUT_S: u64 = 3600;
const DEFAULT_VISIT_TIMEOUT_S: u64 = 300;
const DEFAULT_CAMERA_ID: &str = "cam_1";
const DEFAULT_VIDEO_SOURCE: &str = "stub://front_camera";
const DEFAULT_FPS: f64 = 10.0;

#[derive(Debug, Deserialize, Default)]
struct FootfalldConfigFile {
    db_path: Option<String>,
    store_id: Option<String>,
    matcher: Option<MatcherConfigFile>,
    tracker: Option<TrackerConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
    zones: Option<Vec<Zone>>,
}

#[derive(Debug, Deserialize, Default)]
struct MatcherConfigFile {
    similarity_threshold: Option<f32>,
    max_persons: Option<usize>,
    person_timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    visit_timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    camera_id: String,
    video_source: Option<String>,
    fps: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FootfalldConfig {
    pub db_path: String,
    pub store_id: String,
    pub matcher: MatcherConfig,
    pub visit_timeout_s: u64,
    pub cameras: Vec<CameraSettings>,
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub camera_id: String,
    pub video_source: String,
    pub fps: f64,
}

impl FootfalldConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FOOTFALL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FootfalldConfigFile) -> Self {
        let matcher_file = file.matcher.unwrap_or_default();
        let matcher = MatcherConfig {
            similarity_threshold: matcher_file
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            max_persons: matcher_file.max_persons.unwrap_or(DEFAULT_MAX_PERSONS),
            person_timeout_s: matcher_file
                .person_timeout_s
                .unwrap_or(DEFAULT_PERSON_TIMEOUT_S),
        };
        let cameras = file
            .cameras
            .map(|cameras| {
                cameras
                    .into_iter()
                    .map(|camera| CameraSettings {
                        camera_id: camera.camera_id,
                        video_source: camera
                            .video_source
                            .unwrap_or_else(|| DEFAULT_VIDEO_SOURCE.to_string()),
                        fps: camera.fps.unwrap_or(DEFAULT_FPS),
                    })
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![CameraSettings {
                    camera_id: DEFAULT_CAMERA_ID.to_string(),
                    video_source: DEFAULT_VIDEO_SOURCE.to_string(),
                    fps: DEFAULT_FPS,
                }]
            });
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            store_id: file
                .store_id
                .unwrap_or_else(|| DEFAULT_STORE_ID.to_string()),
            matcher,
            visit_timeout_s: file
                .tracker
                .and_then(|tracker| tracker.visit_timeout_s)
                .unwrap_or(DEFAULT_VISIT_TIMEOUT_S),
            cameras,
            zones: file.zones.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FOOTFALL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(store_id) = std::env::var("FOOTFALL_STORE_ID") {
            if !store_id.trim().is_empty() {
                self.store_id = store_id;
            }
        }
        if let Ok(threshold) = std::env::var("FOOTFALL_SIMILARITY_THRESHOLD") {
            self.matcher.similarity_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("FOOTFALL_SIMILARITY_THRESHOLD must be a float"))?;
        }
        if let Ok(max_persons) = std::env::var("FOOTFALL_MAX_PERSONS") {
            self.matcher.max_persons = max_persons
                .parse()
                .map_err(|_| anyhow!("FOOTFALL_MAX_PERSONS must be an integer"))?;
        }
        if let Ok(timeout) = std::env::var("FOOTFALL_PERSON_TIMEOUT_SECS") {
            self.matcher.person_timeout_s = timeout.parse().map_err(|_| {
                anyhow!("FOOTFALL_PERSON_TIMEOUT_SECS must be an integer number of seconds")
            })?;
        }
        if let Ok(timeout) = std::env::var("FOOTFALL_VISIT_TIMEOUT_SECS") {
            self.visit_timeout_s = timeout.parse().map_err(|_| {
                anyhow!("FOOTFALL_VISIT_TIMEOUT_SECS must be an integer number of seconds")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.matcher.similarity_threshold) {
            return Err(anyhow!("similarity threshold must be within 0..=1"));
        }
        if self.matcher.max_persons == 0 {
            return Err(anyhow!("max persons must be greater than zero"));
        }
        if self.matcher.person_timeout_s == 0 {
            return Err(anyhow!("person timeout must be greater than zero"));
        }
        if self.visit_timeout_s == 0 {
            return Err(anyhow!("visit timeout must be greater than zero"));
        }
        for zone in &self.zones {
            zone.validate()?;
        }
        for camera in &self.cameras {
            if camera.fps <= 0.0 {
                return Err(anyhow!("camera {}: fps must be positive", camera.camera_id));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<FootfalldConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
