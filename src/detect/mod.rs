//! Detection and embedding source boundary.
//!
//! Real detection and re-identification inference run outside this crate;
//! these traits define the call boundary they plug into. A synthetic stub
//! implementation drives tests and the demo binary.
//!
//! Sources yield per-frame detections with pixel-space bounding boxes and
//! a frame timestamp derived from frame index and source frame rate.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    /// A crop with no area yields no embedding downstream.
    pub fn is_degenerate(&self) -> bool {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }
}

/// One person detection in one frame.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Per-frame person detection source.
///
/// Implementations must treat a failed frame as recoverable: the pipeline
/// logs and skips it, and the stream continues.
pub trait DetectionSource {
    /// Source identifier for logs.
    fn name(&self) -> &str;

    /// Frames per second of the underlying stream; drives frame timestamps.
    fn fps(&self) -> f64;

    /// Total frame count when the source knows it (files do, live streams
    /// do not). Drives progress percentages.
    fn total_frames(&self) -> Option<u64> {
        None
    }

    /// Detections for the next frame, or `None` when the stream ends.
    fn next_frame(&mut self) -> Result<Option<Vec<Detection>>>;
}

/// Appearance embedding extractor for one detection crop.
pub trait EmbeddingSource {
    /// Fixed-length unit-normalized embedding, or `None` when the crop is
    /// degenerate (empty region). Absent embeddings are not an error.
    fn embed(&mut self, bbox: &BoundingBox) -> Result<Option<Vec<f32>>>;
}

// ----------------------------------------------------------------------------
// Synthetic stub source for tests and the demo
// ----------------------------------------------------------------------------

/// Scripted camera source: a fixed list of per-frame detection sets.
pub struct StubCameraSource {
    name: String,
    fps: f64,
    total: u64,
    frames: std::vec::IntoIter<Vec<Detection>>,
    frames_emitted: u64,
}

impl StubCameraSource {
    pub fn new(name: &str, fps: f64, frames: Vec<Vec<Detection>>) -> Self {
        Self {
            name: name.to_string(),
            fps,
            total: frames.len() as u64,
            frames: frames.into_iter(),
            frames_emitted: 0,
        }
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }
}

impl DetectionSource for StubCameraSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total)
    }

    fn next_frame(&mut self) -> Result<Option<Vec<Detection>>> {
        match self.frames.next() {
            Some(detections) => {
                self.frames_emitted += 1;
                Ok(Some(detections))
            }
            None => Ok(None),
        }
    }
}

/// Embedding stub keyed on crop dimensions, a stand-in for appearance:
/// detections with the same quantized crop shape resolve to the same unit
/// vector wherever they are in the frame, so a walker keeps their identity
/// while moving. Degenerate crops produce no embedding.
pub struct StubEmbeddingSource;

impl EmbeddingSource for StubEmbeddingSource {
    fn embed(&mut self, bbox: &BoundingBox) -> Result<Option<Vec<f32>>> {
        if bbox.is_degenerate() {
            return Ok(None);
        }
        // 32px quantization tolerates frame-to-frame bbox jitter.
        let w_bucket = (bbox.x_max - bbox.x_min) / 32;
        let h_bucket = (bbox.y_max - bbox.y_min) / 32;
        let index = (w_bucket * 31 + h_bucket).rem_euclid(8) as usize;
        let mut embedding = vec![0.0f32; 8];
        embedding[index] = 1.0;
        Ok(Some(embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_bbox_yields_no_embedding() {
        let mut source = StubEmbeddingSource;
        let empty = BoundingBox {
            x_min: 10,
            y_min: 10,
            x_max: 10,
            y_max: 40,
        };
        assert!(empty.is_degenerate());
        assert!(source.embed(&empty).unwrap().is_none());
    }

    #[test]
    fn same_shape_embeds_identically_anywhere_in_frame() {
        let mut source = StubEmbeddingSource;
        let a = BoundingBox {
            x_min: 100,
            y_min: 100,
            x_max: 160,
            y_max: 400,
        };
        let b = BoundingBox {
            x_min: 500,
            y_min: 120,
            x_max: 560,
            y_max: 420,
        };
        let ea = source.embed(&a).unwrap().unwrap();
        let eb = source.embed(&b).unwrap().unwrap();
        assert_eq!(ea, eb);
    }

    #[test]
    fn stub_source_replays_script_then_ends() {
        let det = Detection {
            bbox: BoundingBox {
                x_min: 0,
                y_min: 0,
                x_max: 10,
                y_max: 10,
            },
            confidence: 0.9,
        };
        let mut source = StubCameraSource::new("cam", 10.0, vec![vec![det.clone()], vec![]]);
        assert_eq!(source.next_frame().unwrap().unwrap().len(), 1);
        assert_eq!(source.next_frame().unwrap().unwrap().len(), 0);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.frames_emitted(), 2);
    }
}
