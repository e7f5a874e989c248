// src/pipeline/frame_context.rs
//
// Single source of truth for one frame as it moves through the
// sequential stages. Every stage reads from here instead of caching
// its own copy of another stage's output.

use crate::ingest::FrameDetections;
use crate::types::Frame;

#[derive(Debug)]
pub struct FrameContext {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    /// Pixel data; None when the detector overran its budget and the
    /// frame was demoted to a zero-detection frame.
    pub pixels: Option<Frame>,
    /// Post-ingestion detection set.
    pub detections: FrameDetections,
}

impl FrameContext {
    pub fn empty(frame_index: u64, timestamp_ms: f64) -> Self {
        Self {
            frame_index,
            timestamp_ms,
            pixels: None,
            detections: FrameDetections::default(),
        }
    }

    pub fn detection_count(&self) -> usize {
        self.detections.objects.len()
            + usize::from(self.detections.ball.is_some())
            + self.detections.keypoints.len()
    }
}
