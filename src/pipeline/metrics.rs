// src/pipeline/metrics.rs
//
// Run observability. Counts per-stage events so an embedding
// application can log or export them; the pipeline itself only ever
// increments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames: Arc<AtomicU64>,
    pub object_detections: Arc<AtomicU64>,
    pub ball_detections: Arc<AtomicU64>,
    pub keypoint_detections: Arc<AtomicU64>,
    pub detector_timeouts: Arc<AtomicU64>,
    pub homography_valid: Arc<AtomicU64>,
    pub homography_reused: Arc<AtomicU64>,
    pub homography_invalid: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            object_detections: Arc::new(AtomicU64::new(0)),
            ball_detections: Arc::new(AtomicU64::new(0)),
            keypoint_detections: Arc::new(AtomicU64::new(0)),
            detector_timeouts: Arc::new(AtomicU64::new(0)),
            homography_valid: Arc::new(AtomicU64::new(0)),
            homography_reused: Arc::new(AtomicU64::new(0)),
            homography_invalid: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames: self.frames.load(Ordering::Relaxed),
            fps: self.fps(),
            object_detections: self.object_detections.load(Ordering::Relaxed),
            ball_detections: self.ball_detections.load(Ordering::Relaxed),
            keypoint_detections: self.keypoint_detections.load(Ordering::Relaxed),
            detector_timeouts: self.detector_timeouts.load(Ordering::Relaxed),
            homography_valid: self.homography_valid.load(Ordering::Relaxed),
            homography_reused: self.homography_reused.load(Ordering::Relaxed),
            homography_invalid: self.homography_invalid.load(Ordering::Relaxed),
            tracks_created: self.tracks_created.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames: u64,
    pub fps: f64,
    pub object_detections: u64,
    pub ball_detections: u64,
    pub keypoint_detections: u64,
    pub detector_timeouts: u64,
    pub homography_valid: u64,
    pub homography_reused: u64,
    pub homography_invalid: u64,
    pub tracks_created: u64,
    pub elapsed_secs: f64,
}
