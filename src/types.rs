// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub ingest: IngestConfig,
    pub tracker: TrackerConfig,
    pub ball: BallConfig,
    pub team: TeamConfig,
    pub mapper: MapperConfig,
    pub aggregator: AggregatorConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub confidence_floor: f32,
    pub keypoint_confidence_floor: f32,
    pub nms_iou_threshold: f32,
    /// Ball boxes are tiny and rarely overlap legitimately, so duplicates
    /// are suppressed at a much lower IoU than the other classes.
    pub ball_nms_iou_threshold: f32,
    pub ball_box_padding_px: f32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.3,
            keypoint_confidence_floor: 0.3,
            nms_iou_threshold: 0.5,
            ball_nms_iou_threshold: 0.1,
            ball_box_padding_px: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Minimum IoU between a detection and a track's predicted box to match
    pub min_iou: f32,
    /// Consecutive hits required to promote Tentative -> Confirmed
    pub confirm_frames: u32,
    /// Consecutive misses before a Confirmed track goes Lost
    pub lost_after_misses: u32,
    /// Total consecutive misses before a Lost track is Terminated.
    /// This is the re-identification window: a matching detection inside
    /// it revives the track with its original id.
    pub terminate_after_misses: u32,
    /// Maximum centroid distance (fraction of frame width) for the
    /// low-IoU fallback match
    pub max_centroid_distance_ratio: f32,
    /// Maximum misses for the centroid fallback to apply
    pub centroid_fallback_max_misses: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.15,
            confirm_frames: 3,
            lost_after_misses: 5,
            terminate_after_misses: 45,
            max_centroid_distance_ratio: 0.20,
            centroid_fallback_max_misses: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallConfig {
    /// Trail length in positions (FIFO, oldest evicted first)
    pub trail_len: usize,
    /// Association gate around the motion-predicted position, in pixels
    pub gate_radius_px: f32,
    /// Consecutive missed frames bridged by extrapolation before the
    /// track is dropped
    pub max_extrapolation_frames: u32,
}

impl Default for BallConfig {
    fn default() -> Self {
        Self {
            trail_len: 30,
            gate_radius_px: 150.0,
            max_extrapolation_frames: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Frames between jersey samples for a given track
    pub sample_stride: u64,
    /// Stop sampling a track after this many features
    pub max_samples_per_track: usize,
    /// Samples collected across all tracks before the first fit
    pub fit_after_samples: usize,
    /// Fit no later than this frame even if few samples arrived
    pub fit_after_frames: u64,
    /// A track is Unassigned when d_nearest / d_other exceeds this ratio
    pub ambiguity_ratio: f32,
    /// Minimum samples before a track is a clustering candidate
    pub min_samples: usize,
    pub kmeans_iterations: usize,
    /// HSV value below which a pixel is treated as shadow and skipped
    pub value_floor: f32,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            sample_stride: 30,
            max_samples_per_track: 20,
            fit_after_samples: 500,
            fit_after_frames: 900,
            ambiguity_ratio: 0.8,
            min_samples: 1,
            kmeans_iterations: 20,
            value_floor: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    pub ransac_iterations: usize,
    /// Inlier reprojection threshold in pitch units (metres)
    pub ransac_inlier_threshold: f64,
    pub ransac_seed: u64,
    /// Frames a stale homography may be reused after the last valid fit
    pub reuse_window_frames: u64,
    /// Weight of the newest fit in the exponential smoother, (0, 1]
    pub smoothing_alpha: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            ransac_iterations: 500,
            ransac_inlier_threshold: 0.75,
            ransac_seed: 7,
            reuse_window_frames: 30,
            smoothing_alpha: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// A player within this many metres of the ball holds possession
    pub possession_radius_m: f64,
    /// Per-frame displacement above this is an id switch or homography
    /// jump, not running, and is dropped from the distance sum
    pub max_step_m: f64,
    pub heatmap_bins_x: usize,
    pub heatmap_bins_y: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            possession_radius_m: 3.0,
            max_step_m: 5.0,
            heatmap_bins_x: 21,
            heatmap_bins_y: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the detection-stage hand-off channel
    pub channel_capacity: usize,
    /// Per-frame detector time budget in milliseconds; a frame that
    /// overruns it is processed as a zero-detection frame
    pub detector_budget_ms: u64,
    /// Invoke the progress callback every this many frames
    pub progress_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8,
            detector_budget_ms: 500,
            progress_every: 10,
        }
    }
}

// ============================================================================
// FRAMES AND DETECTOR OUTPUT
// ============================================================================

/// Properties of the video under analysis, supplied by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoMeta {
    pub width: usize,
    pub height: usize,
    pub fps: f64,
}

/// One decoded video frame, RGB interleaved.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

/// Object classes emitted by the detector families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    Player,
    Goalkeeper,
    Referee,
    Ball,
}

impl ObjectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectClass::Player => "PLAYER",
            ObjectClass::Goalkeeper => "GOALKEEPER",
            ObjectClass::Referee => "REFEREE",
            ObjectClass::Ball => "BALL",
        }
    }

    /// Players and goalkeepers wear team jerseys; referees and the ball
    /// never enter team clustering.
    pub fn is_team_candidate(&self) -> bool {
        matches!(self, ObjectClass::Player | ObjectClass::Goalkeeper)
    }
}

/// A single object detection on one frame.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] pixels
    pub class: ObjectClass,
    pub confidence: f32,
}

impl Detection {
    pub fn center(&self) -> [f32; 2] {
        [
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        ]
    }

    /// Ground contact approximation used for pitch projection.
    pub fn bottom_center(&self) -> [f32; 2] {
        [(self.bbox[0] + self.bbox[2]) * 0.5, self.bbox[3]]
    }

    pub fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }
}

/// A detected pitch landmark (line intersection, penalty spot, ...).
#[derive(Debug, Clone, Serialize)]
pub struct FieldKeypoint {
    pub id: u32,
    pub xy: [f32; 2], // pixels
    pub confidence: f32,
}

/// Raw per-frame output of the three detector families, before ingestion.
#[derive(Debug, Clone, Default)]
pub struct RawDetections {
    /// Player / goalkeeper / referee model
    pub objects: Vec<Detection>,
    /// Dedicated ball model (may be empty when that model is absent)
    pub ball: Vec<Detection>,
    /// Field-keypoint model
    pub keypoints: Vec<FieldKeypoint>,
}

/// Team label attached to a track by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamLabel {
    TeamA,
    TeamB,
    Unassigned,
}

impl TeamLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamLabel::TeamA => "TEAM_A",
            TeamLabel::TeamB => "TEAM_B",
            TeamLabel::Unassigned => "UNASSIGNED",
        }
    }
}

// ============================================================================
// BBOX HELPERS
// ============================================================================

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Clip a bbox to frame bounds. Returns None when nothing remains.
pub fn clip_bbox(bbox: &[f32; 4], width: f32, height: f32) -> Option<[f32; 4]> {
    let x1 = bbox[0].clamp(0.0, width);
    let y1 = bbox[1].clamp(0.0, height);
    let x2 = bbox[2].clamp(0.0, width);
    let y2 = bbox[3].clamp(0.0, height);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some([x1, y1, x2, y2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_overlap() {
        let a = [0.0, 0.0, 100.0, 100.0];
        let b = [50.0, 50.0, 150.0, 150.0];
        let score = iou(&a, &b);
        assert!((score - 2500.0 / 17500.0).abs() < 0.01);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = [0.0, 0.0, 50.0, 50.0];
        let b = [100.0, 100.0, 200.0, 200.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_clip_inside_untouched() {
        let b = [10.0, 10.0, 50.0, 50.0];
        assert_eq!(clip_bbox(&b, 100.0, 100.0), Some(b));
    }

    #[test]
    fn test_clip_partial() {
        let b = [-20.0, 30.0, 50.0, 130.0];
        assert_eq!(clip_bbox(&b, 100.0, 100.0), Some([0.0, 30.0, 50.0, 100.0]));
    }

    #[test]
    fn test_clip_degenerate_dropped() {
        let b = [120.0, 10.0, 150.0, 50.0];
        assert_eq!(clip_bbox(&b, 100.0, 100.0), None);
    }

    #[test]
    fn test_config_defaults_sane() {
        let cfg = Config::default();
        assert!(cfg.tracker.lost_after_misses < cfg.tracker.terminate_after_misses);
        assert!(cfg.ball.max_extrapolation_frames as usize <= cfg.ball.trail_len);
        assert!(cfg.mapper.smoothing_alpha > 0.0 && cfg.mapper.smoothing_alpha <= 1.0);
    }
}
