// src/ingest.rs
//
// Normalizes the three detector families' raw output into one ordered
// per-frame detection set: bbox clipping, confidence floors, and
// class-aware NMS. Pure per-frame transform; an empty detector output
// is a valid frame, not an error.

use crate::types::{clip_bbox, iou, Detection, FieldKeypoint, IngestConfig, ObjectClass, RawDetections};
use tracing::debug;

/// The unified detection set for one frame, post-ingestion.
#[derive(Debug, Clone, Default)]
pub struct FrameDetections {
    pub objects: Vec<Detection>,
    pub ball: Option<Detection>,
    pub keypoints: Vec<FieldKeypoint>,
}

pub struct DetectionIngest {
    config: IngestConfig,
}

impl DetectionIngest {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Normalize one frame's raw detector output.
    pub fn ingest(&self, raw: RawDetections, frame_w: f32, frame_h: f32) -> FrameDetections {
        let cfg = &self.config;
        let RawDetections {
            objects: raw_objects,
            ball: raw_ball,
            keypoints: raw_keypoints,
        } = raw;

        // Ball candidates come from the dedicated model when present,
        // otherwise from the ball class of the object model. Boxes get a
        // padding margin so the downstream gate sees a stable centre even
        // when the detector crops the ball tightly.
        let ball_raw: Vec<Detection> = if raw_ball.is_empty() {
            raw_objects
                .iter()
                .filter(|d| d.class == ObjectClass::Ball)
                .cloned()
                .collect()
        } else {
            raw_ball
        };

        // People: clip, floor, then suppress within each class.
        let mut objects: Vec<Detection> = raw_objects
            .into_iter()
            .filter(|d| d.class != ObjectClass::Ball)
            .filter(|d| d.confidence >= cfg.confidence_floor)
            .filter_map(|mut d| {
                d.bbox = clip_bbox(&d.bbox, frame_w, frame_h)?;
                Some(d)
            })
            .collect();
        objects = class_aware_nms(objects, cfg.nms_iou_threshold);
        let mut ball_candidates: Vec<Detection> = ball_raw
            .into_iter()
            .filter(|d| d.confidence >= cfg.confidence_floor)
            .filter_map(|mut d| {
                let padded = [
                    d.bbox[0] - cfg.ball_box_padding_px,
                    d.bbox[1] - cfg.ball_box_padding_px,
                    d.bbox[2] + cfg.ball_box_padding_px,
                    d.bbox[3] + cfg.ball_box_padding_px,
                ];
                d.bbox = clip_bbox(&padded, frame_w, frame_h)?;
                d.class = ObjectClass::Ball;
                Some(d)
            })
            .collect();
        ball_candidates = class_aware_nms(ball_candidates, cfg.ball_nms_iou_threshold);
        // One physical ball: keep the most confident surviving candidate.
        let ball = ball_candidates
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        let keypoints: Vec<FieldKeypoint> = raw_keypoints
            .into_iter()
            .filter(|k| k.confidence >= cfg.keypoint_confidence_floor)
            .filter(|k| {
                k.xy[0] >= 0.0 && k.xy[0] <= frame_w && k.xy[1] >= 0.0 && k.xy[1] <= frame_h
            })
            .collect();

        debug!(
            objects = objects.len(),
            ball = ball.is_some(),
            keypoints = keypoints.len(),
            "frame ingested"
        );

        FrameDetections {
            objects,
            ball,
            keypoints,
        }
    }
}

/// Greedy NMS that only ever suppresses within a class: a player box and
/// a ball box at the same location both survive.
fn class_aware_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class == det.class && iou(&k.bbox, &det.bbox) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}
