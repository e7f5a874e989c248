// src/perspective_mapper.rs
//
// Per-frame homography state. Detected field keypoints are matched to
// the canonical FieldModel; with >=4 correspondences a robust fit maps
// pixels to pitch metres. Consecutive valid fits are low-pass filtered
// to suppress keypoint jitter. When a frame cannot be fitted, the last
// valid homography is reused as ReusedStale until the reuse window runs
// out, after which frames are Invalid and nothing is projected.

use crate::field_model::FieldModel;
use crate::homography::{self, Correspondence};
use crate::types::{FieldKeypoint, MapperConfig};
use nalgebra::Matrix3;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HomographyValidity {
    Valid,
    ReusedStale,
    Invalid,
}

/// The transform in effect for one frame.
#[derive(Debug, Clone)]
pub struct FrameHomography {
    pub validity: HomographyValidity,
    h: Option<Matrix3<f64>>,
}

impl FrameHomography {
    fn invalid() -> Self {
        Self {
            validity: HomographyValidity::Invalid,
            h: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.h.is_some()
    }

    /// Pixel -> pitch metres. None on Invalid frames.
    pub fn project(&self, pixel: [f32; 2]) -> Option<[f64; 2]> {
        let h = self.h.as_ref()?;
        homography::apply(h, [pixel[0] as f64, pixel[1] as f64])
    }
}

pub struct PerspectiveMapper {
    config: MapperConfig,
    field: Arc<FieldModel>,
    /// Smoothed current estimate; survives gaps for reuse.
    smoothed: Option<Matrix3<f64>>,
    last_valid_frame: Option<u64>,
    /// Whether the previous frame produced a fresh fit; a break resets
    /// the low-pass chain so stale and fresh transforms never mix.
    chain_alive: bool,
}

impl PerspectiveMapper {
    pub fn new(config: MapperConfig, field: Arc<FieldModel>) -> Self {
        Self {
            config,
            field,
            smoothed: None,
            last_valid_frame: None,
            chain_alive: false,
        }
    }

    /// Consume one frame's keypoints and produce its transform.
    pub fn update(&mut self, keypoints: &[FieldKeypoint], frame_index: u64) -> FrameHomography {
        let correspondences = self.match_keypoints(keypoints);

        if correspondences.len() >= 4 {
            // Seed varies per frame but not per run, keeping RANSAC
            // deterministic for identical input.
            let seed = self.config.ransac_seed.wrapping_add(frame_index);
            match homography::fit_robust(
                &correspondences,
                self.config.ransac_iterations,
                self.config.ransac_inlier_threshold,
                seed,
            ) {
                Ok(fit) => {
                    if !fit.rejected_ids.is_empty() {
                        debug!(
                            "frame {}: rejected keypoint correspondences {:?}",
                            frame_index, fit.rejected_ids
                        );
                    }
                    let smoothed = self.absorb(fit.h);
                    self.last_valid_frame = Some(frame_index);
                    return FrameHomography {
                        validity: HomographyValidity::Valid,
                        h: Some(smoothed),
                    };
                }
                Err(e) => {
                    debug!("frame {}: homography fit failed: {}", frame_index, e);
                }
            }
        }

        // Not enough evidence this frame: fall back to the last fit if
        // it is still fresh enough.
        self.chain_alive = false;
        match (self.smoothed, self.last_valid_frame) {
            (Some(h), Some(last))
                if frame_index.saturating_sub(last) <= self.config.reuse_window_frames =>
            {
                FrameHomography {
                    validity: HomographyValidity::ReusedStale,
                    h: Some(h),
                }
            }
            (Some(_), Some(last)) => {
                // Past the window the old transform is a lie; drop it
                // rather than letting it drift further from reality.
                warn!(
                    "frame {}: homography stale beyond {} frames (last fit at {}), discarding",
                    frame_index, self.config.reuse_window_frames, last
                );
                self.smoothed = None;
                self.last_valid_frame = None;
                FrameHomography::invalid()
            }
            _ => FrameHomography::invalid(),
        }
    }

    /// Blend a fresh fit into the low-pass chain.
    fn absorb(&mut self, h_new: Matrix3<f64>) -> Matrix3<f64> {
        let alpha = self.config.smoothing_alpha;
        let smoothed = match self.smoothed {
            Some(prev) if self.chain_alive => {
                let blended = h_new * alpha + prev * (1.0 - alpha);
                // Both inputs are h33-normalized, so the blend stays
                // away from zero and renormalizes cleanly.
                homography::normalize(blended).unwrap_or(h_new)
            }
            _ => h_new,
        };
        self.smoothed = Some(smoothed);
        self.chain_alive = true;
        smoothed
    }

    /// Keypoints to canonical correspondences: unknown ids are dropped,
    /// duplicate ids keep the most confident detection.
    fn match_keypoints(&self, keypoints: &[FieldKeypoint]) -> Vec<Correspondence> {
        let mut best: HashMap<u32, &FieldKeypoint> = HashMap::new();
        for kp in keypoints {
            if self.field.get(kp.id).is_none() {
                debug!("unknown field keypoint id {}", kp.id);
                continue;
            }
            best.entry(kp.id)
                .and_modify(|cur| {
                    if kp.confidence > cur.confidence {
                        *cur = kp;
                    }
                })
                .or_insert(kp);
        }

        let mut out: Vec<Correspondence> = best
            .into_values()
            .map(|kp| Correspondence {
                keypoint_id: kp.id,
                pixel: [kp.xy[0] as f64, kp.xy[1] as f64],
                pitch: self.field.get(kp.id).unwrap_or_default(),
            })
            .collect();
        // HashMap order is not deterministic; the fit must be.
        out.sort_by_key(|c| c.keypoint_id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Synthetic broadcast camera: pitch metres -> pixels.
    fn camera() -> Matrix3<f64> {
        Matrix3::new(
            15.0, 0.5, 100.0, //
            0.2, 12.0, 50.0, //
            1.0e-4, 5.0e-5, 1.0,
        )
    }

    fn keypoint(field: &FieldModel, cam: &Matrix3<f64>, id: u32) -> FieldKeypoint {
        let pitch = field.get(id).unwrap();
        let px = homography::apply(cam, pitch).unwrap();
        FieldKeypoint {
            id,
            xy: [px[0] as f32, px[1] as f32],
            confidence: 0.9,
        }
    }

    fn mapper(cfg: MapperConfig) -> PerspectiveMapper {
        PerspectiveMapper::new(cfg, Arc::new(FieldModel::standard()))
    }

    #[test]
    fn test_valid_fit_reprojects_keypoints() {
        let field = FieldModel::standard();
        let cam = camera();
        let kps: Vec<FieldKeypoint> =
            [0, 5, 12, 21, 26].iter().map(|&id| keypoint(&field, &cam, id)).collect();

        let mut mapper = mapper(MapperConfig::default());
        let fh = mapper.update(&kps, 0);
        assert_eq!(fh.validity, HomographyValidity::Valid);

        for kp in &kps {
            let pitch = fh.project(kp.xy).unwrap();
            let truth = field.get(kp.id).unwrap();
            assert!((pitch[0] - truth[0]).abs() < 0.1, "x {} vs {}", pitch[0], truth[0]);
            assert!((pitch[1] - truth[1]).abs() < 0.1);
        }
    }

    #[test]
    fn test_three_keypoints_reuse_prior() {
        let field = FieldModel::standard();
        let cam = camera();
        let full: Vec<FieldKeypoint> =
            [0, 5, 8, 12, 21].iter().map(|&id| keypoint(&field, &cam, id)).collect();
        let sparse: Vec<FieldKeypoint> =
            [0, 5, 12].iter().map(|&id| keypoint(&field, &cam, id)).collect();

        let mut mapper = mapper(MapperConfig::default());
        assert_eq!(mapper.update(&full, 0).validity, HomographyValidity::Valid);

        let fh = mapper.update(&sparse, 1);
        assert_eq!(fh.validity, HomographyValidity::ReusedStale);
        // The reused transform still projects.
        let p = fh.project(sparse[2].xy).unwrap();
        assert_relative_eq!(p[0], 52.5, epsilon = 0.1);
        assert_relative_eq!(p[1], 34.0, epsilon = 0.1);
    }

    #[test]
    fn test_reuse_window_expires_to_invalid() {
        let field = FieldModel::standard();
        let cam = camera();
        let full: Vec<FieldKeypoint> =
            [0, 5, 12, 21].iter().map(|&id| keypoint(&field, &cam, id)).collect();

        let cfg = MapperConfig {
            reuse_window_frames: 3,
            ..MapperConfig::default()
        };
        let mut mapper = mapper(cfg);
        mapper.update(&full, 0);

        for f in 1..=3 {
            assert_eq!(mapper.update(&[], f).validity, HomographyValidity::ReusedStale);
        }
        let fh = mapper.update(&[], 4);
        assert_eq!(fh.validity, HomographyValidity::Invalid);
        assert!(fh.project([500.0, 500.0]).is_none());

        // Once discarded it stays gone; the next empty frame is Invalid
        // immediately, not ReusedStale.
        assert_eq!(mapper.update(&[], 5).validity, HomographyValidity::Invalid);

        // A fresh set of keypoints recovers.
        assert_eq!(mapper.update(&full, 6).validity, HomographyValidity::Valid);
    }

    #[test]
    fn test_smoothing_converges_on_constant_input() {
        let field = FieldModel::standard();
        let cam = camera();
        let kps: Vec<FieldKeypoint> =
            [0, 5, 12, 21, 26].iter().map(|&id| keypoint(&field, &cam, id)).collect();

        let mut mapper = mapper(MapperConfig::default());
        let mut last = None;
        for f in 0..5 {
            let fh = mapper.update(&kps, f);
            assert_eq!(fh.validity, HomographyValidity::Valid);
            last = Some(fh);
        }
        // Constant input: smoothing must not drift the estimate.
        let p = last.unwrap().project(kps[2].xy).unwrap();
        assert_relative_eq!(p[0], 52.5, epsilon = 0.1);
        assert_relative_eq!(p[1], 34.0, epsilon = 0.1);
    }

    #[test]
    fn test_duplicate_ids_keep_most_confident() {
        let field = FieldModel::standard();
        let cam = camera();
        let good = keypoint(&field, &cam, 12);
        let mut bad = good.clone();
        bad.xy = [bad.xy[0] + 400.0, bad.xy[1]];
        bad.confidence = 0.2;

        let mapper = mapper(MapperConfig::default());
        let corr = mapper.match_keypoints(&[bad, good.clone()]);
        assert_eq!(corr.len(), 1);
        assert_relative_eq!(corr[0].pixel[0], good.xy[0] as f64, epsilon = 1e-3);
    }

    #[test]
    fn test_unknown_ids_dropped() {
        let field = FieldModel::standard();
        let cam = camera();
        let mut kps: Vec<FieldKeypoint> =
            [0, 5].iter().map(|&id| keypoint(&field, &cam, id)).collect();
        kps.push(FieldKeypoint {
            id: 999,
            xy: [100.0, 100.0],
            confidence: 0.9,
        });

        let mapper = mapper(MapperConfig::default());
        assert_eq!(mapper.match_keypoints(&kps).len(), 2);
    }
}
