// src/team_classifier.rs
//
// Unsupervised team separation from jersey appearance.
//
// Each confirmed player/goalkeeper track contributes periodic samples of
// its jersey region, reduced to a compact HSV feature. Once enough
// samples exist (or a frame deadline passes) a 2-means clustering over
// the per-track mean features yields two centroids; tracks are labeled
// by nearest centroid, with an ambiguity margin that leaves uncertain
// tracks Unassigned. Unassigned tracks can resolve later by a majority
// vote over their individual samples; goalkeepers that never resolve by
// appearance (their kit differs from both teams) inherit the team whose
// players stand nearest on the pitch. A label, once set, never changes.

use crate::types::{Frame, ObjectClass, TeamConfig, TeamLabel};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Compact appearance feature. Hue is circular, so it enters as a
/// saturation-scaled unit vector; value is rescaled to the same range.
type Feature = [f32; 3];

fn feature_from_hsv(h_deg: f32, s: f32, v: f32) -> Feature {
    let rad = h_deg.to_radians();
    [s * rad.cos(), s * rad.sin(), v * (100.0 / 255.0)]
}

fn dist(a: &Feature, b: &Feature) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Convert RGB to HSV. Returns (H: 0-360, S: 0-100, V: 0-255).
#[inline]
fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let r_n = r / 255.0;
    let g_n = g / 255.0;
    let b_n = b / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    let s = if max < 1e-6 { 0.0 } else { (delta / max) * 100.0 };
    let v = max * 255.0;

    (h, s, v)
}

#[derive(Debug)]
struct TrackAppearance {
    class: ObjectClass,
    samples: Vec<Feature>,
    sum: [f64; 3],
    label: TeamLabel,
    last_sampled_frame: Option<u64>,
}

impl TrackAppearance {
    fn new(class: ObjectClass) -> Self {
        Self {
            class,
            samples: Vec::new(),
            sum: [0.0; 3],
            label: TeamLabel::Unassigned,
            last_sampled_frame: None,
        }
    }

    fn mean(&self) -> Feature {
        let n = self.samples.len().max(1) as f64;
        [
            (self.sum[0] / n) as f32,
            (self.sum[1] / n) as f32,
            (self.sum[2] / n) as f32,
        ]
    }
}

pub struct TeamClassifier {
    config: TeamConfig,
    tracks: HashMap<u64, TrackAppearance>,
    centroids: Option<[Feature; 2]>,
    total_samples: usize,
}

impl TeamClassifier {
    pub fn new(config: TeamConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            centroids: None,
            total_samples: 0,
        }
    }

    /// Sample a confirmed track's jersey region from the current frame.
    /// Referees and the ball are ignored here by class.
    pub fn observe(
        &mut self,
        track_id: u64,
        class: ObjectClass,
        bbox: &[f32; 4],
        frame: &Frame,
    ) {
        if !class.is_team_candidate() {
            return;
        }

        let entry = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackAppearance::new(class));
        entry.class = class;

        if let Some(last) = entry.last_sampled_frame {
            if frame.index.saturating_sub(last) < self.config.sample_stride {
                return;
            }
        }
        if entry.samples.len() >= self.config.max_samples_per_track {
            return;
        }

        let Some(feature) = jersey_feature(frame, bbox, self.config.value_floor) else {
            return;
        };

        entry.last_sampled_frame = Some(frame.index);
        entry.samples.push(feature);
        entry.sum[0] += feature[0] as f64;
        entry.sum[1] += feature[1] as f64;
        entry.sum[2] += feature[2] as f64;
        self.total_samples += 1;

        // A late sample can resolve a track the fit left Unassigned.
        if entry.label == TeamLabel::Unassigned {
            if let Some(centroids) = self.centroids {
                let mean = entry.mean();
                if let Some(label) = classify(&mean, &centroids, self.config.ambiguity_ratio) {
                    entry.label = label;
                    debug!("track {} resolved to {} online", track_id, label.as_str());
                }
            }
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.centroids.is_some()
    }

    /// Fit once enough evidence has accumulated.
    pub fn maybe_fit(&mut self, frame_index: u64) {
        if self.is_fitted() {
            return;
        }
        if self.total_samples >= self.config.fit_after_samples
            || frame_index >= self.config.fit_after_frames
        {
            self.fit();
        }
    }

    /// Run the 2-means separation over all candidate tracks and label
    /// them. Safe to call early; does nothing with fewer than two
    /// candidates.
    pub fn fit(&mut self) {
        let mut candidates: Vec<(u64, Feature)> = self
            .tracks
            .iter()
            .filter(|(_, t)| t.samples.len() >= self.config.min_samples)
            .map(|(&id, t)| (id, t.mean()))
            .collect();
        // Map iteration order is arbitrary; the clustering must see a
        // fixed order for reruns to produce identical centroids.
        candidates.sort_by_key(|(id, _)| *id);

        if candidates.len() < 2 {
            warn!(
                "team fit skipped: only {} candidate tracks",
                candidates.len()
            );
            return;
        }

        let features: Vec<Feature> = candidates.iter().map(|(_, f)| *f).collect();
        let centroids = two_means(&features, self.config.kmeans_iterations);
        self.centroids = Some(centroids);
        info!(
            "team centroids fitted over {} tracks ({} samples)",
            candidates.len(),
            self.total_samples
        );

        self.relabel();
    }

    /// Assign labels from the fitted centroids. Existing team labels are
    /// immutable; only Unassigned tracks can gain one.
    fn relabel(&mut self) {
        let Some(centroids) = self.centroids else {
            return;
        };
        for (id, track) in self.tracks.iter_mut() {
            if track.label != TeamLabel::Unassigned || track.samples.is_empty() {
                continue;
            }
            match classify(&track.mean(), &centroids, self.config.ambiguity_ratio) {
                Some(label) => {
                    track.label = label;
                }
                None => {
                    debug!("track {} ambiguous between centroids", id);
                }
            }
        }
    }

    /// End-of-run resolution: per-sample majority vote for tracks the
    /// mean feature left ambiguous, then the positional fallback for
    /// goalkeepers (their kit matches neither team's outfield colors).
    /// `pitch_positions` maps track id to its mean pitch position, where
    /// known.
    pub fn finalize(&mut self, pitch_positions: &HashMap<u64, [f64; 2]>) {
        if self.centroids.is_none() {
            self.fit();
        }

        if let Some(centroids) = self.centroids {
            for track in self.tracks.values_mut() {
                if track.label != TeamLabel::Unassigned {
                    continue;
                }
                if let Some(label) =
                    sample_majority(&track.samples, &centroids, self.config.ambiguity_ratio)
                {
                    track.label = label;
                }
            }
        }

        self.resolve_goalkeepers_by_position(pitch_positions);
    }

    /// Nearest-team-centroid fallback for goalkeepers, mirroring where
    /// each team actually stands on the pitch.
    fn resolve_goalkeepers_by_position(&mut self, pitch_positions: &HashMap<u64, [f64; 2]>) {
        let centroid = |label: TeamLabel| -> Option<[f64; 2]> {
            let mut sum = [0.0f64; 2];
            let mut n = 0usize;
            for (id, t) in self.tracks.iter() {
                if t.label == label {
                    if let Some(p) = pitch_positions.get(id) {
                        sum[0] += p[0];
                        sum[1] += p[1];
                        n += 1;
                    }
                }
            }
            (n > 0).then(|| [sum[0] / n as f64, sum[1] / n as f64])
        };
        let (Some(ca), Some(cb)) = (centroid(TeamLabel::TeamA), centroid(TeamLabel::TeamB)) else {
            return;
        };

        for (id, track) in self.tracks.iter_mut() {
            if track.class != ObjectClass::Goalkeeper || track.label != TeamLabel::Unassigned {
                continue;
            }
            let Some(p) = pitch_positions.get(id) else {
                continue;
            };
            let da = (p[0] - ca[0]).powi(2) + (p[1] - ca[1]).powi(2);
            let db = (p[0] - cb[0]).powi(2) + (p[1] - cb[1]).powi(2);
            track.label = if da < db {
                TeamLabel::TeamA
            } else {
                TeamLabel::TeamB
            };
            info!(
                "goalkeeper track {} assigned {} by pitch position",
                id,
                track.label.as_str()
            );
        }
    }

    pub fn label(&self, track_id: u64) -> TeamLabel {
        self.tracks
            .get(&track_id)
            .map(|t| t.label)
            .unwrap_or(TeamLabel::Unassigned)
    }

    pub fn labels(&self) -> HashMap<u64, TeamLabel> {
        self.tracks.iter().map(|(&id, t)| (id, t.label)).collect()
    }
}

/// Nearest-centroid label with the ambiguity margin: None when the
/// distance ratio says the call is too close.
fn classify(feature: &Feature, centroids: &[Feature; 2], ambiguity_ratio: f32) -> Option<TeamLabel> {
    let da = dist(feature, &centroids[0]);
    let db = dist(feature, &centroids[1]);
    let (near, far, label) = if da <= db {
        (da, db, TeamLabel::TeamA)
    } else {
        (db, da, TeamLabel::TeamB)
    };
    if far > 1e-6 && near / far > ambiguity_ratio {
        return None;
    }
    Some(label)
}

/// Majority vote over individually-resolved samples.
fn sample_majority(
    samples: &[Feature],
    centroids: &[Feature; 2],
    ambiguity_ratio: f32,
) -> Option<TeamLabel> {
    let mut votes_a = 0usize;
    let mut votes_b = 0usize;
    for s in samples {
        match classify(s, centroids, ambiguity_ratio) {
            Some(TeamLabel::TeamA) => votes_a += 1,
            Some(TeamLabel::TeamB) => votes_b += 1,
            _ => {}
        }
    }
    if votes_a > votes_b {
        Some(TeamLabel::TeamA)
    } else if votes_b > votes_a {
        Some(TeamLabel::TeamB)
    } else {
        None
    }
}

/// Lloyd's 2-means with deterministic farthest-pair initialization, so a
/// rerun over identical input yields identical centroids.
fn two_means(features: &[Feature], iterations: usize) -> [Feature; 2] {
    debug_assert!(features.len() >= 2);

    // Initial centroids: the most separated pair.
    let (mut ia, mut ib, mut best) = (0, 1, -1.0f32);
    for i in 0..features.len() {
        for j in (i + 1)..features.len() {
            let d = dist(&features[i], &features[j]);
            if d > best {
                best = d;
                ia = i;
                ib = j;
            }
        }
    }
    let mut centroids = [features[ia], features[ib]];

    for _ in 0..iterations {
        let mut sums = [[0.0f64; 3]; 2];
        let mut counts = [0usize; 2];
        for f in features {
            let k = if dist(f, &centroids[0]) <= dist(f, &centroids[1]) {
                0
            } else {
                1
            };
            sums[k][0] += f[0] as f64;
            sums[k][1] += f[1] as f64;
            sums[k][2] += f[2] as f64;
            counts[k] += 1;
        }
        let mut moved = false;
        for k in 0..2 {
            if counts[k] == 0 {
                continue;
            }
            let next = [
                (sums[k][0] / counts[k] as f64) as f32,
                (sums[k][1] / counts[k] as f64) as f32,
                (sums[k][2] / counts[k] as f64) as f32,
            ];
            if dist(&next, &centroids[k]) > 1e-4 {
                moved = true;
            }
            centroids[k] = next;
        }
        if !moved {
            break;
        }
    }
    centroids
}

/// Mean HSV feature over the jersey region of a bounding box: the upper
/// torso band, inset from the edges to avoid grass and limbs. Dark
/// pixels are shadow and are skipped. None when too few pixels survive.
fn jersey_feature(frame: &Frame, bbox: &[f32; 4], value_floor: f32) -> Option<Feature> {
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    let x1 = (bbox[0] + 0.25 * w).max(0.0) as usize;
    let x2 = ((bbox[2] - 0.25 * w) as usize).min(frame.width.saturating_sub(1));
    let y1 = (bbox[1] + 0.15 * h).max(0.0) as usize;
    let y2 = ((bbox[1] + 0.55 * h) as usize).min(frame.height.saturating_sub(1));
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let step = if (x2 - x1) * (y2 - y1) > 2000 { 3 } else { 1 };
    let mut sum = [0.0f64; 3];
    let mut count = 0usize;

    for y in (y1..=y2).step_by(step) {
        for x in (x1..=x2).step_by(step) {
            let idx = (y * frame.width + x) * 3;
            if idx + 2 >= frame.data.len() {
                continue;
            }
            let r = frame.data[idx] as f32;
            let g = frame.data[idx + 1] as f32;
            let b = frame.data[idx + 2] as f32;
            let (hue, s, v) = rgb_to_hsv(r, g, b);
            if v < value_floor {
                continue;
            }
            let f = feature_from_hsv(hue, s, v);
            sum[0] += f[0] as f64;
            sum[1] += f[1] as f64;
            sum[2] += f[2] as f64;
            count += 1;
        }
    }

    if count < 8 {
        return None;
    }
    Some([
        (sum[0] / count as f64) as f32,
        (sum[1] / count as f64) as f32,
        (sum[2] / count as f64) as f32,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(index: u64, rgb: [u8; 3]) -> Frame {
        let (w, h) = (64usize, 64usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for _ in 0..w * h {
            data.extend_from_slice(&rgb);
        }
        Frame {
            index,
            data,
            width: w,
            height: h,
            timestamp_ms: index as f64 * 33.3,
        }
    }

    const FULL: [f32; 4] = [0.0, 0.0, 64.0, 64.0];

    fn classifier() -> TeamClassifier {
        TeamClassifier::new(TeamConfig {
            sample_stride: 1,
            min_samples: 1,
            ..TeamConfig::default()
        })
    }

    #[test]
    fn test_rgb_to_hsv_primaries() {
        let (h, s, v) = rgb_to_hsv(255.0, 0.0, 0.0);
        assert!(h.abs() < 1.0 && (s - 100.0).abs() < 1.0 && (v - 255.0).abs() < 1.0);
        let (h, _, _) = rgb_to_hsv(0.0, 0.0, 255.0);
        assert!((h - 240.0).abs() < 1.0);
        let (_, s, v) = rgb_to_hsv(255.0, 255.0, 255.0);
        assert!(s < 1.0 && (v - 255.0).abs() < 1.0);
    }

    #[test]
    fn test_clean_two_color_split() {
        let mut clf = classifier();
        let red = solid_frame(0, [220, 30, 30]);
        let blue = solid_frame(0, [30, 30, 220]);

        for id in 1..=6u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &red);
        }
        for id in 7..=12u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &blue);
        }
        clf.fit();

        let labels = clf.labels();
        let red_label = labels[&1];
        let blue_label = labels[&7];
        assert_ne!(red_label, TeamLabel::Unassigned);
        assert_ne!(blue_label, TeamLabel::Unassigned);
        assert_ne!(red_label, blue_label);
        for id in 1..=6u64 {
            assert_eq!(labels[&id], red_label);
        }
        for id in 7..=12u64 {
            assert_eq!(labels[&id], blue_label);
        }
    }

    #[test]
    fn test_midway_feature_is_unassigned() {
        // min_samples = 2 keeps the single-sample grey track out of the
        // clustering itself, so the centroids are the pure kit colors.
        let mut clf = TeamClassifier::new(TeamConfig {
            sample_stride: 1,
            min_samples: 2,
            ..TeamConfig::default()
        });
        let grey = solid_frame(0, [128, 128, 128]);

        for f in 0..2u64 {
            let red = solid_frame(f, [220, 30, 30]);
            let blue = solid_frame(f, [30, 30, 220]);
            for id in 1..=4u64 {
                clf.observe(id, ObjectClass::Player, &FULL, &red);
            }
            for id in 5..=8u64 {
                clf.observe(id, ObjectClass::Player, &FULL, &blue);
            }
        }
        clf.observe(9, ObjectClass::Player, &FULL, &grey);
        clf.fit();

        assert_ne!(clf.label(1), TeamLabel::Unassigned);
        assert_ne!(clf.label(5), TeamLabel::Unassigned);
        // Grey is equidistant from both centroids.
        assert_eq!(clf.label(9), TeamLabel::Unassigned);
    }

    #[test]
    fn test_referee_never_sampled() {
        let mut clf = classifier();
        let yellow = solid_frame(0, [230, 210, 40]);
        clf.observe(1, ObjectClass::Referee, &FULL, &yellow);
        assert!(clf.labels().is_empty());
    }

    #[test]
    fn test_label_immutable_after_assignment() {
        let mut clf = classifier();
        let red = solid_frame(0, [220, 30, 30]);
        let blue = solid_frame(0, [30, 30, 220]);

        for id in 1..=3u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &red);
        }
        for id in 4..=6u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &blue);
        }
        clf.fit();
        let before = clf.label(1);
        assert_ne!(before, TeamLabel::Unassigned);

        // Track 1 later samples the other color (e.g. an occluding
        // opponent fills the crop): its label must not flip.
        let late_blue = solid_frame(1, [30, 30, 220]);
        clf.observe(1, ObjectClass::Player, &FULL, &late_blue);
        assert_eq!(clf.label(1), before);
    }

    #[test]
    fn test_unassigned_track_resolves_from_later_samples() {
        let mut clf = classifier();
        let grey = solid_frame(0, [128, 128, 128]);

        for id in 1..=6u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &solid_frame(0, [220, 30, 30]));
        }
        for id in 7..=12u64 {
            clf.observe(id, ObjectClass::Player, &FULL, &solid_frame(0, [30, 30, 220]));
        }
        // Track 13's first read is a shadowed grey blur.
        clf.observe(13, ObjectClass::Player, &FULL, &grey);
        clf.fit();
        assert_eq!(clf.label(13), TeamLabel::Unassigned);

        // Two clean red reads later: the label is inherited
        // retroactively without refitting.
        clf.observe(13, ObjectClass::Player, &FULL, &solid_frame(1, [220, 30, 30]));
        clf.observe(13, ObjectClass::Player, &FULL, &solid_frame(2, [220, 30, 30]));
        assert_eq!(clf.label(13), clf.label(1));
    }

    #[test]
    fn test_sample_majority_ignores_ambiguous_votes() {
        let centroids: [Feature; 2] = [[100.0, 0.0, 80.0], [-100.0, 0.0, 80.0]];
        let samples: Vec<Feature> = vec![
            [90.0, 4.0, 80.0],  // clear A
            [82.0, -6.0, 78.0], // clear A
            [-95.0, 2.0, 81.0], // clear B
            [0.0, 0.0, 80.0],   // midway, abstains
        ];
        assert_eq!(
            sample_majority(&samples, &centroids, 0.8),
            Some(TeamLabel::TeamA)
        );

        let tied: Vec<Feature> = vec![[90.0, 0.0, 80.0], [-90.0, 0.0, 80.0]];
        assert_eq!(sample_majority(&tied, &centroids, 0.8), None);
    }

    #[test]
    fn test_goalkeeper_resolved_by_pitch_position() {
        let mut clf = TeamClassifier::new(TeamConfig {
            sample_stride: 1,
            min_samples: 2,
            ..TeamConfig::default()
        });
        // Keeper kit matches neither team.
        let green = solid_frame(0, [40, 220, 40]);

        for f in 0..2u64 {
            let red = solid_frame(f, [220, 30, 30]);
            let blue = solid_frame(f, [30, 30, 220]);
            for id in 1..=4u64 {
                clf.observe(id, ObjectClass::Player, &FULL, &red);
            }
            for id in 5..=8u64 {
                clf.observe(id, ObjectClass::Player, &FULL, &blue);
            }
        }
        clf.observe(9, ObjectClass::Goalkeeper, &FULL, &green);
        clf.fit();
        assert_eq!(clf.label(9), TeamLabel::Unassigned);

        // Red team camps in the left half, blue in the right; the keeper
        // stands in the left goalmouth.
        let mut positions: HashMap<u64, [f64; 2]> = HashMap::new();
        for id in 1..=4u64 {
            positions.insert(id, [25.0 + id as f64, 34.0]);
        }
        for id in 5..=8u64 {
            positions.insert(id, [75.0 + id as f64, 34.0]);
        }
        positions.insert(9, [3.0, 34.0]);
        clf.finalize(&positions);

        assert_eq!(clf.label(9), clf.label(1));
    }
}
