// src/player_tracker.rs
//
// Multi-object tracker for players, goalkeepers and referees.
//
// Design:
//   - Two-phase greedy matching: predicted-box IoU first, then a
//     centroid-distance rescue for tracks whose box deformed too much
//     between frames (sprints, tackles, partial occlusion).
//   - Constant-velocity prediction from the last two observed centres.
//   - Explicit lifecycle: Tentative -> Confirmed -> Lost -> Terminated,
//     with Lost -> Confirmed revival inside the re-identification
//     window so a brief occlusion does not fragment the identity.
//   - Track ids come from a shared monotonic allocator and are never
//     reused, including through revival.

use crate::types::{iou, Detection, ObjectClass, TrackerConfig};
use tracing::{debug, info};

/// Monotonic track id source, shared by every tracker in a run so ids
/// are unique across object kinds and strictly ordered by creation.
#[derive(Debug)]
pub struct TrackIds {
    next: u64,
}

impl TrackIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn allocate(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// How many ids have been handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next - 1
    }
}

impl Default for TrackIds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Lost,
    Terminated,
}

/// A persistent identity across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub class: ObjectClass,
    pub state: TrackState,
    /// Last observed box (never extrapolated).
    pub bbox: [f32; 4],
    /// (frame_index, bbox) for every matched frame, in order.
    pub history: Vec<(u64, [f32; 4])>,
    pub consecutive_hits: u32,
    pub misses: u32,
    pub age: u32,
    pub last_confidence: f32,
    pub last_hit_frame: u64,
    /// Centre velocity in px/frame, from the last two observations.
    velocity: [f32; 2],
    /// Class locked at confirmation; detector flicker after that point
    /// is penalized in matching instead of mutating identity.
    locked_class: Option<ObjectClass>,
}

impl Track {
    fn new(id: u64, det: &Detection, frame_index: u64) -> Self {
        Self {
            id,
            class: det.class,
            state: TrackState::Tentative,
            bbox: det.bbox,
            history: vec![(frame_index, det.bbox)],
            consecutive_hits: 1,
            misses: 0,
            age: 1,
            last_confidence: det.confidence,
            last_hit_frame: frame_index,
            velocity: [0.0, 0.0],
            locked_class: None,
        }
    }

    pub fn center(&self) -> [f32; 2] {
        [
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        ]
    }

    /// Ground-contact reference point of the last observation.
    pub fn bottom_center(&self) -> [f32; 2] {
        [(self.bbox[0] + self.bbox[2]) * 0.5, self.bbox[3]]
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn is_active(&self) -> bool {
        self.state != TrackState::Terminated
    }

    /// Box shifted along the track velocity to the query frame.
    pub fn predicted_bbox(&self, frame_index: u64) -> [f32; 4] {
        let dt = frame_index.saturating_sub(self.last_hit_frame) as f32;
        let dx = self.velocity[0] * dt;
        let dy = self.velocity[1] * dt;
        [
            self.bbox[0] + dx,
            self.bbox[1] + dy,
            self.bbox[2] + dx,
            self.bbox[3] + dy,
        ]
    }

    pub fn predicted_center(&self, frame_index: u64) -> [f32; 2] {
        let b = self.predicted_bbox(frame_index);
        [(b[0] + b[2]) * 0.5, (b[1] + b[3]) * 0.5]
    }

    fn update_with_detection(&mut self, det: &Detection, frame_index: u64, cfg: &TrackerConfig) {
        let prev_center = self.center();
        let dt = frame_index.saturating_sub(self.last_hit_frame) as f32;

        self.bbox = det.bbox;
        self.last_confidence = det.confidence;
        self.history.push((frame_index, det.bbox));

        if dt > 0.0 {
            let c = self.center();
            self.velocity = [(c[0] - prev_center[0]) / dt, (c[1] - prev_center[1]) / dt];
        }
        self.last_hit_frame = frame_index;

        self.consecutive_hits += 1;
        self.misses = 0;
        self.age += 1;

        // Identity not locked yet: follow the detector's latest opinion.
        if self.locked_class.is_none() {
            self.class = det.class;
        }

        match self.state {
            TrackState::Tentative => {
                if self.consecutive_hits >= cfg.confirm_frames {
                    self.state = TrackState::Confirmed;
                    self.locked_class = Some(self.class);
                    debug!("track {} confirmed as {}", self.id, self.class.as_str());
                }
            }
            TrackState::Lost => {
                // Re-identification inside the window: same id, same
                // history, back to Confirmed.
                self.state = TrackState::Confirmed;
                self.consecutive_hits = 1;
                info!("track {} re-identified after occlusion", self.id);
            }
            TrackState::Confirmed | TrackState::Terminated => {}
        }
    }

    fn mark_missed(&mut self, cfg: &TrackerConfig) {
        self.misses += 1;
        self.consecutive_hits = 0;
        self.age += 1;

        match self.state {
            TrackState::Tentative => {
                // A candidate that vanishes before confirming was noise.
                if self.misses > cfg.confirm_frames {
                    self.state = TrackState::Terminated;
                }
            }
            TrackState::Confirmed => {
                if self.misses > cfg.lost_after_misses {
                    self.state = TrackState::Lost;
                    debug!("track {} lost after {} misses", self.id, self.misses);
                }
            }
            TrackState::Lost => {
                if self.misses > cfg.terminate_after_misses {
                    self.state = TrackState::Terminated;
                    debug!("track {} terminated", self.id);
                }
            }
            TrackState::Terminated => {}
        }
    }
}

/// IoU penalty applied when a detection's class differs from a track's
/// locked class, so same-class matches win the greedy assignment while a
/// cross-class match is still possible as a last resort (the detector
/// flickers between player and goalkeeper near the box).
const CROSS_CLASS_IOU_PENALTY: f32 = 0.5;

pub struct PlayerTracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    retired: Vec<Track>,
    frame_w: f32,
}

impl PlayerTracker {
    pub fn new(config: TrackerConfig, frame_w: f32) -> Self {
        Self {
            config,
            tracks: Vec::with_capacity(32),
            retired: Vec::new(),
            frame_w,
        }
    }

    /// Advance one frame. `detections` must contain only person classes.
    pub fn update(&mut self, detections: &[Detection], frame_index: u64, ids: &mut TrackIds) {
        let mut track_matched = vec![false; self.tracks.len()];
        let mut det_matched = vec![false; detections.len()];

        // ── Phase 1: predicted-box IoU, greedy best-first ──
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let predicted = track.predicted_bbox(frame_index);
            for (di, det) in detections.iter().enumerate() {
                let mut score = iou(&predicted, &det.bbox);
                if let Some(locked) = track.locked_class {
                    if locked != det.class {
                        score *= CROSS_CLASS_IOU_PENALTY;
                    }
                }
                if score >= self.config.min_iou {
                    pairs.push((ti, di, score));
                }
            }
        }
        pairs.sort_by(|a, b| b.2.total_cmp(&a.2));
        for (ti, di, _) in &pairs {
            if track_matched[*ti] || det_matched[*di] {
                continue;
            }
            track_matched[*ti] = true;
            det_matched[*di] = true;
            self.tracks[*ti].update_with_detection(&detections[*di], frame_index, &self.config);
        }

        // ── Phase 2: centroid rescue for unmatched tracks ──
        // No geometric overlap to validate the match here, so class
        // agreement is required and the distance gate is strict.
        let max_dist = self.frame_w * self.config.max_centroid_distance_ratio;
        let max_dist_sq = max_dist * max_dist;

        let mut rescues: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            if track_matched[ti] || track.misses > self.config.centroid_fallback_max_misses {
                continue;
            }
            let required = track.locked_class.unwrap_or(track.class);
            let pc = track.predicted_center(frame_index);
            for (di, det) in detections.iter().enumerate() {
                if det_matched[di] || det.class != required {
                    continue;
                }
                let dc = det.center();
                let dist_sq = (pc[0] - dc[0]).powi(2) + (pc[1] - dc[1]).powi(2);
                if dist_sq < max_dist_sq {
                    rescues.push((ti, di, dist_sq));
                }
            }
        }
        rescues.sort_by(|a, b| a.2.total_cmp(&b.2));
        for (ti, di, dist_sq) in &rescues {
            if track_matched[*ti] || det_matched[*di] {
                continue;
            }
            track_matched[*ti] = true;
            det_matched[*di] = true;
            debug!(
                "track {} rescued at {:.0}px from predicted centre",
                self.tracks[*ti].id,
                dist_sq.sqrt()
            );
            self.tracks[*ti].update_with_detection(&detections[*di], frame_index, &self.config);
        }

        // ── Unmatched tracks coast; unmatched detections open tracks ──
        for (ti, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[ti].mark_missed(&self.config);
            }
        }
        for (di, matched) in det_matched.iter().enumerate() {
            if !matched {
                let track = Track::new(ids.allocate(), &detections[di], frame_index);
                debug!(
                    "new {} track {} at [{:.0},{:.0}]",
                    track.class.as_str(),
                    track.id,
                    track.center()[0],
                    track.center()[1]
                );
                self.tracks.push(track);
            }
        }

        // ── Retire terminated tracks, keeping them for run output ──
        let mut i = 0;
        while i < self.tracks.len() {
            if self.tracks[i].state == TrackState::Terminated {
                let t = self.tracks.swap_remove(i);
                self.retired.push(t);
            } else {
                i += 1;
            }
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    /// Every track ever created this run, active or retired, in no
    /// particular order.
    pub fn all_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().chain(self.retired.iter())
    }

    pub fn get(&self, id: u64) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }
}
