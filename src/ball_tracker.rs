// src/ball_tracker.rs
//
// Single-object ball tracking. At most one active track: each frame the
// incoming ball detection is associated to it when inside the
// motion-predicted gate, otherwise a new track opens. Missed frames are
// bridged by constant-velocity extrapolation up to a bounded horizon,
// after which the track is lost and the next detection starts fresh.
// A FIFO trail of recent positions is kept for the overlay.

use crate::player_tracker::TrackIds;
use crate::types::{BallConfig, Detection};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallObservation {
    /// Position comes from a detection this frame.
    Detected,
    /// Position extrapolated across a detection gap.
    Extrapolated,
    /// No usable position this frame.
    Missing,
}

#[derive(Debug, Clone)]
pub struct BallTrack {
    pub id: u64,
    /// Position as of `position_frame`; extrapolated during gaps.
    pub position: [f32; 2],
    pub position_frame: u64,
    pub velocity: [f32; 2],
    pub consecutive_misses: u32,
    /// Last genuinely observed position, for velocity estimation.
    last_observed: [f32; 2],
    last_hit_frame: u64,
}

impl BallTrack {
    fn predicted(&self, frame_index: u64) -> [f32; 2] {
        let dt = frame_index.saturating_sub(self.position_frame) as f32;
        [
            self.position[0] + self.velocity[0] * dt,
            self.position[1] + self.velocity[1] * dt,
        ]
    }
}

pub struct BallTracker {
    config: BallConfig,
    track: Option<BallTrack>,
    trail: VecDeque<[f32; 2]>,
}

impl BallTracker {
    pub fn new(config: BallConfig) -> Self {
        let cap = config.trail_len;
        Self {
            config,
            track: None,
            trail: VecDeque::with_capacity(cap),
        }
    }

    /// Advance one frame with the frame's (at most one) ball detection.
    /// Returns how this frame's ball position was obtained.
    pub fn update(
        &mut self,
        detection: Option<&Detection>,
        frame_index: u64,
        ids: &mut TrackIds,
    ) -> BallObservation {
        match detection {
            Some(det) => {
                let center = det.center();
                let gated_to_track = match &self.track {
                    Some(track) => {
                        let p = track.predicted(frame_index);
                        let dist =
                            ((center[0] - p[0]).powi(2) + (center[1] - p[1]).powi(2)).sqrt();
                        dist <= self.config.gate_radius_px
                    }
                    None => false,
                };

                if gated_to_track {
                    let track = self.track.as_mut().unwrap();
                    let dt = frame_index.saturating_sub(track.last_hit_frame) as f32;
                    if dt > 0.0 {
                        track.velocity = [
                            (center[0] - track.last_observed[0]) / dt,
                            (center[1] - track.last_observed[1]) / dt,
                        ];
                    }
                    track.position = center;
                    track.position_frame = frame_index;
                    track.last_observed = center;
                    track.last_hit_frame = frame_index;
                    track.consecutive_misses = 0;
                } else {
                    // Outside the gate (or no track): previous identity
                    // does not survive, open a new one.
                    let id = ids.allocate();
                    debug!("ball track {} opened at [{:.0},{:.0}]", id, center[0], center[1]);
                    self.track = Some(BallTrack {
                        id,
                        position: center,
                        position_frame: frame_index,
                        velocity: [0.0, 0.0],
                        consecutive_misses: 0,
                        last_observed: center,
                        last_hit_frame: frame_index,
                    });
                    self.trail.clear();
                }
                self.push_trail(center);
                BallObservation::Detected
            }
            None => {
                let Some(track) = self.track.as_mut() else {
                    return BallObservation::Missing;
                };
                track.consecutive_misses += 1;
                if track.consecutive_misses > self.config.max_extrapolation_frames {
                    debug!("ball track {} lost", track.id);
                    self.track = None;
                    return BallObservation::Missing;
                }
                // Bridge the gap on recent velocity.
                track.position = track.predicted(frame_index);
                track.position_frame = frame_index;
                let p = track.position;
                self.push_trail(p);
                BallObservation::Extrapolated
            }
        }
    }

    fn push_trail(&mut self, position: [f32; 2]) {
        if self.trail.len() == self.config.trail_len {
            self.trail.pop_front();
        }
        self.trail.push_back(position);
    }

    pub fn track(&self) -> Option<&BallTrack> {
        self.track.as_ref()
    }

    pub fn position(&self) -> Option<[f32; 2]> {
        self.track.as_ref().map(|t| t.position)
    }

    /// Trail positions oldest-first.
    pub fn trail(&self) -> impl Iterator<Item = [f32; 2]> + '_ {
        self.trail.iter().copied()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }
}
