// src/aggregator.rs
//
// Consumes labeled, mapped trajectories and turns them into run-level
// statistics: distance and speed per player, ball possession per team,
// and positional heatmaps. Also defines the per-frame overlay record
// handed to the external renderer. No rendering happens here.

use crate::field_model::FieldModel;
use crate::perspective_mapper::HomographyValidity;
use crate::types::{AggregatorConfig, ObjectClass, TeamLabel};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// OVERLAY RECORDS (pipeline output)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub track_id: u64,
    pub class: ObjectClass,
    pub team: TeamLabel,
    pub bbox: [f32; 4],
    /// Pitch position in metres; None when the frame was unmapped.
    pub pitch: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallRecord {
    pub track_id: u64,
    pub pixel: [f32; 2],
    pub pitch: Option<[f64; 2]>,
    /// Recent positions oldest-first, bounded by the trail length.
    pub trail: Vec<[f32; 2]>,
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub homography: HomographyValidity,
    pub objects: Vec<ObjectRecord>,
    pub ball: Option<BallRecord>,
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub track_id: u64,
    pub class: ObjectClass,
    pub team: TeamLabel,
    pub mapped_frames: u64,
    pub distance_m: f64,
    pub avg_speed_mps: f64,
    pub top_speed_mps: f64,
    pub possession_frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team: TeamLabel,
    pub distance_m: f64,
    /// Distance over the summed time its players were mapped.
    pub avg_speed_mps: f64,
    pub possession_frames: u64,
    pub possession_seconds: f64,
    pub heatmap: Array2<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames_processed: u64,
    pub ball_visible_frames: u64,
    pub aborted: bool,
    pub players: Vec<PlayerSummary>,
    pub teams: Vec<TeamSummary>,
}

/// Full pipeline output: the per-frame overlay stream plus the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub frames: Vec<FrameRecord>,
    pub summary: RunSummary,
}

// ============================================================================
// AGGREGATOR
// ============================================================================

#[derive(Debug)]
struct TrackStats {
    class: ObjectClass,
    mapped_frames: u64,
    last_pitch: Option<([f64; 2], u64)>,
    distance_m: f64,
    top_speed_mps: f64,
    pitch_sum: [f64; 2],
    possession_frames: u64,
    heatmap: Array2<u32>,
}

impl TrackStats {
    fn new(class: ObjectClass, bins_x: usize, bins_y: usize) -> Self {
        Self {
            class,
            mapped_frames: 0,
            last_pitch: None,
            distance_m: 0.0,
            top_speed_mps: 0.0,
            pitch_sum: [0.0, 0.0],
            possession_frames: 0,
            heatmap: Array2::zeros((bins_y, bins_x)),
        }
    }
}

pub struct TrajectoryAggregator {
    config: AggregatorConfig,
    field: Arc<FieldModel>,
    fps: f64,
    tracks: HashMap<u64, TrackStats>,
    frames_processed: u64,
    ball_visible_frames: u64,
}

impl TrajectoryAggregator {
    pub fn new(config: AggregatorConfig, field: Arc<FieldModel>, fps: f64) -> Self {
        Self {
            config,
            field,
            fps,
            tracks: HashMap::new(),
            frames_processed: 0,
            ball_visible_frames: 0,
        }
    }

    /// Fold one frame's mapped positions into the running statistics.
    pub fn ingest_frame(&mut self, record: &FrameRecord) {
        self.frames_processed += 1;

        let bins_x = self.config.heatmap_bins_x;
        let bins_y = self.config.heatmap_bins_y;

        for obj in &record.objects {
            let stats = self
                .tracks
                .entry(obj.track_id)
                .or_insert_with(|| TrackStats::new(obj.class, bins_x, bins_y));

            let Some(pitch) = obj.pitch else {
                continue;
            };

            stats.mapped_frames += 1;
            stats.pitch_sum[0] += pitch[0];
            stats.pitch_sum[1] += pitch[1];

            if let Some((prev, prev_frame)) = stats.last_pitch {
                let dt_frames = record.frame_index.saturating_sub(prev_frame).max(1);
                let step =
                    ((pitch[0] - prev[0]).powi(2) + (pitch[1] - prev[1]).powi(2)).sqrt();
                let per_frame = step / dt_frames as f64;
                if per_frame <= self.config.max_step_m {
                    stats.distance_m += step;
                    let speed = per_frame * self.fps;
                    if speed > stats.top_speed_mps {
                        stats.top_speed_mps = speed;
                    }
                } else {
                    debug!(
                        "track {} jumped {:.1} m in {} frame(s), ignored",
                        obj.track_id, step, dt_frames
                    );
                }
            }
            stats.last_pitch = Some((pitch, record.frame_index));

            if self.field.contains(pitch, 1.0) {
                let bx = ((pitch[0] / self.field.length_m()) * bins_x as f64)
                    .floor()
                    .clamp(0.0, (bins_x - 1) as f64) as usize;
                let by = ((pitch[1] / self.field.width_m()) * bins_y as f64)
                    .floor()
                    .clamp(0.0, (bins_y - 1) as f64) as usize;
                stats.heatmap[(by, bx)] += 1;
            }
        }

        if let Some(ball) = &record.ball {
            self.ball_visible_frames += 1;
            if let Some(ball_pitch) = ball.pitch {
                self.attribute_possession(record, ball_pitch);
            }
        }
    }

    /// Possession goes to the nearest field player within the radius.
    /// Referees never hold possession; team resolution happens at
    /// summary time from the final labels.
    fn attribute_possession(&mut self, record: &FrameRecord, ball_pitch: [f64; 2]) {
        let mut best: Option<(u64, f64)> = None;
        for obj in &record.objects {
            if !obj.class.is_team_candidate() {
                continue;
            }
            let Some(p) = obj.pitch else { continue };
            let d = ((p[0] - ball_pitch[0]).powi(2) + (p[1] - ball_pitch[1]).powi(2)).sqrt();
            if d <= self.config.possession_radius_m
                && best.map(|(_, bd)| d < bd).unwrap_or(true)
            {
                best = Some((obj.track_id, d));
            }
        }
        if let Some((id, _)) = best {
            if let Some(stats) = self.tracks.get_mut(&id) {
                stats.possession_frames += 1;
            }
        }
    }

    /// Mean pitch position per track, for the goalkeeper fallback.
    pub fn mean_positions(&self) -> HashMap<u64, [f64; 2]> {
        self.tracks
            .iter()
            .filter(|(_, s)| s.mapped_frames > 0)
            .map(|(&id, s)| {
                let n = s.mapped_frames as f64;
                (id, [s.pitch_sum[0] / n, s.pitch_sum[1] / n])
            })
            .collect()
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Flush the accumulated statistics into the run summary. Team
    /// aggregates ignore referees and Unassigned tracks.
    pub fn finish(&self, labels: &HashMap<u64, TeamLabel>, aborted: bool) -> RunSummary {
        let bins = (self.config.heatmap_bins_y, self.config.heatmap_bins_x);
        let empty_team = |team| TeamSummary {
            team,
            distance_m: 0.0,
            avg_speed_mps: 0.0,
            possession_frames: 0,
            possession_seconds: 0.0,
            heatmap: Array2::zeros(bins),
        };
        let mut team_a = empty_team(TeamLabel::TeamA);
        let mut team_b = empty_team(TeamLabel::TeamB);
        let mut team_mapped_frames = [0u64; 2];
        let mut players: Vec<PlayerSummary> = Vec::new();

        for (&id, stats) in &self.tracks {
            let team = if stats.class.is_team_candidate() {
                labels.get(&id).copied().unwrap_or(TeamLabel::Unassigned)
            } else {
                TeamLabel::Unassigned
            };

            let seconds = stats.mapped_frames as f64 / self.fps;
            players.push(PlayerSummary {
                track_id: id,
                class: stats.class,
                team,
                mapped_frames: stats.mapped_frames,
                distance_m: stats.distance_m,
                avg_speed_mps: if seconds > 0.0 {
                    stats.distance_m / seconds
                } else {
                    0.0
                },
                top_speed_mps: stats.top_speed_mps,
                possession_frames: stats.possession_frames,
            });

            let (entry, mapped) = match team {
                TeamLabel::TeamA => (&mut team_a, &mut team_mapped_frames[0]),
                TeamLabel::TeamB => (&mut team_b, &mut team_mapped_frames[1]),
                TeamLabel::Unassigned => continue,
            };
            entry.distance_m += stats.distance_m;
            entry.possession_frames += stats.possession_frames;
            entry.heatmap += &stats.heatmap;
            *mapped += stats.mapped_frames;
        }

        for (team, mapped) in [&mut team_a, &mut team_b].into_iter().zip(team_mapped_frames) {
            team.possession_seconds = team.possession_frames as f64 / self.fps;
            let seconds = mapped as f64 / self.fps;
            if seconds > 0.0 {
                team.avg_speed_mps = team.distance_m / seconds;
            }
        }
        players.sort_by_key(|p| p.track_id);

        RunSummary {
            frames_processed: self.frames_processed,
            ball_visible_frames: self.ball_visible_frames,
            aborted,
            players,
            teams: vec![team_a, team_b],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS: f64 = 25.0;

    fn aggregator() -> TrajectoryAggregator {
        TrajectoryAggregator::new(
            AggregatorConfig::default(),
            Arc::new(FieldModel::standard()),
            FPS,
        )
    }

    fn obj(track_id: u64, class: ObjectClass, pitch: Option<[f64; 2]>) -> ObjectRecord {
        ObjectRecord {
            track_id,
            class,
            team: TeamLabel::Unassigned,
            bbox: [0.0, 0.0, 10.0, 20.0],
            pitch,
        }
    }

    fn frame(index: u64, objects: Vec<ObjectRecord>, ball: Option<BallRecord>) -> FrameRecord {
        FrameRecord {
            frame_index: index,
            homography: HomographyValidity::Valid,
            objects,
            ball,
        }
    }

    #[test]
    fn test_distance_and_speed() {
        let mut agg = aggregator();
        // 0.2 m per frame along x for 10 frames = 2.0 m total.
        for f in 0..=10u64 {
            let x = 30.0 + 0.2 * f as f64;
            agg.ingest_frame(&frame(f, vec![obj(1, ObjectClass::Player, Some([x, 34.0]))], None));
        }

        let labels = HashMap::from([(1u64, TeamLabel::TeamA)]);
        let summary = agg.finish(&labels, false);
        let p = &summary.players[0];
        assert!((p.distance_m - 2.0).abs() < 1e-9);
        // 0.2 m/frame at 25 fps = 5 m/s.
        assert!((p.top_speed_mps - 5.0).abs() < 1e-9);
        assert_eq!(p.mapped_frames, 11);

        let team_a = &summary.teams[0];
        assert!((team_a.distance_m - 2.0).abs() < 1e-9);
        // 2.0 m over 11 frames of mapped time.
        assert!((team_a.avg_speed_mps - 2.0 / (11.0 / FPS)).abs() < 1e-9);
    }

    #[test]
    fn test_teleport_dropped_from_distance() {
        let mut agg = aggregator();
        agg.ingest_frame(&frame(0, vec![obj(1, ObjectClass::Player, Some([30.0, 34.0]))], None));
        agg.ingest_frame(&frame(1, vec![obj(1, ObjectClass::Player, Some([30.3, 34.0]))], None));
        // Homography jump: 40 m in one frame.
        agg.ingest_frame(&frame(2, vec![obj(1, ObjectClass::Player, Some([70.3, 34.0]))], None));
        agg.ingest_frame(&frame(3, vec![obj(1, ObjectClass::Player, Some([70.6, 34.0]))], None));

        let summary = agg.finish(&HashMap::new(), false);
        let p = &summary.players[0];
        assert!((p.distance_m - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_unmapped_frames_skipped() {
        let mut agg = aggregator();
        agg.ingest_frame(&frame(0, vec![obj(1, ObjectClass::Player, Some([30.0, 34.0]))], None));
        agg.ingest_frame(&frame(1, vec![obj(1, ObjectClass::Player, None)], None));
        agg.ingest_frame(&frame(2, vec![obj(1, ObjectClass::Player, Some([30.4, 34.0]))], None));

        let summary = agg.finish(&HashMap::new(), false);
        let p = &summary.players[0];
        assert_eq!(p.mapped_frames, 2);
        // The 0.4 m step across the gap still counts (0.2 m per frame).
        assert!((p.distance_m - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_possession_nearest_player_only() {
        let mut agg = aggregator();
        let ball = BallRecord {
            track_id: 9,
            pixel: [500.0, 400.0],
            pitch: Some([50.0, 34.0]),
            trail: vec![],
        };
        let objects = vec![
            obj(1, ObjectClass::Player, Some([51.0, 34.0])), // 1 m away
            obj(2, ObjectClass::Player, Some([54.0, 34.0])), // 4 m away: outside radius anyway
            obj(3, ObjectClass::Referee, Some([50.1, 34.0])), // nearest but a referee
        ];
        agg.ingest_frame(&frame(0, objects, Some(ball)));

        let labels = HashMap::from([
            (1u64, TeamLabel::TeamA),
            (2u64, TeamLabel::TeamB),
        ]);
        let summary = agg.finish(&labels, false);
        let team_a = &summary.teams[0];
        assert_eq!(team_a.team, TeamLabel::TeamA);
        assert_eq!(team_a.possession_frames, 1);
        assert_eq!(summary.teams[1].possession_frames, 0);
        assert!((team_a.possession_seconds - 1.0 / FPS).abs() < 1e-12);
    }

    #[test]
    fn test_unassigned_possession_excluded_from_teams() {
        let mut agg = aggregator();
        let ball = BallRecord {
            track_id: 9,
            pixel: [500.0, 400.0],
            pitch: Some([50.0, 34.0]),
            trail: vec![],
        };
        agg.ingest_frame(&frame(
            0,
            vec![obj(1, ObjectClass::Player, Some([50.5, 34.0]))],
            Some(ball),
        ));

        // Track 1 never resolved to a team.
        let summary = agg.finish(&HashMap::new(), false);
        assert_eq!(summary.teams[0].possession_frames, 0);
        assert_eq!(summary.teams[1].possession_frames, 0);
        // The per-player record still shows it.
        assert_eq!(summary.players[0].possession_frames, 1);
    }

    #[test]
    fn test_heatmap_counts_mapped_positions() {
        let mut agg = aggregator();
        for f in 0..20u64 {
            agg.ingest_frame(&frame(
                f,
                vec![obj(1, ObjectClass::Player, Some([10.0, 10.0]))],
                None,
            ));
        }
        let labels = HashMap::from([(1u64, TeamLabel::TeamA)]);
        let summary = agg.finish(&labels, false);
        let heat = &summary.teams[0].heatmap;
        assert_eq!(heat.sum(), 20);
        // All mass in a single bin.
        assert_eq!(heat.iter().filter(|&&v| v > 0).count(), 1);
    }

    #[test]
    fn test_frame_records_roundtrip_json() {
        let records = vec![
            frame(
                0,
                vec![obj(3, ObjectClass::Player, Some([30.0, 34.0]))],
                Some(BallRecord {
                    track_id: 7,
                    pixel: [510.0, 420.0],
                    pitch: None,
                    trail: vec![[500.0, 400.0], [510.0, 420.0]],
                }),
            ),
            frame(1, vec![obj(3, ObjectClass::Player, None)], None),
        ];

        let json = serde_json::to_string(&records).unwrap();
        let back: Vec<FrameRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].frame_index, 0);
        assert_eq!(back[1].frame_index, 1);
        assert_eq!(back[0].objects[0].track_id, 3);
        assert_eq!(back[0].ball.as_ref().unwrap().track_id, 7);
        assert_eq!(back[0].ball.as_ref().unwrap().trail.len(), 2);
    }
}
