//! Post-detection analysis core for soccer match video.
//!
//! Consumes per-frame detector output (players/goalkeepers/referees,
//! ball, field keypoints) and produces persistent tracks, team labels,
//! pitch-plane coordinates and run-level statistics. Video decoding,
//! the detector models themselves, and rendering live outside this
//! crate; see [`pipeline::FrameDetector`] for the boundary.

pub mod aggregator;
pub mod ball_tracker;
pub mod config;
pub mod error;
pub mod field_model;
pub mod homography;
pub mod ingest;
pub mod perspective_mapper;
pub mod pipeline;
pub mod player_tracker;
pub mod team_classifier;
pub mod types;

pub use aggregator::{Analysis, FrameRecord, RunSummary};
pub use error::PipelineError;
pub use field_model::FieldModel;
pub use pipeline::{AbortHandle, AnalysisPipeline, FrameDetector, RunOptions};
pub use types::{Config, Detection, FieldKeypoint, Frame, ObjectClass, RawDetections, TeamLabel, VideoMeta};
