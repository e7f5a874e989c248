// src/error.rs
//
// Error taxonomy for the analysis core. Per-frame conditions (detection
// gaps, missing keypoints, classifier ambiguity) are handled in-pipeline
// and never surface here; only run-level failures do. A user abort is not
// an error either: the pipeline flushes partial statistics and returns
// them as a normal result.

use thiserror::Error;

use crate::aggregator::Analysis;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller supplied no frames at all.
    #[error("empty input: no frames were supplied")]
    EmptyVideo,

    /// Every frame of the run came back without a single detection.
    /// `partial` carries whatever was computed when the caller asked for
    /// best-effort output.
    #[error("detector stream empty: no detections across {frames} frames")]
    EmptyDetectorStream {
        frames: u64,
        partial: Option<Box<Analysis>>,
    },

    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl PipelineError {
    /// Best-effort partial results attached to the failure, if any.
    pub fn into_partial(self) -> Option<Analysis> {
        match self {
            PipelineError::EmptyDetectorStream { partial, .. } => partial.map(|b| *b),
            _ => None,
        }
    }
}
