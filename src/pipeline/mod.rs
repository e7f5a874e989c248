// src/pipeline/mod.rs
//
// Orchestration. The detector stage runs ahead on its own thread and
// hands frames to the sequential stages through bounded channels, so
// long videos get pipelining without unbounded memory growth. The
// tracker, classifier, mapper and aggregator all run on the calling
// thread in strict frame order: one logical writer owns every piece of
// mutable state.

mod frame_context;
mod metrics;

pub use frame_context::FrameContext;
pub use metrics::{MetricsSummary, PipelineMetrics};

use crate::aggregator::{Analysis, BallRecord, FrameRecord, ObjectRecord, TrajectoryAggregator};
use crate::ball_tracker::BallTracker;
use crate::error::PipelineError;
use crate::field_model::FieldModel;
use crate::ingest::DetectionIngest;
use crate::perspective_mapper::{HomographyValidity, PerspectiveMapper};
use crate::player_tracker::{PlayerTracker, TrackIds};
use crate::team_classifier::TeamClassifier;
use crate::types::{Config, Frame, RawDetections, TeamLabel, VideoMeta};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The detector contract: one call per frame, returning the raw output
/// of the three detector families.
/// Implementations handle their own failures; a frame they cannot
/// process yields an empty output.
pub trait FrameDetector: Send {
    fn detect(&mut self, frame: &Frame) -> RawDetections;
}

/// Cooperative cancellation. Raising it stops the feed; statistics
/// computed up to the last fully processed frame are flushed, not
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct RunOptions {
    /// Skip frames with index below this.
    pub start_frame: u64,
    /// Process at most this many frames.
    pub max_frames: Option<u64>,
    /// On a fatal error, attach whatever was computed to the error
    /// instead of discarding it.
    pub best_effort: bool,
    pub abort: Option<AbortHandle>,
    /// Called with the processed-frame count every `progress_every`
    /// frames.
    pub progress: Option<Box<dyn FnMut(u64)>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            start_frame: 0,
            max_frames: None,
            best_effort: false,
            abort: None,
            progress: None,
        }
    }
}

pub struct AnalysisPipeline {
    config: Config,
    field: Arc<FieldModel>,
}

impl AnalysisPipeline {
    pub fn new(config: Config, field: FieldModel) -> Self {
        Self {
            config,
            field: Arc::new(field),
        }
    }

    /// Analyze a video end-to-end. `frames` must arrive in ascending
    /// index order; the caller decodes them and owns all I/O.
    pub fn run<D, I>(
        &self,
        detector: D,
        frames: I,
        video: VideoMeta,
        mut opts: RunOptions,
    ) -> Result<Analysis, PipelineError>
    where
        D: FrameDetector,
        I: IntoIterator<Item = Frame>,
        I::IntoIter: Send,
    {
        let abort = opts.abort.clone().unwrap_or_default();
        let budget = Duration::from_millis(self.config.pipeline.detector_budget_ms);
        let capacity = self.config.pipeline.channel_capacity.max(2);
        let progress_every = self.config.pipeline.progress_every.max(1);

        let mut state = RunState::new(&self.config, self.field.clone(), video);
        let mut aborted = false;

        thread::scope(|s| {
            // Frame metadata goes out before detection starts, so the
            // consumer can enforce the per-frame budget even when the
            // detector never comes back.
            let (meta_tx, meta_rx) = bounded::<(u64, f64)>(capacity);
            let (result_tx, result_rx) = bounded::<(Frame, RawDetections)>(capacity);

            let feeder_abort = abort.clone();
            let start_frame = opts.start_frame;
            let max_frames = opts.max_frames;
            let frames = frames.into_iter();
            let mut detector = detector;
            s.spawn(move || {
                let mut taken = 0u64;
                for frame in frames {
                    if feeder_abort.is_aborted() {
                        break;
                    }
                    if frame.index < start_frame {
                        continue;
                    }
                    if let Some(max) = max_frames {
                        if taken >= max {
                            break;
                        }
                    }
                    taken += 1;
                    if meta_tx.send((frame.index, frame.timestamp_ms)).is_err() {
                        break;
                    }
                    let raw = detector.detect(&frame);
                    if result_tx.send((frame, raw)).is_err() {
                        break;
                    }
                }
            });

            loop {
                if abort.is_aborted() {
                    aborted = true;
                    info!(
                        "abort requested, flushing after {} frames",
                        state.aggregator.frames_processed()
                    );
                    break;
                }

                let Ok((frame_index, timestamp_ms)) = meta_rx.recv() else {
                    break;
                };

                // The detection stage gets a bounded wait; past it the
                // frame is processed with zero detections and the late
                // result is discarded when it eventually surfaces.
                let ctx = loop {
                    match result_rx.recv_timeout(budget) {
                        Ok((frame, raw)) if frame.index == frame_index => {
                            break state.build_context(frame, raw);
                        }
                        Ok((stale, _)) => {
                            debug!("discarding late detector result for frame {}", stale.index);
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(
                                "detector exceeded {} ms on frame {}, treating as empty",
                                budget.as_millis(),
                                frame_index
                            );
                            state.metrics.inc(&state.metrics.detector_timeouts);
                            break FrameContext::empty(frame_index, timestamp_ms);
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            break FrameContext::empty(frame_index, timestamp_ms);
                        }
                    }
                };

                state.step(ctx);

                let processed = state.aggregator.frames_processed();
                if processed % progress_every == 0 {
                    if let Some(cb) = opts.progress.as_mut() {
                        cb(processed);
                    }
                }
            }

            // Unblock the feeder if it is mid-send.
            drop(meta_rx);
            drop(result_rx);
        });

        let frames_processed = state.aggregator.frames_processed();
        if frames_processed == 0 && !aborted {
            return Err(PipelineError::EmptyVideo);
        }
        if state.total_detections == 0 && frames_processed > 0 {
            let partial = opts
                .best_effort
                .then(|| Box::new(state.finish(aborted)));
            return Err(PipelineError::EmptyDetectorStream {
                frames: frames_processed,
                partial,
            });
        }

        Ok(state.finish(aborted))
    }
}

/// All per-run mutable state, owned by the single sequential writer.
struct RunState {
    video: VideoMeta,
    ingest: DetectionIngest,
    ids: TrackIds,
    players: PlayerTracker,
    ball: BallTracker,
    team: TeamClassifier,
    mapper: PerspectiveMapper,
    aggregator: TrajectoryAggregator,
    metrics: PipelineMetrics,
    records: Vec<FrameRecord>,
    total_detections: u64,
}

impl RunState {
    fn new(config: &Config, field: Arc<FieldModel>, video: VideoMeta) -> Self {
        Self {
            video,
            ingest: DetectionIngest::new(config.ingest.clone()),
            ids: TrackIds::new(),
            players: PlayerTracker::new(config.tracker.clone(), video.width as f32),
            ball: BallTracker::new(config.ball.clone()),
            team: TeamClassifier::new(config.team.clone()),
            mapper: PerspectiveMapper::new(config.mapper.clone(), field.clone()),
            aggregator: TrajectoryAggregator::new(config.aggregator.clone(), field, video.fps),
            metrics: PipelineMetrics::new(),
            records: Vec::new(),
            total_detections: 0,
        }
    }

    fn build_context(&self, frame: Frame, raw: RawDetections) -> FrameContext {
        let detections =
            self.ingest
                .ingest(raw, self.video.width as f32, self.video.height as f32);
        FrameContext {
            frame_index: frame.index,
            timestamp_ms: frame.timestamp_ms,
            pixels: Some(frame),
            detections,
        }
    }

    /// The sequential stages for one frame, in data-flow order:
    /// tracker, classifier, mapper, aggregator.
    fn step(&mut self, ctx: FrameContext) {
        let frame_index = ctx.frame_index;
        self.metrics.inc(&self.metrics.frames);
        self.metrics
            .add(&self.metrics.object_detections, ctx.detections.objects.len() as u64);
        if ctx.detections.ball.is_some() {
            self.metrics.inc(&self.metrics.ball_detections);
        }
        self.metrics.add(
            &self.metrics.keypoint_detections,
            ctx.detections.keypoints.len() as u64,
        );
        self.total_detections += ctx.detection_count() as u64;

        self.players
            .update(&ctx.detections.objects, frame_index, &mut self.ids);
        self.ball
            .update(ctx.detections.ball.as_ref(), frame_index, &mut self.ids);

        // Jersey sampling wants pixels; a budget-demoted frame has none,
        // which is fine since it also has no fresh boxes to sample.
        if let Some(frame) = &ctx.pixels {
            for track in self.players.tracks() {
                if track.is_confirmed() && track.misses == 0 {
                    self.team.observe(track.id, track.class, &track.bbox, frame);
                }
            }
            self.team.maybe_fit(frame_index);
        }

        let fh = self.mapper.update(&ctx.detections.keypoints, frame_index);
        let counter = match fh.validity {
            HomographyValidity::Valid => &self.metrics.homography_valid,
            HomographyValidity::ReusedStale => &self.metrics.homography_reused,
            HomographyValidity::Invalid => &self.metrics.homography_invalid,
        };
        self.metrics.inc(counter);

        let objects: Vec<ObjectRecord> = self
            .players
            .confirmed_tracks()
            .map(|t| ObjectRecord {
                track_id: t.id,
                class: t.class,
                team: self.team.label(t.id),
                bbox: t.bbox,
                pitch: fh.project(t.bottom_center()),
            })
            .collect();

        let ball = self.ball.track().map(|bt| BallRecord {
            track_id: bt.id,
            pixel: bt.position,
            pitch: fh.project(bt.position),
            trail: self.ball.trail().collect(),
        });

        let record = FrameRecord {
            frame_index,
            homography: fh.validity,
            objects,
            ball,
        };
        self.aggregator.ingest_frame(&record);
        self.records.push(record);
    }

    /// Resolve final team labels, backfill them into the overlay
    /// stream, and flush the summary.
    fn finish(mut self, aborted: bool) -> Analysis {
        self.team.finalize(&self.aggregator.mean_positions());
        let labels = self.team.labels();

        for record in &mut self.records {
            for obj in &mut record.objects {
                if obj.team == TeamLabel::Unassigned {
                    if let Some(label) = labels.get(&obj.track_id) {
                        obj.team = *label;
                    }
                }
            }
        }

        self.metrics
            .add(&self.metrics.tracks_created, self.ids.allocated());
        let summary = self.aggregator.finish(&labels, aborted);
        if let Ok(json) = serde_json::to_string(&self.metrics.summary()) {
            info!("run metrics: {}", json);
        }

        Analysis {
            frames: self.records,
            summary,
        }
    }
}
