//! The recognition loop: one explicit `while` loop on a dedicated thread.
//!
//! Each tick takes the newest frame, runs it through preprocess, inference,
//! decode, mapping and validation, and appends any confirmed symbol to the
//! result stream. A failing tick is logged and skipped. Commands from other
//! threads are drained at the top of every iteration so that validation
//! state is only ever touched here.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use serde::Serialize;
use sign_capture::{CaptureError, Frame, FrameFormat, StreamHandle};
use sign_core::{
    CoordinateMapper, DecodeParams, FramePreprocessor, InferenceBackend, LabelVocabulary,
    ModelHandle, PixelLayout, ResultEvent, ResultStream, TensorLedger, decode,
    tensor::LedgerSnapshot,
    validation::{FinishRejected, Observation, Strategy, TargetSpec},
};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::recognition::telemetry;

/// How long a frame wait blocks before re-checking cancellation.
const FRAME_POLL: Duration = Duration::from_millis(100);

/// Shared stop flag checked at the top of every loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type FinishReply = Result<ResultEvent, FinishRejected>;

/// Requests from outside the loop thread.
pub enum LoopCommand {
    /// Ask the active strategy to confirm the current target.
    Finish { reply: Sender<FinishReply> },
    /// Replace the target and reset accumulated validation state.
    SetTarget(TargetSpec),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("recognition loop is no longer running")]
    Closed,
    #[error(transparent)]
    Rejected(#[from] FinishRejected),
}

/// Handle for steering a running loop from another thread.
#[derive(Clone)]
pub struct LoopControl {
    commands: Sender<LoopCommand>,
    cancel: CancellationToken,
}

impl LoopControl {
    /// Finish the current exercise, blocking until the loop answers.
    pub fn finish(&self) -> Result<ResultEvent, ControlError> {
        let (reply, answer) = bounded(1);
        self.commands
            .send(LoopCommand::Finish { reply })
            .map_err(|_| ControlError::Closed)?;
        Ok(answer.recv().map_err(|_| ControlError::Closed)??)
    }

    pub fn set_target(&self, target: TargetSpec) -> Result<(), ControlError> {
        self.commands
            .send(LoopCommand::SetTarget(target))
            .map_err(|_| ControlError::Closed)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    Cancelled,
    CaptureClosed,
}

/// Summary returned when the loop exits.
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    /// Ticks that completed every stage.
    pub ticks: u64,
    /// Ticks abandoned because a stage failed.
    pub skipped_ticks: u64,
    /// Stale frames discarded in favour of newer ones.
    pub dropped_frames: u64,
    /// Ticks that ended with tensors still alive.
    pub unbalanced_ticks: u64,
    pub stop_reason: StopReason,
    pub results: Vec<ResultEvent>,
    #[serde(skip)]
    pub ledger: LedgerSnapshot,
}

/// Knobs the loop needs beyond its collaborators.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub decode: DecodeParams,
    pub display_width: u32,
    pub display_height: u32,
    /// Minimum spacing between tick starts; `None` runs as fast as frames arrive.
    pub tick_interval: Option<Duration>,
    pub verbose: bool,
}

enum NextFrame {
    Frame(Frame),
    Idle,
    Closed,
}

pub struct RecognitionLoop<B: InferenceBackend> {
    model: ModelHandle<B>,
    vocabulary: LabelVocabulary,
    stream: StreamHandle,
    preprocessor: FramePreprocessor,
    mapper: CoordinateMapper,
    strategy: Strategy,
    results: ResultStream,
    ledger: Arc<TensorLedger>,
    settings: LoopSettings,
    commands: Receiver<LoopCommand>,
    cancel: CancellationToken,
    started: Instant,
    dropped_frames: u64,
}

impl<B: InferenceBackend + 'static> RecognitionLoop<B> {
    /// Wire a loaded model and a running stream into a loop, returning the
    /// loop and the control handle for it.
    ///
    /// Mirroring follows the stream: front-facing streams are flipped on
    /// the way to display space.
    pub fn new(
        model: ModelHandle<B>,
        vocabulary: LabelVocabulary,
        stream: StreamHandle,
        strategy: Strategy,
        ledger: Arc<TensorLedger>,
        settings: LoopSettings,
    ) -> (Self, LoopControl) {
        let (tx, rx) = unbounded();
        let cancel = CancellationToken::new();
        let input_size = model.input_size();
        let mapper = CoordinateMapper::new(
            input_size,
            settings.display_width,
            settings.display_height,
            stream.mirrored(),
        );

        let recognition = Self {
            model,
            vocabulary,
            stream,
            preprocessor: FramePreprocessor::new(input_size, Arc::clone(&ledger)),
            mapper,
            strategy,
            results: ResultStream::new(),
            ledger,
            settings,
            commands: rx,
            cancel: cancel.clone(),
            started: Instant::now(),
            dropped_frames: 0,
        };
        let control = LoopControl {
            commands: tx,
            cancel,
        };
        (recognition, control)
    }

    /// Register consumers before the loop starts.
    pub fn results(&mut self) -> &mut ResultStream {
        &mut self.results
    }

    /// Run on a named thread that inherits the current tracing dispatcher.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<LoopReport>> {
        telemetry::spawn_thread("recognition-loop", move || self.run())
    }

    /// Run until cancelled or until the capture stream closes.
    pub fn run(mut self) -> LoopReport {
        let span = info_span!(
            "recognition.loop",
            mode = self.strategy.name(),
            vocabulary = self.vocabulary.name(),
            mirrored = self.stream.mirrored(),
        );
        let _span_guard = span.enter();
        info!(
            "Recognition loop started ({} mode, {} labels)",
            self.strategy.name(),
            self.vocabulary.len()
        );

        let mut frame_number: u64 = 0;
        let mut ticks: u64 = 0;
        let mut skipped_ticks: u64 = 0;
        let mut unbalanced_ticks: u64 = 0;

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            self.drain_commands();

            let tick_start = Instant::now();
            let frame = match self.next_frame() {
                NextFrame::Frame(frame) => frame,
                NextFrame::Idle => continue,
                NextFrame::Closed => break StopReason::CaptureClosed,
            };
            frame_number = frame_number.wrapping_add(1);

            let before = self.ledger.snapshot();
            let outcome = info_span!("tick", frame = frame_number).in_scope(|| self.tick(&frame));
            drop(frame);

            match outcome {
                Ok(()) => {
                    ticks += 1;
                    metrics::counter!("signcam_ticks_total").increment(1);
                }
                Err(err) => {
                    skipped_ticks += 1;
                    metrics::counter!("signcam_ticks_skipped_total").increment(1);
                    warn!("Skipping tick #{frame_number}: {err:#}");
                }
            }

            let delta = self.ledger.snapshot().since(before);
            if delta.allocated != delta.released {
                unbalanced_ticks += 1;
                warn!(
                    "Tick #{frame_number} left {} tensors alive",
                    delta.allocated.saturating_sub(delta.released)
                );
            }
            metrics::histogram!("signcam_tick_latency_seconds", "stage" => "total")
                .record(tick_start.elapsed().as_secs_f64());

            if let Some(interval) = self.settings.tick_interval {
                if let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
                    thread::sleep(remaining);
                }
            }
        };

        info!("Recognition loop stopping ({stop_reason:?}) after {frame_number} frames");
        self.stream.stop();
        let ledger = self.ledger.snapshot();
        self.model.release();

        LoopReport {
            ticks,
            skipped_ticks,
            dropped_frames: self.dropped_frames,
            unbalanced_ticks,
            stop_reason,
            results: self.results.into_history(),
            ledger,
        }
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(LoopCommand::Finish { reply }) => {
                    let answer = self
                        .strategy
                        .try_finish()
                        .map(|emission| self.results.append(emission.symbol, emission.confidence).clone());
                    if let Err(rejected) = &answer {
                        info!("Finish rejected: {rejected}");
                    }
                    let _ = reply.send(answer);
                }
                Ok(LoopCommand::SetTarget(target)) => {
                    info!("Switching target to {:?}", target.expected_label);
                    self.strategy.set_target(target);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Block for a frame, then skip to the newest one already queued.
    fn next_frame(&mut self) -> NextFrame {
        let frames = self.stream.frames();
        let mut latest = match frames.recv_timeout(FRAME_POLL) {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                report_capture_error(&err);
                return NextFrame::Idle;
            }
            Err(RecvTimeoutError::Timeout) => return NextFrame::Idle,
            Err(RecvTimeoutError::Disconnected) => return NextFrame::Closed,
        };

        let mut skipped = 0u64;
        while let Ok(item) = frames.try_recv() {
            match item {
                Ok(newer) => {
                    latest = newer;
                    skipped += 1;
                }
                Err(err) => report_capture_error(&err),
            }
        }
        if skipped > 0 {
            self.dropped_frames += skipped;
            metrics::counter!("signcam_capture_dropped_frames_total").increment(skipped);
            if self.settings.verbose {
                debug!("Dropped {skipped} stale frames");
            }
        }
        NextFrame::Frame(latest)
    }

    /// preprocess → infer → decode → map → validate → emit.
    ///
    /// Every tensor is scoped to this call, so an early `?` still releases.
    fn tick(&mut self, frame: &Frame) -> Result<()> {
        let layout = match frame.format {
            FrameFormat::Bgr8 => PixelLayout::Bgr8,
            FrameFormat::Rgb8 => PixelLayout::Rgb8,
        };

        let stage = Instant::now();
        let input = self
            .preprocessor
            .prepare(&frame.data, frame.width, frame.height, layout)
            .context("preprocess failed")?;
        record_stage("preprocess", stage);

        let stage = Instant::now();
        let raw = self
            .model
            .forward(&input, &self.ledger)
            .context("inference failed")?;
        drop(input);
        record_stage("inference", stage);

        let stage = Instant::now();
        let detections = decode(&raw, &self.vocabulary, &self.settings.decode)
            .context("decode failed")?;
        drop(raw);
        let detections = self.mapper.map_all(&detections);
        record_stage("decode", stage);

        if self.settings.verbose {
            for det in &detections {
                debug!(
                    label = %det.label,
                    score = det.score,
                    "bbox ({:.0}, {:.0}) {:.0}x{:.0}",
                    det.bbox.x,
                    det.bbox.y,
                    det.bbox.width,
                    det.bbox.height
                );
            }
        }

        let stage = Instant::now();
        let verdict = self.strategy.observe(&Observation {
            detections: &detections,
            display_width: self.settings.display_width as f32,
            display_height: self.settings.display_height as f32,
            now_ms: self.started.elapsed().as_millis() as u64,
        });
        if let Some(emission) = verdict.emission {
            self.results.append(emission.symbol, emission.confidence);
        }
        record_stage("validate", stage);
        Ok(())
    }
}

fn record_stage(stage: &'static str, started: Instant) {
    metrics::histogram!("signcam_tick_latency_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
}

fn report_capture_error(err: &CaptureError) {
    warn!("Capture error: {err}");
}
