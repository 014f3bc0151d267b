//! Drives the recognition loop with a scripted backend and an in-memory
//! frame channel.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use sign_capture::{CaptureError, Frame, FrameFormat, StreamHandle};
use sign_core::{
    DecodeParams, HostTensor, InferenceBackend, InferenceError, LabelVocabulary, ModelHandle,
    ModelLoader, ModelSource, TensorLedger, ZoneRect,
    validation::{
        CadenceSampler, FinishRejected, GatedValidator, Strategy, TargetSpec,
    },
};
use signcam::recognition::{
    ControlError, LoopControl, LoopReport, LoopSettings, RecognitionLoop, StopReason,
};

const MODEL_SIZE: u32 = 64;
const ANCHORS: usize = 8;
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Pixel values that select what the scripted backend "sees".
const NOTHING: u8 = 20;
const FAIL: u8 = 60;
const A_OUTSIDE: u8 = 120;
const A_INSIDE: u8 = 220;
const B_INSIDE: u8 = 170;

/// Backend whose output depends on the mean brightness of its input.
///
/// Every forward on a real frame is acknowledged so the test can feed frames
/// one tick at a time.
struct ScriptedBackend {
    classes: usize,
    ack: Sender<()>,
}

impl ScriptedBackend {
    fn output(
        &self,
        ledger: &Arc<TensorLedger>,
        hit: Option<(usize, [f32; 4])>,
    ) -> Result<HostTensor, InferenceError> {
        let channels = 4 + self.classes;
        let mut data = vec![0.0f32; channels * ANCHORS];
        if let Some((class, [cx, cy, w, h])) = hit {
            data[0] = cx;
            data[ANCHORS] = cy;
            data[2 * ANCHORS] = w;
            data[3 * ANCHORS] = h;
            data[(4 + class) * ANCHORS] = 0.9;
        }
        Ok(ledger.allocate(vec![1, channels, ANCHORS], data)?)
    }
}

impl InferenceBackend for ScriptedBackend {
    fn forward(
        &mut self,
        input: &HostTensor,
        ledger: &Arc<TensorLedger>,
    ) -> Result<HostTensor, InferenceError> {
        let mean = input.data().iter().sum::<f32>() / input.len() as f32;
        if mean < 0.01 {
            // warm-up
            return self.output(ledger, None);
        }
        let _ = self.ack.send(());

        let value = (mean * 255.0).round() as u8;
        let centre = [32.0, 32.0, 12.0, 12.0];
        // right edge in model space, left edge once mirrored
        let corner = [60.0, 6.0, 6.0, 6.0];
        match value {
            NOTHING => self.output(ledger, None),
            FAIL => Err(InferenceError::Backend("scripted failure".into())),
            A_OUTSIDE => self.output(ledger, Some((0, corner))),
            A_INSIDE => self.output(ledger, Some((0, centre))),
            B_INSIDE => self.output(ledger, Some((1, centre))),
            other => Err(InferenceError::Backend(format!("unscripted frame value {other}"))),
        }
    }

    fn describe(&self) -> String {
        "scripted backend".into()
    }
}

struct Harness {
    frames: Sender<Result<Frame, CaptureError>>,
    acks: Receiver<()>,
    control: LoopControl,
    ledger: Arc<TensorLedger>,
    handle: thread::JoinHandle<LoopReport>,
    _model_dir: tempfile::TempDir,
}

impl Harness {
    fn start(strategy: Strategy) -> Self {
        Self::start_with(strategy, |_| {})
    }

    fn start_with(
        strategy: Strategy,
        configure: impl FnOnce(&mut RecognitionLoop<ScriptedBackend>),
    ) -> Self {
        let model_dir = tempfile::tempdir().unwrap();
        let artifact = model_dir.path().join("signs.pt");
        std::fs::write(&artifact, b"scripted").unwrap();

        let vocabulary = LabelVocabulary::alphabet();
        let ledger = TensorLedger::new();
        let (ack, acks) = unbounded();
        let mut loader = ModelLoader::new(model_dir.path().join("cache"));
        let model: ModelHandle<ScriptedBackend> = loader
            .load(&ModelSource::Local(artifact), MODEL_SIZE, &ledger, |_| {
                Ok(ScriptedBackend {
                    classes: vocabulary.len(),
                    ack,
                })
            })
            .unwrap();

        let (frames, rx) = bounded(2);
        let stream = StreamHandle::from_receiver(rx, 8, true);
        let settings = LoopSettings {
            decode: DecodeParams::practice(),
            display_width: 640,
            display_height: 640,
            tick_interval: None,
            verbose: true,
        };
        let (mut recognition, control) = RecognitionLoop::new(
            model,
            vocabulary,
            stream,
            strategy,
            Arc::clone(&ledger),
            settings,
        );
        configure(&mut recognition);
        let handle = recognition.spawn().unwrap();

        Self {
            frames,
            acks,
            control,
            ledger,
            handle,
            _model_dir: model_dir,
        }
    }

    /// Send one uniform frame and wait until the backend has seen it.
    fn feed(&self, value: u8) {
        self.frames
            .send(Ok(Frame {
                data: vec![value; 8 * 8 * 3],
                width: 8,
                height: 8,
                timestamp_ms: 0,
                format: FrameFormat::Bgr8,
            }))
            .unwrap();
        self.acks.recv_timeout(ACK_TIMEOUT).unwrap();
    }

    /// Close the camera and collect the report.
    fn close(self) -> (LoopReport, Arc<TensorLedger>) {
        drop(self.frames);
        (self.handle.join().unwrap(), self.ledger)
    }
}

fn practice(target: &str) -> Strategy {
    Strategy::Gated(GatedValidator::new(TargetSpec::new(
        target,
        ZoneRect::default(),
        Duration::ZERO,
    )))
}

#[test]
fn finish_is_accepted_only_while_the_sign_is_validated() {
    let harness = Harness::start(practice("A"));

    for tick in 1..=15 {
        let value = match tick {
            1..=5 => NOTHING,
            6..=10 => A_OUTSIDE,
            _ => A_INSIDE,
        };
        harness.feed(value);
        let answer = harness.control.finish();
        match tick {
            1..=5 => assert!(matches!(
                answer,
                Err(ControlError::Rejected(FinishRejected::NoDetection))
            )),
            6..=10 => assert!(matches!(
                answer,
                Err(ControlError::Rejected(FinishRejected::OutsideZone))
            )),
            _ => assert_eq!(answer.unwrap().symbol, "A"),
        }
    }

    let (report, ledger) = harness.close();
    assert_eq!(report.stop_reason, StopReason::CaptureClosed);
    assert_eq!(report.ticks, 15);
    assert_eq!(report.skipped_ticks, 0);
    assert_eq!(report.dropped_frames, 0);
    assert_eq!(report.unbalanced_ticks, 0);
    assert_eq!(report.results.len(), 5);
    assert_eq!(ledger.snapshot().live(), 0);
}

#[test]
fn failing_ticks_are_skipped_and_release_their_tensors() {
    let harness = Harness::start(Strategy::Cadence(CadenceSampler::new(1, 0.5)));
    for value in [A_INSIDE, FAIL, A_INSIDE, FAIL, FAIL, NOTHING] {
        harness.feed(value);
    }

    let (report, ledger) = harness.close();
    assert_eq!(report.ticks, 3);
    assert_eq!(report.skipped_ticks, 3);
    assert_eq!(report.unbalanced_ticks, 0);
    let symbols: Vec<_> = report.results.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, ["A", "A"]);
    let totals = ledger.snapshot();
    assert!(totals.allocated > 0);
    assert_eq!(totals.allocated, totals.released);
}

#[test]
fn set_target_resets_the_gate() {
    let harness = Harness::start(practice("B"));
    harness.feed(A_INSIDE);
    assert!(matches!(
        harness.control.finish(),
        Err(ControlError::Rejected(FinishRejected::WrongLabel { .. }))
    ));

    harness
        .control
        .set_target(TargetSpec::new("A", ZoneRect::default(), Duration::ZERO))
        .unwrap();
    // the new target starts from a clean slate
    assert!(matches!(
        harness.control.finish(),
        Err(ControlError::Rejected(FinishRejected::NoDetection))
    ));

    harness.feed(A_INSIDE);
    assert_eq!(harness.control.finish().unwrap().symbol, "A");

    harness.feed(B_INSIDE);
    assert!(harness.control.finish().is_err());

    let (report, _) = harness.close();
    assert_eq!(report.results.len(), 1);
}

#[test]
fn auto_finish_and_consumers_see_each_result_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut events = None;
    let auto = Strategy::Gated(
        GatedValidator::new(TargetSpec::new("A", ZoneRect::default(), Duration::ZERO))
            .with_auto_finish(true),
    );
    let harness = Harness::start_with(auto, |recognition| {
        recognition
            .results()
            .on_result(move |symbol, confidence| sink.lock().unwrap().push((symbol.to_string(), confidence)));
        events = Some(recognition.results().subscribe());
    });

    for value in [A_INSIDE, A_INSIDE, NOTHING, A_INSIDE] {
        harness.feed(value);
    }
    let (report, _) = harness.close();

    assert_eq!(report.results.len(), 2);
    assert_eq!(seen.lock().unwrap().len(), 2);
    let streamed: Vec<_> = events.unwrap().iter().map(|e| e.sequence).collect();
    assert_eq!(streamed, [1, 2]);
}

#[test]
fn cancellation_stops_an_idle_loop() {
    let harness = Harness::start(practice("A"));
    harness.control.cancel();

    let control = harness.control.clone();
    let frames = harness.frames.clone();
    let (report, ledger) = harness.close();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.ticks, 0);
    assert_eq!(ledger.snapshot().live(), 0);

    // the stream was stopped and the command channel closed with the loop
    assert!(frames.send(Err(CaptureError::Open { uri: "x".into() })).is_err());
    assert!(matches!(control.finish(), Err(ControlError::Closed)));
}
