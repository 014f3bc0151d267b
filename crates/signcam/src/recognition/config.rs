//! Configuration parsing for the recognition loop.
//!
//! This module owns translation of CLI arguments into a `RecognitionConfig`
//! which the loop and its collaborators use without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Subcommand};
use sign_capture::{CaptureBackend, CaptureConstraints, Facing};
use sign_core::{
    DecodeParams, LabelVocabulary, ModelLoader, ModelSource, ZoneRect,
    validation::{CadenceSampler, GatedValidator, HoldValidator, Strategy, TargetSpec},
};

#[derive(Clone, Debug)]
/// Canonical configuration for one recognition session.
pub struct RecognitionConfig {
    /// Model artifact URL or local path.
    pub model: ModelSource,
    /// Directory remote artifacts are cached in.
    pub cache_dir: PathBuf,
    pub vocabulary: LabelVocabulary,
    /// Square detector input side.
    pub input_size: u32,
    pub decode: DecodeParams,
    pub capture: CaptureConstraints,
    pub capture_backend: CaptureBackend,
    /// Display surface detections are mapped onto.
    pub display_width: u32,
    pub display_height: u32,
    /// Target ticks per second.
    pub tick_rate: u32,
    pub mode: ModeConfig,
    /// Force CPU inference.
    pub use_cpu: bool,
    /// Emit per-frame detection logging.
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

impl RecognitionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate))
    }
}

#[derive(Clone, Debug, PartialEq)]
/// Validation strategy selected for the session.
pub enum ModeConfig {
    /// Single target with a finish action.
    Practice {
        target: TargetSpec,
        auto_finish: bool,
    },
    /// Free word recognition with a hold requirement.
    Word {
        hold: Duration,
        zone: Option<ZoneRect>,
    },
    /// Free letter capture sampled on a fixed cadence.
    Alphabet { sample_every: u64, min_confidence: f32 },
}

impl ModeConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ModeConfig::Practice { .. } => "practice",
            ModeConfig::Word { .. } => "word",
            ModeConfig::Alphabet { .. } => "alphabet",
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            ModeConfig::Practice {
                target,
                auto_finish,
            } => Strategy::Gated(GatedValidator::new(target.clone()).with_auto_finish(*auto_finish)),
            ModeConfig::Word { hold, zone } => {
                Strategy::Hold(HoldValidator::new(*hold).with_zone(*zone))
            }
            ModeConfig::Alphabet {
                sample_every,
                min_confidence,
            } => Strategy::Cadence(CadenceSampler::new(*sample_every, *min_confidence)),
        }
    }

    fn default_vocabulary(&self) -> &'static str {
        match self {
            ModeConfig::Word { .. } => "words",
            _ => "alphabet",
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics export.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing loop spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Write the Prometheus exposition text here on shutdown.
    pub metrics_snapshot_path: Option<PathBuf>,
}

/// CLI arguments accepted by the `recognize` subcommand.
#[derive(Debug, Args)]
pub struct RecognizeArgs {
    /// TorchScript model URL or path.
    #[arg(long = "model", value_name = "URL|PATH")]
    pub model: String,
    /// Built-in vocabulary name (`alphabet`, `words`) or a label file.
    #[arg(long = "vocab", value_name = "NAME|PATH")]
    pub vocab: Option<String>,
    /// Directory for downloaded models.
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
    /// Square detector input size in pixels.
    #[arg(long = "input-size", value_name = "PX", default_value_t = 640)]
    pub input_size: u32,
    /// Minimum class score for a candidate.
    #[arg(long = "confidence", value_name = "P", default_value_t = 0.5)]
    pub confidence: f32,
    /// IoU above which overlapping candidates are suppressed.
    #[arg(long = "iou", value_name = "P", default_value_t = 0.45)]
    pub iou: f32,
    /// Maximum detections kept per tick (default 5 in practice, 20 otherwise).
    #[arg(long = "max-candidates", value_name = "N")]
    pub max_candidates: Option<usize>,
    /// Camera facing: `front` is mirrored, `rear` is not.
    #[arg(long = "facing", value_name = "FACING", default_value = "front")]
    pub facing: Facing,
    /// Device used for the front camera.
    #[arg(long = "front-device", value_name = "DEV", default_value = "/dev/video0")]
    pub front_device: String,
    /// Device used for the rear camera.
    #[arg(long = "rear-device", value_name = "DEV", default_value = "/dev/video2")]
    pub rear_device: String,
    /// Capture through OpenCV instead of ffmpeg.
    #[arg(long = "opencv", action = clap::ArgAction::SetTrue)]
    pub use_opencv: bool,
    /// Display width detections are mapped to (defaults to the input size).
    #[arg(long = "display-width", value_name = "PX")]
    pub display_width: Option<u32>,
    /// Display height detections are mapped to (defaults to the input size).
    #[arg(long = "display-height", value_name = "PX")]
    pub display_height: Option<u32>,
    /// Recognition ticks per second.
    #[arg(long = "tick-rate", value_name = "HZ", default_value_t = 30)]
    pub tick_rate: u32,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Enable verbose logging (per-frame detections).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Write a Prometheus metrics snapshot on exit.
    #[arg(long = "metrics-snapshot", value_name = "PATH")]
    pub metrics_snapshot: Option<PathBuf>,
    #[command(subcommand)]
    pub mode: ModeArgs,
}

#[derive(Debug, Subcommand)]
pub enum ModeArgs {
    /// Practise a single target sign inside a zone.
    Practice {
        /// Label the learner should show.
        #[arg(long = "target", value_name = "LABEL")]
        target: String,
        /// Target zone as display fractions `x,y,w,h`.
        #[arg(long = "zone", value_name = "X,Y,W,H", default_value = "0.25,0.25,0.5,0.5")]
        zone: ZoneRect,
        /// Finish automatically as soon as the sign is validated.
        #[arg(long = "auto-finish", action = clap::ArgAction::SetTrue)]
        auto_finish: bool,
    },
    /// Recognise words held steady for a minimum duration.
    Word {
        /// Hold duration in milliseconds.
        #[arg(long = "hold-ms", value_name = "MS", default_value_t = 1000)]
        hold_ms: u64,
        /// Only accept hands whose centre lies in this zone.
        #[arg(long = "zone", value_name = "X,Y,W,H")]
        zone: Option<ZoneRect>,
    },
    /// Capture letters by sampling every k-th tick.
    Alphabet {
        #[arg(long = "sample-every", value_name = "K", default_value_t = 30)]
        sample_every: u64,
        #[arg(long = "min-confidence", value_name = "P", default_value_t = 0.5)]
        min_confidence: f32,
    },
}

/// Resolve a vocabulary argument: a built-in name first, then a file path.
pub fn load_vocabulary(name_or_path: &str) -> Result<LabelVocabulary> {
    if let Some(vocab) = LabelVocabulary::builtin(name_or_path) {
        return Ok(vocab);
    }
    let path = PathBuf::from(name_or_path);
    if !path.exists() {
        bail!("unknown vocabulary {name_or_path:?}; use `alphabet`, `words` or a label file");
    }
    LabelVocabulary::from_file(&path)
        .with_context(|| format!("failed to load vocabulary from {}", path.display()))
}

fn unit_interval(name: &str, value: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must be within [0, 1], got {value}");
    }
    Ok(value)
}

impl TryFrom<RecognizeArgs> for RecognitionConfig {
    type Error = anyhow::Error;

    fn try_from(args: RecognizeArgs) -> Result<Self> {
        if args.input_size == 0 {
            bail!("--input-size must be a positive integer");
        }
        if args.tick_rate == 0 {
            bail!("--tick-rate must be at least 1");
        }
        let confidence = unit_interval("--confidence", args.confidence)?;
        let iou = unit_interval("--iou", args.iou)?;

        let mode = match args.mode {
            ModeArgs::Practice {
                target,
                zone,
                auto_finish,
            } => ModeConfig::Practice {
                target: TargetSpec::new(target, zone, Duration::ZERO),
                auto_finish,
            },
            ModeArgs::Word { hold_ms, zone } => ModeConfig::Word {
                hold: Duration::from_millis(hold_ms),
                zone,
            },
            ModeArgs::Alphabet {
                sample_every,
                min_confidence,
            } => {
                if sample_every == 0 {
                    bail!("--sample-every must be at least 1");
                }
                ModeConfig::Alphabet {
                    sample_every,
                    min_confidence: unit_interval("--min-confidence", min_confidence)?,
                }
            }
        };

        let vocabulary = load_vocabulary(
            args.vocab
                .as_deref()
                .unwrap_or_else(|| mode.default_vocabulary()),
        )?;
        if let ModeConfig::Practice { target, .. } = &mode {
            if vocabulary.position(&target.expected_label).is_none() {
                bail!(
                    "target {:?} is not in vocabulary {:?}",
                    target.expected_label,
                    vocabulary.name()
                );
            }
        }

        let max_candidates = match (args.max_candidates, &mode) {
            (Some(0), _) => bail!("--max-candidates must be at least 1"),
            (Some(n), _) => n,
            (None, ModeConfig::Practice { .. }) => DecodeParams::practice().max_candidates,
            (None, _) => DecodeParams::default().max_candidates,
        };

        let capture_backend = if args.use_opencv {
            opencv_backend()?
        } else {
            CaptureBackend::Ffmpeg
        };

        let display_width = args.display_width.unwrap_or(args.input_size);
        let display_height = args.display_height.unwrap_or(args.input_size);
        if display_width == 0 || display_height == 0 {
            bail!("display dimensions must be positive integers");
        }

        let model: ModelSource = args
            .model
            .parse()
            .map_err(|_: std::convert::Infallible| anyhow!("invalid model source"))?;

        Ok(Self {
            model,
            cache_dir: args.cache_dir.unwrap_or_else(ModelLoader::default_cache_dir),
            vocabulary,
            input_size: args.input_size,
            decode: DecodeParams {
                confidence_threshold: confidence,
                iou_threshold: iou,
                max_candidates,
            },
            capture: CaptureConstraints {
                resolution: args.input_size,
                facing: args.facing,
                fps: args.tick_rate,
                front_device: args.front_device,
                rear_device: args.rear_device,
            },
            capture_backend,
            display_width,
            display_height,
            tick_rate: args.tick_rate,
            mode,
            use_cpu: args.use_cpu,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                metrics_snapshot_path: args.metrics_snapshot,
            },
        })
    }
}

#[cfg(feature = "with-opencv")]
fn opencv_backend() -> Result<CaptureBackend> {
    Ok(CaptureBackend::OpenCv)
}

#[cfg(not(feature = "with-opencv"))]
fn opencv_backend() -> Result<CaptureBackend> {
    bail!("--opencv requires a build with the `with-opencv` feature")
}
