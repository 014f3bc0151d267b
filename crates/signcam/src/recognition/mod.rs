//! Session wiring: telemetry, model, camera, loop, consumers.

pub mod config;
pub mod console;
pub mod pipeline;
#[cfg(feature = "with-tch")]
mod runtime;
pub mod telemetry;

use std::sync::{Arc, Once};

use anyhow::{Context, Result, anyhow, bail};
use sign_capture::{CaptureError, CaptureSource};
use sign_core::{ModelError, ModelHandle, ModelLoader, TensorLedger, ZoneRect};
use tracing::{error, info, warn};

pub use config::{ModeConfig, RecognitionConfig, RecognizeArgs, TelemetryOptions};
pub use pipeline::{
    CancellationToken, ControlError, LoopCommand, LoopControl, LoopReport, LoopSettings,
    RecognitionLoop, StopReason,
};

#[cfg(feature = "with-tch")]
type Backend = sign_core::detector::TorchDetector;
#[cfg(not(feature = "with-tch"))]
type Backend = Box<dyn sign_core::InferenceBackend>;

/// Run one recognition session until Ctrl+C, `quit`, or the camera closes.
///
/// Confirmed symbols are printed to stdout as JSON lines.
pub fn run(config: RecognitionConfig) -> Result<LoopReport> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry, config.verbose);
    telemetry::init_metrics_recorder()?;
    let session_span = tracing::info_span!(
        "signcam.session",
        mode = config.mode.name(),
        model = %config.model,
        input_size = config.input_size,
        facing = ?config.capture.facing,
    );
    let _session_guard = session_span.enter();

    let ledger = TensorLedger::new();
    let mut loader = ModelLoader::new(&config.cache_dir);
    let model = match load_model(&mut loader, &config, &ledger) {
        Ok(model) => model,
        Err(err) => {
            error!(status = ?loader.status(), "Recognition not started");
            return Err(err).context("model unavailable");
        }
    };

    let stream = match CaptureSource::new(config.capture_backend).start(&config.capture) {
        Ok(stream) => stream,
        Err(CaptureError::PermissionDenied { device }) => {
            error!("Camera permission denied for {device}");
            bail!("camera access to {device} was denied; grant access and rerun signcam");
        }
        Err(err) => return Err(err).context("failed to start camera"),
    };

    let settings = LoopSettings {
        decode: config.decode,
        display_width: config.display_width,
        display_height: config.display_height,
        tick_interval: Some(config.tick_interval()),
        verbose: config.verbose,
    };
    let (mut recognition, control) = RecognitionLoop::new(
        model,
        config.vocabulary.clone(),
        stream,
        config.mode.strategy(),
        Arc::clone(&ledger),
        settings,
    );
    let events = recognition.results().subscribe();

    install_ctrlc_handler(control.token());
    let zone = match &config.mode {
        ModeConfig::Practice { target, .. } => target.zone,
        _ => ZoneRect::default(),
    };
    if let Err(err) = console::spawn_stdin_commands(control.clone(), config.vocabulary.clone(), zone)
    {
        warn!("Console commands unavailable: {err}");
    }

    let loop_handle = recognition
        .spawn()
        .context("failed to spawn recognition loop")?;

    for event in events.iter() {
        println!("{}", serde_json::to_string(&event)?);
    }

    let report = loop_handle
        .join()
        .map_err(|_| anyhow!("recognition loop panicked"))?;
    info!(
        ticks = report.ticks,
        skipped = report.skipped_ticks,
        dropped_frames = report.dropped_frames,
        results = report.results.len(),
        live_tensors = report.ledger.live(),
        "Session finished ({:?})",
        report.stop_reason
    );

    if let Some(path) = config.telemetry.metrics_snapshot_path.as_deref() {
        telemetry::write_metrics_snapshot(path)?;
        info!("Metrics snapshot written to {}", path.display());
    }
    Ok(report)
}

fn install_ctrlc_handler(token: CancellationToken) {
    static CTRL_HANDLER: Once = Once::new();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || token.cancel()) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });
}

#[cfg(feature = "with-tch")]
fn load_model(
    loader: &mut ModelLoader,
    config: &RecognitionConfig,
    ledger: &Arc<TensorLedger>,
) -> Result<ModelHandle<Backend>, ModelError> {
    let device = runtime::select_device(config.use_cpu);
    let input_size = config.input_size;
    loader.load(&config.model, input_size, ledger, |path| {
        sign_core::detector::TorchDetector::load(path, device, input_size)
    })
}

#[cfg(not(feature = "with-tch"))]
fn load_model(
    loader: &mut ModelLoader,
    config: &RecognitionConfig,
    ledger: &Arc<TensorLedger>,
) -> Result<ModelHandle<Backend>, ModelError> {
    loader.load(&config.model, config.input_size, ledger, |path| {
        Err(ModelError::Parse(format!(
            "cannot execute {}: signcam was built without the `with-tch` backend",
            path.display()
        )))
    })
}
