//! Stream lifecycle: permission check, backend start, idempotent stop.

use std::{
    fs::OpenOptions,
    io::{self, ErrorKind},
    process::Child,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use tracing::{info, warn};

use crate::{
    ffmpeg,
    types::{CaptureConstraints, CaptureError, Frame},
};

/// Frames buffered between the reader thread and the consumer.
pub(crate) const FRAME_QUEUE: usize = 2;

const SEND_POLL: Duration = Duration::from_millis(50);

pub(crate) fn should_stop(stop: &AtomicBool) -> bool {
    stop.load(Ordering::Acquire)
}

/// Push `frame` into the bounded queue, waking periodically to honour `stop`.
/// Returns `false` once the reader should exit.
pub(crate) fn deliver(
    tx: &Sender<Result<Frame, CaptureError>>,
    frame: Frame,
    stop: &AtomicBool,
) -> bool {
    deliver_item(tx, Ok(frame), stop)
}

/// Same as [`deliver`] for any queue item, including a terminal reader error.
pub(crate) fn deliver_item(
    tx: &Sender<Result<Frame, CaptureError>>,
    item: Result<Frame, CaptureError>,
    stop: &AtomicBool,
) -> bool {
    let mut pending = item;
    loop {
        if should_stop(stop) {
            return false;
        }
        match tx.send_timeout(pending, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(item)) => pending = item,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureBackend {
    #[default]
    Ffmpeg,
    #[cfg(feature = "with-opencv")]
    OpenCv,
}

/// Starts camera streams with a fixed backend.
#[derive(Debug, Clone, Default)]
pub struct CaptureSource {
    backend: CaptureBackend,
}

impl CaptureSource {
    pub fn new(backend: CaptureBackend) -> Self {
        Self { backend }
    }

    /// Acquire the device selected by `constraints.facing`.
    ///
    /// Permission is checked before any decoder is spawned so a denied
    /// camera reports [`CaptureError::PermissionDenied`] rather than a
    /// generic open failure.
    pub fn start(&self, constraints: &CaptureConstraints) -> Result<StreamHandle, CaptureError> {
        let device = ffmpeg::device_path(constraints.device());
        check_device_access(&device)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (frames, child, reader) = match self.backend {
            CaptureBackend::Ffmpeg => {
                let reader = ffmpeg::spawn_ffmpeg_reader(&device, constraints, Arc::clone(&stop))?;
                (reader.frames, Some(reader.child), Some(reader.thread))
            }
            #[cfg(feature = "with-opencv")]
            CaptureBackend::OpenCv => {
                let reader =
                    crate::camera::spawn_camera_reader(&device, constraints, Arc::clone(&stop))?;
                (reader.frames, None, Some(reader.thread))
            }
        };

        info!(
            backend = ?self.backend,
            facing = ?constraints.facing,
            "camera stream started on {device} at {0}x{0}",
            constraints.resolution
        );

        Ok(StreamHandle {
            frames,
            stop,
            child,
            reader,
            device,
            resolution: constraints.resolution,
            mirrored: constraints.mirrored(),
            stopped: false,
        })
    }

    pub fn stop(&self, mut handle: StreamHandle) {
        handle.stop();
    }
}

/// Fail fast with `PermissionDenied` when the device node exists but cannot
/// be opened for reading. Non-device URIs are left to the backend.
pub fn check_device_access(device: &str) -> Result<(), CaptureError> {
    if !device.starts_with("/dev/") {
        return Ok(());
    }
    OpenOptions::new()
        .read(true)
        .open(device)
        .map(drop)
        .map_err(|err| classify_open_error(device, err))
}

fn classify_open_error(device: &str, err: io::Error) -> CaptureError {
    match err.kind() {
        ErrorKind::PermissionDenied => CaptureError::PermissionDenied {
            device: device.to_string(),
        },
        ErrorKind::NotFound => CaptureError::Open {
            uri: device.to_string(),
        },
        _ => CaptureError::Other(anyhow::Error::new(err).context(format!("opening {device}"))),
    }
}

/// A running capture stream.
///
/// Dropping the handle stops the stream.
pub struct StreamHandle {
    frames: Receiver<Result<Frame, CaptureError>>,
    stop: Arc<AtomicBool>,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    device: String,
    resolution: u32,
    mirrored: bool,
    stopped: bool,
}

impl StreamHandle {
    /// Wrap frames produced elsewhere (files, tests, another process).
    pub fn from_receiver(
        frames: Receiver<Result<Frame, CaptureError>>,
        resolution: u32,
        mirrored: bool,
    ) -> Self {
        Self {
            frames,
            stop: Arc::new(AtomicBool::new(false)),
            child: None,
            reader: None,
            device: "external".into(),
            resolution,
            mirrored,
            stopped: false,
        }
    }

    pub fn frames(&self) -> &Receiver<Result<Frame, CaptureError>> {
        &self.frames
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Kill the decoder and join the reader thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.stop.store(true, Ordering::Release);

        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                warn!("failed to kill capture process for {}: {err}", self.device);
            }
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("capture reader for {} panicked", self.device);
            }
        }
        info!("camera stream on {} stopped", self.device);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
