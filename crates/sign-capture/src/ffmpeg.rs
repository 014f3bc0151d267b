use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    sync::{Arc, atomic::AtomicBool},
    thread::{self, JoinHandle},
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, info, warn};

use crate::{
    source::{FRAME_QUEUE, deliver, deliver_item, should_stop},
    types::{CaptureConstraints, CaptureError, Frame, FrameFormat},
};

/// Parse a `/dev/videoX` style URI or bare index and return the index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if stripped.is_empty() || !stripped.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stripped.parse().ok()
}

/// Resolve a bare index to its device node; other URIs pass through.
pub(crate) fn device_path(uri: &str) -> String {
    match parse_device_index(uri) {
        Some(index) if !uri.starts_with("/dev/") => format!("/dev/video{index}"),
        _ => uri.to_string(),
    }
}

/// ffmpeg invocation producing square BGR24 raw frames on stdout.
pub fn build_command(device: &str, constraints: &CaptureConstraints) -> Command {
    let input = device_path(device);
    let side = constraints.resolution;

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-fflags")
        .arg("nobuffer")
        .arg("-flags")
        .arg("low_delay");

    if input.starts_with("/dev/video") {
        cmd.arg("-f")
            .arg("video4linux2")
            .arg("-framerate")
            .arg(constraints.fps.to_string());
    } else if input.starts_with("rtsp://") {
        cmd.arg("-rtsp_transport").arg("tcp");
    }

    cmd.arg("-i")
        .arg(&input)
        .arg("-an")
        .arg("-vf")
        .arg(format!("scale={side}:{side}"))
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
    cmd
}

pub(crate) struct FfmpegReader {
    pub child: Child,
    pub thread: JoinHandle<()>,
    pub frames: Receiver<Result<Frame, CaptureError>>,
}

pub(crate) fn spawn_ffmpeg_reader(
    device: &str,
    constraints: &CaptureConstraints,
    stop: Arc<AtomicBool>,
) -> Result<FfmpegReader, CaptureError> {
    let mut cmd = build_command(device, constraints);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            CaptureError::Other(anyhow!("ffmpeg executable not found on PATH"))
        } else {
            CaptureError::Other(err.into())
        }
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    let (tx, rx) = bounded(FRAME_QUEUE);
    let side = constraints.resolution;
    let device = device.to_string();
    let thread = thread::Builder::new()
        .name("capture-ffmpeg".into())
        .spawn(move || match read_frames(stdout, side, &tx, &stop) {
            Ok(count) => info!("capture from {device} ended after {count} frames"),
            Err(err) => {
                warn!("capture from {device} failed: {err}");
                deliver_item(&tx, Err(err), &stop);
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(FfmpegReader {
        child,
        thread,
        frames: rx,
    })
}

/// Slice `reader` into `side × side` BGR frames until EOF, stop, or the
/// receiver goes away. Returns the number of frames delivered.
pub(crate) fn read_frames(
    mut reader: impl Read,
    side: u32,
    tx: &Sender<Result<Frame, CaptureError>>,
    stop: &AtomicBool,
) -> Result<u64, CaptureError> {
    let frame_bytes = side as usize * side as usize * 3;
    let mut buffer = vec![0u8; frame_bytes];
    let mut delivered = 0u64;

    while !should_stop(stop) {
        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                debug!("ffmpeg stream reached end of input");
                break;
            }
            Err(err) => return Err(CaptureError::Other(err.into())),
        }

        let frame = Frame {
            data: buffer.clone(),
            width: side,
            height: side,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        };
        if !deliver(tx, frame, stop) {
            break;
        }
        delivered += 1;
    }

    Ok(delivered)
}
