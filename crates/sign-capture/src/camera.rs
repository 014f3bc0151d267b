//! OpenCV-backed camera capture.

use std::{
    sync::{Arc, atomic::AtomicBool},
    thread::{self, JoinHandle},
};

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::{info, warn};

use crate::{
    ffmpeg::parse_device_index,
    source::{FRAME_QUEUE, deliver, deliver_item, should_stop},
    types::{CaptureConstraints, CaptureError, Frame, FrameFormat},
};

pub(crate) struct CameraReader {
    pub thread: JoinHandle<()>,
    pub frames: Receiver<Result<Frame, CaptureError>>,
}

/// Open `device` on the calling thread so open failures surface from
/// `start`, then hand the capture over to a reader thread.
pub(crate) fn spawn_camera_reader(
    device: &str,
    constraints: &CaptureConstraints,
    stop: Arc<AtomicBool>,
) -> Result<CameraReader, CaptureError> {
    let (tx, rx) = bounded(FRAME_QUEUE);
    let uri = device.to_string();
    let side = constraints.resolution as i32;
    let fps = f64::from(constraints.fps);

    let (opened_tx, opened_rx) = bounded(1);
    let thread = thread::Builder::new()
        .name("capture-opencv".into())
        .spawn(move || {
            let mut cap = match open_video_capture(&uri) {
                Ok(cap) => {
                    let _ = opened_tx.send(Ok(()));
                    cap
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                    return;
                }
            };
            configure_camera(&mut cap, side, fps);
            if let Err(err) = capture_loop(&mut cap, side, &tx, &stop) {
                warn!("opencv capture from {uri} failed: {err}");
                deliver_item(&tx, Err(err), &stop);
            }
            info!("opencv capture from {uri} stopped");
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    match opened_rx.recv() {
        Ok(Ok(())) => Ok(CameraReader { thread, frames: rx }),
        Ok(Err(err)) => {
            let _ = thread.join();
            Err(err)
        }
        Err(_) => Err(CaptureError::Open {
            uri: device.to_string(),
        }),
    }
}

fn capture_loop(
    cap: &mut VideoCapture,
    side: i32,
    tx: &Sender<Result<Frame, CaptureError>>,
    stop: &AtomicBool,
) -> Result<(), CaptureError> {
    let mut frame = Mat::default();
    let mut scratch = Mat::default();

    while !should_stop(stop) {
        cap.read(&mut frame)
            .map_err(|e| CaptureError::Other(e.into()))?;

        let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 {
            continue;
        }

        let working = if size.width != side || size.height != side {
            opencv::imgproc::resize(
                &frame,
                &mut scratch,
                core::Size {
                    width: side,
                    height: side,
                },
                0.0,
                0.0,
                opencv::imgproc::INTER_LINEAR,
            )
            .map_err(|e| CaptureError::Other(e.into()))?;
            &scratch
        } else {
            &frame
        };

        let data = working
            .data_bytes()
            .map_err(|e| CaptureError::Other(e.into()))?
            .to_vec();

        let frame = Frame {
            data,
            width: side as u32,
            height: side as u32,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        };
        if !deliver(tx, frame, stop) {
            break;
        }
    }

    Ok(())
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => warn!("failed to open device #{index} with backend {backend}: {err}"),
            }
        }
    }

    for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
        match VideoCapture::from_file(uri, backend) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => warn!("failed to open {uri} with backend {backend}: {err}"),
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

/// Request MJPG at the square resolution and frame rate; drivers may ignore any of it.
fn configure_camera(cap: &mut VideoCapture, side: i32, fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, side as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, side as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
