//! Camera acquisition for the recognition loop.
//!
//! The default backend pipes a V4L2 device (or any URI ffmpeg understands)
//! through an `ffmpeg` subprocess; enabling `with-opencv` adds an OpenCV
//! `VideoCapture` backend. Both deliver square BGR frames over a small
//! bounded channel.

#[cfg(feature = "with-opencv")]
pub mod camera;
pub mod ffmpeg;
pub mod source;
pub mod types;

pub use ffmpeg::parse_device_index;
pub use source::{CaptureBackend, CaptureSource, StreamHandle, check_device_access};
pub use types::{CaptureConstraints, CaptureError, Facing, Frame, FrameFormat};
