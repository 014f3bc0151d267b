use anyhow::Error;
use thiserror::Error;

/// Raw frame captured from a camera or stream.
///
/// `data` is tightly packed, `width * height * 3` bytes in `format` order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("camera access denied for {device:?}; grant access to the device and rerun")]
    PermissionDenied { device: String },
    #[error(transparent)]
    Other(#[from] Error),
}

impl CaptureError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CaptureError::PermissionDenied { .. })
    }
}

/// Which camera the exercise wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    /// Front camera; shown mirrored.
    #[default]
    User,
    /// Rear camera for scanning.
    Environment,
}

impl std::str::FromStr for Facing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "front" => Ok(Facing::User),
            "environment" | "rear" | "back" => Ok(Facing::Environment),
            other => Err(format!("unknown facing {other:?}, expected front or rear")),
        }
    }
}

/// Requested stream shape and device selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Square output side in pixels.
    pub resolution: u32,
    pub facing: Facing,
    pub fps: u32,
    pub front_device: String,
    pub rear_device: String,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            resolution: 640,
            facing: Facing::User,
            fps: 30,
            front_device: "/dev/video0".into(),
            rear_device: "/dev/video2".into(),
        }
    }
}

impl CaptureConstraints {
    pub fn device(&self) -> &str {
        match self.facing {
            Facing::User => &self.front_device,
            Facing::Environment => &self.rear_device,
        }
    }

    /// Front-facing streams are displayed as a mirror image.
    pub fn mirrored(&self) -> bool {
        self.facing == Facing::User
    }

    pub fn frame_bytes(&self) -> usize {
        self.resolution as usize * self.resolution as usize * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_selects_device_and_mirroring() {
        let mut constraints = CaptureConstraints::default();
        assert_eq!(constraints.device(), "/dev/video0");
        assert!(constraints.mirrored());

        constraints.facing = Facing::Environment;
        assert_eq!(constraints.device(), "/dev/video2");
        assert!(!constraints.mirrored());
    }

    #[test]
    fn facing_parses_common_names() {
        assert_eq!("front".parse::<Facing>(), Ok(Facing::User));
        assert_eq!("Rear".parse::<Facing>(), Ok(Facing::Environment));
        assert!("sideways".parse::<Facing>().is_err());
    }
}
