//! Model-space to display-space box mapping.
//!
//! Inference always runs on the unmirrored frame while a front camera feed is
//! shown mirrored. Only the horizontal axis is flipped: the mirrored left edge
//! is derived from the model-space right edge, and the vertical axis is a plain
//! rescale.

use crate::{decode::Detection, geometry::BoundingBox};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    pub model_size: f32,
    pub display_width: f32,
    pub display_height: f32,
    pub mirrored: bool,
}

impl CoordinateMapper {
    pub fn new(model_size: u32, display_width: u32, display_height: u32, mirrored: bool) -> Self {
        Self {
            model_size: model_size as f32,
            display_width: display_width as f32,
            display_height: display_height as f32,
            mirrored,
        }
    }

    pub fn map(&self, detection: &Detection) -> Detection {
        map_to_display(
            detection,
            self.model_size,
            self.display_width,
            self.display_height,
            self.mirrored,
        )
    }

    pub fn map_all(&self, detections: &[Detection]) -> Vec<Detection> {
        detections.iter().map(|d| self.map(d)).collect()
    }
}

pub fn map_to_display(
    detection: &Detection,
    model_size: f32,
    display_width: f32,
    display_height: f32,
    mirrored: bool,
) -> Detection {
    let scale_x = display_width / model_size;
    let scale_y = display_height / model_size;
    let b = &detection.bbox;

    let x = if mirrored {
        display_width - b.x2() * scale_x
    } else {
        b.x * scale_x
    };

    Detection {
        bbox: BoundingBox {
            x,
            y: b.y * scale_y,
            width: b.width * scale_x,
            height: b.height * scale_y,
        },
        ..detection.clone()
    }
}
