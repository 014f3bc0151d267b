use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Axis-aligned box stored as top-left corner plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Convert the centre-form regression output of the network to corner form.
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            width: w,
            height: h,
        }
    }

    pub fn x2(&self) -> f32 {
        self.x + self.width
    }

    pub fn y2(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union; zero when either box is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.x2().min(other.x2());
        let iy2 = self.y2().min(other.y2());
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    #[error("zone must be four comma separated numbers x,y,w,h (got {0:?})")]
    Format(String),
    #[error("zone {0:?} must lie inside the unit square with positive extent")]
    Bounds([f32; 4]),
}

/// Rectangular region expressed as fractions of the display, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZoneRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ZoneRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Result<Self, ZoneError> {
        let fits = width > 0.0
            && height > 0.0
            && x >= 0.0
            && y >= 0.0
            && x + width <= 1.0 + f32::EPSILON
            && y + height <= 1.0 + f32::EPSILON;
        if !fits {
            return Err(ZoneError::Bounds([x, y, width, height]));
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// The whole frame.
    pub fn full() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    /// Whether the fractional point `(fx, fy)` lies inside, edges inclusive.
    pub fn contains(&self, fx: f32, fy: f32) -> bool {
        fx >= self.x && fx <= self.x + self.width && fy >= self.y && fy <= self.y + self.height
    }

    /// Whether the centre of a display-space box lies inside the zone.
    pub fn contains_center_of(&self, bbox: &BoundingBox, display_w: f32, display_h: f32) -> bool {
        if display_w <= 0.0 || display_h <= 0.0 {
            return false;
        }
        let (cx, cy) = bbox.center();
        self.contains(cx / display_w, cy / display_h)
    }
}

impl Default for ZoneRect {
    fn default() -> Self {
        Self {
            x: 0.25,
            y: 0.25,
            width: 0.5,
            height: 0.5,
        }
    }
}

impl FromStr for ZoneRect {
    type Err = ZoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ZoneError::Format(s.to_string()))?;
        match parts.as_slice() {
            [x, y, w, h] => ZoneRect::new(*x, *y, *w, *h),
            _ => Err(ZoneError::Format(s.to_string())),
        }
    }
}
