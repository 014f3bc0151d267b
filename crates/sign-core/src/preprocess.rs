use std::sync::Arc;

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

use crate::tensor::{HostTensor, TensorError, TensorLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Bgr8,
    Rgb8,
    Rgba8,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr8 | PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unexpected frame buffer size: got {actual} bytes, expected {expected}")]
    BufferSize { actual: usize, expected: usize },
    #[error("frame dimensions {width}x{height} are not usable")]
    Dimensions { width: u32, height: u32 },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Turns raw camera frames into `[1, S, S, 3]` network inputs in `[0, 1]`.
pub struct FramePreprocessor {
    input_size: u32,
    ledger: Arc<TensorLedger>,
}

impl FramePreprocessor {
    pub fn new(input_size: u32, ledger: Arc<TensorLedger>) -> Self {
        Self { input_size, ledger }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn input_shape(&self) -> Vec<usize> {
        let s = self.input_size as usize;
        vec![1, s, s, 3]
    }

    /// Resize, cast, normalise and batch one frame.
    ///
    /// Only the returned tensor is leased from the ledger; the RGB conversion
    /// and resize buffers are dropped before this returns.
    pub fn prepare(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<HostTensor, PreprocessError> {
        if width == 0 || height == 0 || self.input_size == 0 {
            return Err(PreprocessError::Dimensions { width, height });
        }
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(PreprocessError::BufferSize {
                actual: data.len(),
                expected,
            });
        }

        let rgb = to_rgb_image(data, width, height, layout)?;
        let size = self.input_size;
        let resized = if (width, height) == (size, size) {
            rgb
        } else {
            image::imageops::resize(&rgb, size, size, FilterType::Triangle)
        };

        let normalized: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| f32::from(v) / 255.0)
            .collect();

        Ok(self.ledger.allocate(self.input_shape(), normalized)?)
    }

    /// All-zero input used to warm the backend up.
    pub fn blank_input(&self) -> HostTensor {
        self.ledger.zeros(self.input_shape())
    }
}

fn to_rgb_image(
    data: &[u8],
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Result<RgbImage, PreprocessError> {
    let pixels: Vec<u8> = match layout {
        PixelLayout::Rgb8 => data.to_vec(),
        PixelLayout::Bgr8 => data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelLayout::Rgba8 => data
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
    };
    RgbImage::from_raw(width, height, pixels).ok_or(PreprocessError::Dimensions { width, height })
}
