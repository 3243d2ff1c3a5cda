//! Decoded video frames
//!
//! A [`Frame`] is an immutable RGB pixel buffer behind an `Arc`, so handing a
//! chunk to the blocking pool or keeping the snapshot frame is a pointer copy.

pub mod decoder;
pub mod window;

pub use decoder::{decode_frame, FrameDecodeError};
pub use window::{FrameWindow, WindowOffer};

use image::{imageops::FilterType, RgbImage};
use std::sync::Arc;

/// Raw pixel frame
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Scale down to `target_width`, preserving aspect ratio
    ///
    /// Frames already at or below the target width are returned as-is
    /// (never upscaled).
    pub fn downsample(&self, target_width: u32) -> Frame {
        let (width, height) = (self.width(), self.height());
        if target_width == 0 || width <= target_width {
            return self.clone();
        }

        let target_height = ((height as f64) * (target_width as f64 / width as f64))
            .round()
            .max(1.0) as u32;
        let resized = image::imageops::resize(
            self.image.as_ref(),
            target_width,
            target_height,
            FilterType::Triangle,
        );
        Frame::new(resized)
    }
}
