//! Gaussian blur over encoded images.

use std::io::Cursor;

use image::{GrayImage, ImageFormat, RgbaImage};

use super::collaborators::ImageTransform;
use crate::worker::StageError;

/// Blurs every RGBA channel with a Gaussian of standard deviation `sigma`
/// and re-encodes the result as PNG.
///
/// Non-positive sigma values re-encode the image unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianBlur {
    sigma: f32,
}

impl GaussianBlur {
    /// Creates the transform.
    pub fn new(sigma: f32) -> Self {
        Self { sigma }
    }

    /// The configured sigma.
    pub fn sigma(&self) -> f32 {
        self.sigma
    }
}

impl ImageTransform for GaussianBlur {
    fn apply(&self, bytes: &[u8]) -> Result<Vec<u8>, StageError> {
        if bytes.is_empty() {
            return Err(StageError::Transform("empty image".to_string()));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| StageError::Transform(format!("decode failed: {e}")))?;
        let blurred = blur_rgba(&decoded.to_rgba8(), self.sigma);

        let mut out = Cursor::new(Vec::new());
        blurred
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| StageError::Transform(format!("encode failed: {e}")))?;
        Ok(out.into_inner())
    }
}

/// `gaussian_blur_f32` works on single-channel images, so each channel is
/// split out, blurred and reassembled.
fn blur_rgba(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    let (w, h) = (image.width(), image.height());
    let channels: [GrayImage; 4] = std::array::from_fn(|c| {
        GrayImage::from_fn(w, h, |x, y| image::Luma([image.get_pixel(x, y).0[c]]))
    });
    let blurred: [GrayImage; 4] =
        std::array::from_fn(|c| imageproc::filter::gaussian_blur_f32(&channels[c], sigma));

    RgbaImage::from_fn(w, h, |x, y| {
        image::Rgba(std::array::from_fn(|c| blurred[c].get_pixel(x, y).0[0]))
    })
}
