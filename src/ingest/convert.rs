use image::{GrayImage, Rgb, RgbImage};

use crate::error::{CaptureError, CaptureResult};

/// Expand a mono image to 3-channel RGB.
pub fn gray_to_rgb(gray: &GrayImage) -> RgbImage {
    let (width, height) = gray.dimensions();
    let mut rgb = RgbImage::new(width, height);
    for (out, px) in rgb.pixels_mut().zip(gray.pixels()) {
        let v = px[0];
        *out = Rgb([v, v, v]);
    }
    rgb
}

/// Swap an interleaved BGR buffer into an RGB image.
pub fn bgr_to_rgb(width: u32, height: u32, mut data: Vec<u8>) -> CaptureResult<RgbImage> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| CaptureError::Transport("BGR frame dimensions overflow".to_string()))?;
    if data.len() != expected {
        return Err(CaptureError::Transport(format!(
            "BGR frame length mismatch: expected {}, got {}",
            expected,
            data.len()
        )));
    }
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
    RgbImage::from_raw(width, height, data)
        .ok_or_else(|| CaptureError::Transport("BGR frame buffer too small".to_string()))
}
