//! Adapters from `image` crate buffers to tracker frames.

use std::path::Path;

use visual_servo_core::{ColorImage, ImageError};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Decode(#[from] ::image::ImageError),
    #[error(transparent)]
    Buffer(#[from] ImageError),
}

/// Copy an `image::RgbImage` into an RGB [`ColorImage`].
pub fn rgb_frame(img: &::image::RgbImage) -> Result<ColorImage, FrameError> {
    Ok(ColorImage::from_raw(
        img.width() as usize,
        img.height() as usize,
        3,
        img.as_raw().clone(),
    )?)
}

/// HSV frame (OpenCV 8-bit convention) from an RGB image.
pub fn hsv_frame(img: &::image::RgbImage) -> Result<ColorImage, FrameError> {
    Ok(rgb_frame(img)?.rgb_to_hsv()?)
}

/// Decode an image file and convert it to an HSV frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))
)]
pub fn load_hsv_frame(path: impl AsRef<Path>) -> Result<ColorImage, FrameError> {
    let img = ::image::open(path.as_ref())?.to_rgb8();
    log::debug!("loaded {}x{} frame", img.width(), img.height());
    hsv_frame(&img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::image::{Rgb, RgbImage};

    #[test]
    fn hsv_frame_uses_half_degree_hue() {
        let mut img = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(2, 1, Rgb([255, 0, 0]));

        let hsv = hsv_frame(&img).expect("convert");
        assert_eq!((hsv.width, hsv.height, hsv.channels), (4, 2, 3));
        assert_eq!(hsv.view().pixel(1, 0), &[60, 255, 255]);
        assert_eq!(hsv.view().pixel(2, 1), &[0, 255, 255]);
        assert_eq!(hsv.view().pixel(0, 0), &[0, 0, 0]);
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = load_hsv_frame("/nonexistent/frame.png").unwrap_err();
        assert!(matches!(err, FrameError::Decode(_)));
    }
}
