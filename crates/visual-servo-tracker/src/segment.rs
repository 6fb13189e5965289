//! Color thresholding and morphological dilation.

use visual_servo_core::{ColorImageView, GrayImage};

use crate::color::ColorRange;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Mark every pixel whose channels all fall inside `range` with 255.
///
/// A frame without channels yields an empty mask.
pub fn in_range(frame: &ColorImageView<'_>, range: &ColorRange) -> GrayImage {
    let mut mask = GrayImage::new(frame.width, frame.height);
    if frame.channels == 0 {
        return mask;
    }
    for (dst, px) in mask
        .data
        .iter_mut()
        .zip(frame.data.chunks_exact(frame.channels))
    {
        if range.contains(px) {
            *dst = 255;
        }
    }
    mask
}

/// Dilate with a 3x3 rectangular structuring element.
///
/// Pixels outside the image never contribute, so a mask is not grown
/// inward from the border.
pub fn dilate(mask: &GrayImage, iterations: usize) -> GrayImage {
    let mut current = mask.clone();
    for _ in 0..iterations {
        current = dilate_once(&current);
    }
    current
}

fn dilate_once(src: &GrayImage) -> GrayImage {
    let (w, h) = (src.width, src.height);
    // separable: horizontal max, then vertical max
    let mut horizontal = GrayImage::new(w, h);
    for y in 0..h {
        let row = &src.data[y * w..(y + 1) * w];
        for x in 0..w {
            let lo = x.saturating_sub(1);
            let hi = (x + 1).min(w - 1);
            horizontal.data[y * w + x] = row[lo..=hi].iter().copied().max().unwrap_or(0);
        }
    }

    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        let lo = y.saturating_sub(1);
        let hi = (y + 1).min(h - 1);
        for x in 0..w {
            let mut v = 0;
            for yy in lo..=hi {
                v = v.max(horizontal.data[yy * w + x]);
            }
            out.data[y * w + x] = v;
        }
    }
    out
}

/// Threshold + dilate stage. Keeps the masks of the most recent call for
/// diagnostics; each call replaces them.
#[derive(Clone, Debug)]
pub struct ColorSegmenter {
    dilate_iterations: usize,
    mask: Option<GrayImage>,
    dilated: Option<GrayImage>,
}

impl ColorSegmenter {
    pub fn new(dilate_iterations: usize) -> Self {
        Self {
            dilate_iterations,
            mask: None,
            dilated: None,
        }
    }

    /// Segment `frame` and return the dilated mask.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, range), fields(width = frame.width, height = frame.height))
    )]
    pub fn segment(&mut self, frame: &ColorImageView<'_>, range: &ColorRange) -> &GrayImage {
        let mask = in_range(frame, range);
        let dilated = dilate(&mask, self.dilate_iterations);
        log::debug!(
            "segmented {}x{} frame: {} px in range, {} px after dilation",
            frame.width,
            frame.height,
            mask.count_nonzero(),
            dilated.count_nonzero()
        );
        self.mask = Some(mask);
        self.dilated.insert(dilated)
    }

    /// Raw threshold mask of the last call.
    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    /// Dilated mask of the last call.
    pub fn dilated_mask(&self) -> Option<&GrayImage> {
        self.dilated.as_ref()
    }
}

impl Default for ColorSegmenter {
    fn default() -> Self {
        Self::new(1)
    }
}
