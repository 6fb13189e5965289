use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image buffer length (expected {expected} bytes, got {got})")]
    InvalidBufferLength { expected: usize, got: usize },
    #[error("unsupported channel count {0} (expected 1..=4)")]
    UnsupportedChannels(usize),
    #[error("rgb to hsv conversion needs 3 or 4 channels, got {0}")]
    NotRgb(usize),
}

/// Borrowed interleaved multi-channel frame.
#[derive(Clone, Copy, Debug)]
pub struct ColorImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: &'a [u8], // row-major, interleaved, len = w*h*channels
}

impl<'a> ColorImageView<'a> {
    pub fn new(
        width: usize,
        height: usize,
        channels: usize,
        data: &'a [u8],
    ) -> Result<Self, ImageError> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &'a [u8] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }
}

/// Owned interleaved multi-channel frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColorImage {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<u8>,
}

impl ColorImage {
    pub fn from_raw(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, ImageError> {
        check_layout(width, height, channels, data.len())?;
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Frame filled with a single pixel value.
    ///
    /// At most four channels of `pixel` are kept; an empty pixel yields a
    /// single zero channel.
    pub fn filled(width: usize, height: usize, pixel: &[u8]) -> Self {
        let pixel: &[u8] = match pixel.len() {
            0 => &[0],
            n => &pixel[..n.min(4)],
        };
        let channels = pixel.len();
        let mut data = Vec::with_capacity(width * height * channels);
        for _ in 0..width * height {
            data.extend_from_slice(pixel);
        }
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    pub fn view(&self) -> ColorImageView<'_> {
        ColorImageView {
            width: self.width,
            height: self.height,
            channels: self.channels,
            data: &self.data,
        }
    }

    pub fn put_pixel(&mut self, x: usize, y: usize, pixel: &[u8]) {
        let start = (y * self.width + x) * self.channels;
        self.data[start..start + self.channels].copy_from_slice(&pixel[..self.channels]);
    }

    /// Paint an axis-aligned rectangle, clipped to the frame.
    pub fn fill_rect(&mut self, rect: PixelRect, pixel: &[u8]) {
        let x0 = rect.x.max(0) as usize;
        let y0 = rect.y.max(0) as usize;
        let x1 = ((rect.x + rect.width).max(0) as usize).min(self.width);
        let y1 = ((rect.y + rect.height).max(0) as usize).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                self.put_pixel(x, y, pixel);
            }
        }
    }

    /// Convert an RGB(A) frame into 8-bit HSV (H in [0,180), S and V in [0,255]).
    ///
    /// Alpha, when present, is dropped.
    pub fn rgb_to_hsv(&self) -> Result<ColorImage, ImageError> {
        if self.channels != 3 && self.channels != 4 {
            return Err(ImageError::NotRgb(self.channels));
        }
        let mut data = Vec::with_capacity(self.width * self.height * 3);
        for px in self.data.chunks_exact(self.channels) {
            data.extend_from_slice(&hsv_from_rgb(px[0], px[1], px[2]));
        }
        Ok(ColorImage {
            width: self.width,
            height: self.height,
            channels: 3,
            data,
        })
    }
}

fn check_layout(
    width: usize,
    height: usize,
    channels: usize,
    len: usize,
) -> Result<(), ImageError> {
    if channels == 0 || channels > 4 {
        return Err(ImageError::UnsupportedChannels(channels));
    }
    let expected = width * height * channels;
    if len != expected {
        return Err(ImageError::InvalidBufferLength { expected, got: len });
    }
    Ok(())
}

/// 8-bit RGB -> HSV using the OpenCV convention (hue halved to fit a byte).
pub fn hsv_from_rgb(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h8 = (h / 2.0).round() as u32 % 180;
    [h8 as u8, s.round() as u8, v as u8]
}

/// Single-channel 8-bit image. Binary masks use 0 / 255.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: u8) {
        self.data[y * self.width + x] = v;
    }

    pub fn count_nonzero(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }
}

/// Integer axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PixelRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}
