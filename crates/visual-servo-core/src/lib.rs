//! Core types and utilities shared by the visual-servo crates.
//!
//! This crate is intentionally small. It knows about pixel buffers,
//! plane-to-plane homographies and how the workspace logs; it does *not*
//! know about colors to track, calibration targets or robot hardware.

mod homography;
mod image;
mod logger;

pub use homography::{homography_from_4pt, Homography};
pub use image::{hsv_from_rgb, ColorImage, ColorImageView, GrayImage, ImageError, PixelRect};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, TraceLog};
