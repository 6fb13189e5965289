//! Single-color blob tracking.
//!
//! Pipeline per frame:
//! - threshold an HSV frame around a [`ColorRange`] and dilate the mask
//!   ([`ColorSegmenter`]),
//! - trace external contours ([`find_external_contours`]) and rank them by
//!   area ([`rank_contours`]),
//! - reduce the winners to points: bounding-box center for single-target
//!   tracking, lowest contour point for ground contacts ([`ColorTracker`]).
//!
//! ```
//! use visual_servo_core::{ColorImage, PixelRect};
//! use visual_servo_tracker::{ColorRange, ColorTracker, TrackerParams};
//!
//! let mut frame = ColorImage::filled(64, 48, &[0, 0, 0]);
//! frame.fill_rect(PixelRect::new(10, 10, 9, 9), &[30, 220, 220]);
//!
//! let mut tracker = ColorTracker::new(TrackerParams {
//!     color: ColorRange::around([30.0, 220.0, 220.0]),
//!     ..TrackerParams::default()
//! });
//! let center = tracker.center_of_mass(&frame.view()).unwrap();
//! assert_eq!((center.x, center.y), (14, 14));
//! ```

mod color;
mod contour;
mod params;
mod rank;
mod segment;
mod tracker;

pub use color::{ColorRange, DEFAULT_TOLERANCE};
pub use contour::{find_external_contours, Contour};
pub use params::{TrackRetention, TrackerParams};
pub use rank::{largest_contour, rank_contours};
pub use segment::{dilate, in_range, ColorSegmenter};
pub use tracker::{ColorTracker, TrackError, TrackPath};
