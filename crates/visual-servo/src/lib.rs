//! Facade crate for the `visual-servo-*` workspace.
//!
//! - `visual_servo::core`: pixel buffers, homographies, logging.
//! - `visual_servo::tracker`: color segmentation, contour ranking, target points.
//! - `visual_servo::calib`: four-point image-to-ground calibration.
//! - `visual_servo::robot`: bus protocol, grabber, control loop, simulator.
//! - [`TargetLocator`]: tracker + calibration, frame in, ground-plane point out.
//! - `visual_servo::frame` (feature `image`): `image` crate adapters.
//!
//! ## Quickstart
//!
//! ```no_run
//! use visual_servo::calib::CalibrationMapper;
//! use visual_servo::tracker::{ColorRange, ColorTracker, TrackerParams};
//! use visual_servo::TargetLocator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = visual_servo::frame::load_hsv_frame("frame.png")?;
//! let tracker = ColorTracker::new(TrackerParams {
//!     color: ColorRange::around([60.0, 200.0, 200.0]),
//!     ..TrackerParams::default()
//! });
//! let mapper = CalibrationMapper::load_json("calibration.json")?;
//!
//! let mut locator = TargetLocator::new(tracker, mapper);
//! let fix = locator.locate(&frame.view())?;
//! println!("target at {:?} on the ground", fix.world);
//! # Ok(())
//! # }
//! ```

pub use visual_servo_calib as calib;
pub use visual_servo_core as core;
pub use visual_servo_robot as robot;
pub use visual_servo_tracker as tracker;

mod pipeline;

pub use pipeline::{LocateError, TargetFix, TargetLocator};

#[cfg(feature = "image")]
pub mod frame;
