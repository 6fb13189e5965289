//! Four-point calibration between the camera image plane and the ground
//! plane the robot drives on.
//!
//! The operator clicks the four corners of a reference rectangle whose
//! ground-plane coordinates are known; [`CalibrationMapper`] derives the
//! image-to-world homography once and caches it. The point lists can be
//! passed between processes ([`CalibrationMapper::to_bytes`]) or stored as
//! versioned JSON ([`CalibrationMapper::write_json`]).

mod io;
mod mapper;

pub use io::{CalibrationFile, CalibrationIoError, CalibrationState, CALIBRATION_FILE_VERSION};
pub use mapper::{CalibrationError, CalibrationMapper, DEFAULT_WORLD_POINTS, NUM_POINTS};
