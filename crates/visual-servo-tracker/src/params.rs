use serde::{Deserialize, Serialize};

use crate::color::ColorRange;

/// How many tracked points the track path keeps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackRetention {
    /// Keep every point ever recorded.
    #[default]
    Unbounded,
    /// Ring buffer holding only the most recent `n` points.
    Latest(usize),
}

fn default_dilate_iterations() -> usize {
    1
}

/// Tracker configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    /// Target color and per-channel tolerance in HSV.
    pub color: ColorRange,
    /// Number of 3x3 dilation passes applied to the threshold mask.
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: usize,
    pub retention: TrackRetention,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            color: ColorRange::default(),
            dilate_iterations: default_dilate_iterations(),
            retention: TrackRetention::Unbounded,
        }
    }
}
