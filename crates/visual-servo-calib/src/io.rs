//! Calibration interchange: compact binary for hand-off between processes,
//! versioned JSON for storage.
//!
//! Both codecs encode the same [`CalibrationState`]; the derived transform
//! is never stored, so every decoded mapper starts with an empty cache.

use std::{fs, path::Path};

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::mapper::{CalibrationMapper, NUM_POINTS};

/// Version written into calibration files.
pub const CALIBRATION_FILE_VERSION: u32 = 1;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("unsupported calibration file version {found} (expected 1)")]
    UnsupportedVersion { found: u32 },
    #[error("invalid calibration state: {0}")]
    InvalidState(String),
}

/// Ordered point lists of a calibration, image plane and world plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub image_points: Vec<Option<[f64; 2]>>,
    pub world_points: Vec<[f64; 2]>,
}

impl CalibrationState {
    fn check(&self) -> Result<(), CalibrationIoError> {
        if self.image_points.len() != NUM_POINTS || self.world_points.len() != NUM_POINTS {
            return Err(CalibrationIoError::InvalidState(format!(
                "expected {NUM_POINTS} image and world points, got {} and {}",
                self.image_points.len(),
                self.world_points.len()
            )));
        }
        let finite = self
            .image_points
            .iter()
            .flatten()
            .chain(self.world_points.iter())
            .all(|p| p[0].is_finite() && p[1].is_finite());
        if !finite {
            return Err(CalibrationIoError::InvalidState(
                "non-finite coordinate".to_string(),
            ));
        }
        Ok(())
    }
}

/// On-disk calibration document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub version: u32,
    #[serde(flatten)]
    pub state: CalibrationState,
}

impl CalibrationMapper {
    pub fn to_state(&self) -> CalibrationState {
        CalibrationState {
            image_points: self
                .image_points()
                .iter()
                .map(|p| p.map(|p| [p.x, p.y]))
                .collect(),
            world_points: self.world_points().iter().map(|p| [p.x, p.y]).collect(),
        }
    }

    /// Rebuild a mapper from its point lists. The transform is not cached.
    pub fn from_state(state: &CalibrationState) -> Result<Self, CalibrationIoError> {
        state.check()?;
        let mut image = [None; NUM_POINTS];
        let mut world = [Point2::origin(); NUM_POINTS];
        for (dst, src) in image.iter_mut().zip(&state.image_points) {
            *dst = src.map(|[x, y]| Point2::new(x, y));
        }
        for (dst, [x, y]) in world.iter_mut().zip(&state.world_points) {
            *dst = Point2::new(*x, *y);
        }
        Ok(Self::from_parts(image, world))
    }

    /// Compact binary encoding for passing the calibration between processes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CalibrationIoError> {
        Ok(bincode::serialize(&self.to_state())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CalibrationIoError> {
        let state: CalibrationState = bincode::deserialize(bytes)?;
        Self::from_state(&state)
    }

    pub fn to_file(&self) -> CalibrationFile {
        CalibrationFile {
            version: CALIBRATION_FILE_VERSION,
            state: self.to_state(),
        }
    }

    pub fn from_file(file: &CalibrationFile) -> Result<Self, CalibrationIoError> {
        if file.version != CALIBRATION_FILE_VERSION {
            return Err(CalibrationIoError::UnsupportedVersion {
                found: file.version,
            });
        }
        Self::from_state(&file.state)
    }

    /// Load a calibration from JSON on disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, CalibrationIoError> {
        let raw = fs::read_to_string(path)?;
        let file: CalibrationFile = serde_json::from_str(&raw)?;
        Self::from_file(&file)
    }

    /// Write this calibration to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), CalibrationIoError> {
        let json = serde_json::to_string_pretty(&self.to_file())?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Replace the point lists with a stored state and drop the cached
    /// transform.
    pub fn reload(&mut self, state: &CalibrationState) -> Result<(), CalibrationIoError> {
        *self = Self::from_state(state)?;
        log::debug!("calibration reloaded, transform cache cleared");
        Ok(())
    }
}
