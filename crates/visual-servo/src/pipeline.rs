use nalgebra::Point2;
use visual_servo_calib::{CalibrationError, CalibrationMapper};
use visual_servo_core::ColorImageView;
use visual_servo_tracker::{ColorTracker, TrackError};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LocateError {
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}

/// A tracked point in both planes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetFix {
    pub image: Point2<i32>,
    pub world: Point2<f64>,
}

/// Tracker and calibration wired together.
#[derive(Clone, Debug)]
pub struct TargetLocator {
    tracker: ColorTracker,
    mapper: CalibrationMapper,
}

impl TargetLocator {
    pub fn new(tracker: ColorTracker, mapper: CalibrationMapper) -> Self {
        Self { tracker, mapper }
    }

    pub fn tracker(&self) -> &ColorTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut ColorTracker {
        &mut self.tracker
    }

    pub fn mapper(&self) -> &CalibrationMapper {
        &self.mapper
    }

    pub fn mapper_mut(&mut self) -> &mut CalibrationMapper {
        &mut self.mapper
    }

    fn fix(&mut self, image: Point2<i32>) -> Result<TargetFix, CalibrationError> {
        let world = self
            .mapper
            .image_to_world(Point2::new(image.x as f64, image.y as f64))?;
        Ok(TargetFix { image, world })
    }

    /// Centroid of the largest blob, mapped onto the ground plane.
    pub fn locate(&mut self, frame: &ColorImageView<'_>) -> Result<TargetFix, LocateError> {
        let image = self.tracker.center_of_mass(frame)?;
        Ok(self.fix(image)?)
    }

    /// Ground contacts of the `n` largest blobs, mapped onto the ground plane.
    pub fn ground_contacts(
        &mut self,
        frame: &ColorImageView<'_>,
        n: usize,
    ) -> Result<Vec<Option<TargetFix>>, CalibrationError> {
        self.tracker
            .ground_contacts(frame, n)
            .into_iter()
            .map(|slot| slot.map(|p| self.fix(p)).transpose())
            .collect()
    }
}
