//! Image-plane to ground-plane mapping from four manual correspondences.

use nalgebra::Point2;
use visual_servo_core::{homography_from_4pt, Homography};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Number of correspondences a calibration needs.
pub const NUM_POINTS: usize = 4;

/// Ground-plane corners of the reference rectangle, in world units.
pub const DEFAULT_WORLD_POINTS: [[f64; 2]; NUM_POINTS] =
    [[175.0, 125.0], [175.0, 25.0], [275.0, 25.0], [275.0, 125.0]];

const SUMMARY_HEADER: &str = "Image-Plane -> Ground-Plane";

/// Errors returned by [`CalibrationMapper`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("calibration index {0} is outside 1..=4")]
    InvalidIndex(usize),
    #[error("calibration point {index} is not finite")]
    NonFinitePoint { index: usize },
    #[error("image points {missing:?} are not set")]
    MissingImagePoints { missing: Vec<usize> },
    #[error("calibration points are degenerate (three or more collinear)")]
    Degenerate,
    #[error("point maps to infinity on the ground plane")]
    PointAtInfinity,
}

/// Four (image point, world point) pairs plus the lazily derived
/// image-to-world homography.
///
/// Indices are 1-based, matching the numbering shown to the operator.
/// The transform is computed on the first [`transform`](Self::transform)
/// call and reused until [`invalidate_transform`](Self::invalidate_transform)
/// is called or the mapper is rebuilt from a stored state. Re-entering an
/// image point keeps the cached transform.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationMapper {
    image_points: [Option<Point2<f64>>; NUM_POINTS],
    world_points: [Point2<f64>; NUM_POINTS],
    cached: Option<Homography>,
}

fn slot(index: usize) -> Result<usize, CalibrationError> {
    if (1..=NUM_POINTS).contains(&index) {
        Ok(index - 1)
    } else {
        Err(CalibrationError::InvalidIndex(index))
    }
}

impl CalibrationMapper {
    /// Mapper for the default reference rectangle.
    pub fn new() -> Self {
        Self::with_world_points(DEFAULT_WORLD_POINTS.map(|[x, y]| Point2::new(x, y)))
    }

    pub fn with_world_points(world_points: [Point2<f64>; NUM_POINTS]) -> Self {
        Self {
            image_points: [None; NUM_POINTS],
            world_points,
            cached: None,
        }
    }

    /// Store the image point for correspondence `index`, replacing any
    /// previous value at that index.
    pub fn add_image_point(
        &mut self,
        index: usize,
        point: Point2<f64>,
    ) -> Result<(), CalibrationError> {
        let i = slot(index)?;
        if !(point.x.is_finite() && point.y.is_finite()) {
            return Err(CalibrationError::NonFinitePoint { index });
        }
        self.image_points[i] = Some(point);
        log::debug!("image point {index} set to ({}, {})", point.x, point.y);
        Ok(())
    }

    pub fn image_point(&self, index: usize) -> Result<Option<Point2<f64>>, CalibrationError> {
        Ok(self.image_points[slot(index)?])
    }

    pub fn world_point(&self, index: usize) -> Result<Point2<f64>, CalibrationError> {
        Ok(self.world_points[slot(index)?])
    }

    pub fn image_points(&self) -> &[Option<Point2<f64>>; NUM_POINTS] {
        &self.image_points
    }

    pub fn world_points(&self) -> &[Point2<f64>; NUM_POINTS] {
        &self.world_points
    }

    /// 1-based indices of image points that are still unset.
    pub fn missing_points(&self) -> Vec<usize> {
        self.image_points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(i, _)| i + 1)
            .collect()
    }

    pub fn is_transform_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// Image-to-world homography, derived on first use.
    ///
    /// Fails without caching anything if an image point is missing or the
    /// four points are degenerate.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn transform(&mut self) -> Result<Homography, CalibrationError> {
        if let Some(h) = self.cached {
            return Ok(h);
        }

        let missing = self.missing_points();
        if !missing.is_empty() {
            return Err(CalibrationError::MissingImagePoints { missing });
        }
        let mut src = [Point2::origin(); NUM_POINTS];
        for (dst, p) in src.iter_mut().zip(self.image_points.iter().flatten()) {
            *dst = *p;
        }

        let h = homography_from_4pt(&src, &self.world_points).ok_or(CalibrationError::Degenerate)?;
        log::info!("calibration transform derived: {:?}", h.to_array());
        self.cached = Some(h);
        Ok(h)
    }

    /// Map an image point onto the ground plane.
    pub fn image_to_world(&mut self, point: Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        self.transform()?
            .apply(point)
            .ok_or(CalibrationError::PointAtInfinity)
    }

    /// Drop the cached transform; the next query derives it again.
    pub fn invalidate_transform(&mut self) {
        if self.cached.take().is_some() {
            log::debug!("calibration transform invalidated");
        }
    }

    /// Header line plus one `image -> world` line per correspondence.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(NUM_POINTS + 1);
        lines.push(SUMMARY_HEADER.to_string());
        for (image, world) in self.image_points.iter().zip(&self.world_points) {
            let image = match image {
                Some(p) => fmt_point(p),
                None => "(unset)".to_string(),
            };
            lines.push(format!("{image} -> {}", fmt_point(world)));
        }
        lines
    }

    pub(crate) fn from_parts(
        image_points: [Option<Point2<f64>>; NUM_POINTS],
        world_points: [Point2<f64>; NUM_POINTS],
    ) -> Self {
        Self {
            image_points,
            world_points,
            cached: None,
        }
    }
}

impl Default for CalibrationMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_point(p: &Point2<f64>) -> String {
    format!("({:?}, {:?})", p.x, p.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const IMAGE: [[f64; 2]; 4] = [[120.0, 400.0], [140.0, 180.0], [500.0, 170.0], [530.0, 390.0]];

    fn calibrated() -> CalibrationMapper {
        let mut mapper = CalibrationMapper::new();
        for (i, [x, y]) in IMAGE.iter().enumerate() {
            mapper.add_image_point(i + 1, Point2::new(*x, *y)).expect("valid");
        }
        mapper
    }

    #[test]
    fn transform_maps_image_corners_onto_world_corners() {
        let mut mapper = calibrated();
        assert!(!mapper.is_transform_cached());
        let h = mapper.transform().expect("transform");
        assert!(mapper.is_transform_cached());

        for (i, [x, y]) in IMAGE.iter().enumerate() {
            let w = h.apply(Point2::new(*x, *y)).expect("finite");
            let expected = mapper.world_point(i + 1).expect("index");
            assert_abs_diff_eq!(w.x, expected.x, epsilon = 1e-6);
            assert_abs_diff_eq!(w.y, expected.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn missing_points_fail_without_caching() {
        let mut mapper = CalibrationMapper::new();
        mapper.add_image_point(1, Point2::new(1.0, 2.0)).expect("valid");
        mapper.add_image_point(3, Point2::new(5.0, 2.0)).expect("valid");

        assert_eq!(
            mapper.transform(),
            Err(CalibrationError::MissingImagePoints { missing: vec![2, 4] })
        );
        assert!(!mapper.is_transform_cached());
    }

    #[test]
    fn index_out_of_range_is_rejected() {
        let mut mapper = CalibrationMapper::new();
        let p = Point2::new(1.0, 1.0);
        assert_eq!(mapper.add_image_point(0, p), Err(CalibrationError::InvalidIndex(0)));
        assert_eq!(mapper.add_image_point(5, p), Err(CalibrationError::InvalidIndex(5)));
        assert_eq!(mapper.world_point(5), Err(CalibrationError::InvalidIndex(5)));
        assert_eq!(
            mapper.add_image_point(2, Point2::new(f64::NAN, 0.0)),
            Err(CalibrationError::NonFinitePoint { index: 2 })
        );
        assert_eq!(mapper.missing_points(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn same_index_overwrites_only_that_slot() {
        let mut mapper = calibrated();
        mapper.add_image_point(2, Point2::new(150.0, 175.0)).expect("valid");

        assert_eq!(mapper.image_point(2), Ok(Some(Point2::new(150.0, 175.0))));
        assert_eq!(mapper.image_point(1), Ok(Some(Point2::new(120.0, 400.0))));
        assert_eq!(mapper.image_point(3), Ok(Some(Point2::new(500.0, 170.0))));
        assert_eq!(mapper.image_point(4), Ok(Some(Point2::new(530.0, 390.0))));
    }

    #[test]
    fn cache_survives_point_reentry_until_invalidated() {
        let mut mapper = calibrated();
        let before = mapper.transform().expect("transform");

        mapper.add_image_point(2, Point2::new(150.0, 175.0)).expect("valid");
        assert_eq!(mapper.transform(), Ok(before));

        mapper.invalidate_transform();
        assert!(!mapper.is_transform_cached());
        let after = mapper.transform().expect("transform");
        assert_ne!(after, before);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let mut mapper = CalibrationMapper::new();
        for i in 1..=4 {
            mapper
                .add_image_point(i, Point2::new(10.0 * i as f64, 10.0 * i as f64))
                .expect("valid");
        }
        assert_eq!(mapper.transform(), Err(CalibrationError::Degenerate));
        assert!(!mapper.is_transform_cached());
    }

    #[test]
    fn image_to_world_uses_the_transform() {
        let mut mapper = calibrated();
        let w = mapper.image_to_world(Point2::new(140.0, 180.0)).expect("map");
        assert_abs_diff_eq!(w.x, 175.0, epsilon = 1e-6);
        assert_abs_diff_eq!(w.y, 25.0, epsilon = 1e-6);
        assert!(mapper.is_transform_cached());
    }

    #[test]
    fn summary_lists_every_pair() {
        let mut mapper = CalibrationMapper::new();
        mapper.add_image_point(1, Point2::new(120.0, 400.5)).expect("valid");
        let lines = mapper.summary();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Image-Plane -> Ground-Plane");
        assert_eq!(lines[1], "(120.0, 400.5) -> (175.0, 125.0)");
        assert_eq!(lines[2], "(unset) -> (175.0, 25.0)");
    }
}
