//! Single-color target tracker: segmentation, ranking and point extraction.

use std::collections::VecDeque;

use nalgebra::Point2;
use visual_servo_core::{ColorImageView, GrayImage, PixelRect};

use crate::color::ColorRange;
use crate::contour::{find_external_contours, Contour};
use crate::params::{TrackRetention, TrackerParams};
use crate::rank::rank_contours;
use crate::segment::ColorSegmenter;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by the tracker.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("no contour of the target color in frame")]
    NoContour,
}

/// History of tracked points, oldest first.
#[derive(Clone, Debug, Default)]
pub struct TrackPath {
    points: VecDeque<Point2<i32>>,
    retention: TrackRetention,
}

impl TrackPath {
    pub fn new(retention: TrackRetention) -> Self {
        Self {
            points: VecDeque::new(),
            retention,
        }
    }

    pub fn retention(&self) -> TrackRetention {
        self.retention
    }

    /// Append a point, evicting the oldest ones if retention is bounded.
    pub fn push(&mut self, p: Point2<i32>) {
        if let TrackRetention::Latest(n) = self.retention {
            if n == 0 {
                return;
            }
            while self.points.len() >= n {
                self.points.pop_front();
            }
        }
        self.points.push_back(p);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<Point2<i32>> {
        self.points.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point2<i32>> + '_ {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<Point2<i32>> {
        self.points.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// Tracks a colored blob across frames.
///
/// Frames are HSV color views (see [`visual_servo_core::hsv_from_rgb`]). Every
/// call replaces the diagnostics of the previous one: masks, contour list and
/// bounding rectangles.
#[derive(Clone, Debug)]
pub struct ColorTracker {
    color: ColorRange,
    segmenter: ColorSegmenter,
    contours: Vec<Contour>,
    bounding_rects: Vec<PixelRect>,
    path: TrackPath,
}

impl ColorTracker {
    pub fn new(params: TrackerParams) -> Self {
        Self {
            color: params.color,
            segmenter: ColorSegmenter::new(params.dilate_iterations),
            contours: Vec::new(),
            bounding_rects: Vec::new(),
            path: TrackPath::new(params.retention),
        }
    }

    pub fn color(&self) -> &ColorRange {
        &self.color
    }

    pub fn set_color(&mut self, target: [f64; 3]) {
        self.color.set_target(target);
    }

    pub fn set_tolerance(&mut self, tolerance: [f64; 3]) {
        self.color.set_tolerance(tolerance);
    }

    /// Center of the bounding box of the largest blob, appended to the
    /// track path.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(width = frame.width, height = frame.height))
    )]
    pub fn center_of_mass(&mut self, frame: &ColorImageView<'_>) -> Result<Point2<i32>, TrackError> {
        self.detect(frame);
        let ranked = rank_contours(&self.contours, 1);
        let rect = match ranked.first().copied().flatten() {
            Some(largest) => largest.bounding_rect(),
            None => {
                self.bounding_rects.clear();
                log::debug!("no target blob among {} contours", self.contours.len());
                return Err(TrackError::NoContour);
            }
        };

        let center = Point2::new(rect.x + rect.width / 2, rect.y + rect.height / 2);
        self.bounding_rects = vec![rect];
        self.path.push(center);
        log::debug!(
            "target at ({}, {}), rect {}x{}",
            center.x,
            center.y,
            rect.width,
            rect.height
        );
        Ok(center)
    }

    /// Lowest point (largest y) of each of the `n` largest blobs, in rank
    /// order. Slots without a blob are `None`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(width = frame.width, height = frame.height))
    )]
    pub fn ground_contacts(
        &mut self,
        frame: &ColorImageView<'_>,
        n: usize,
    ) -> Vec<Option<Point2<i32>>> {
        self.detect(frame);
        let ranked = rank_contours(&self.contours, n);

        let mut rects = Vec::with_capacity(n);
        let contacts: Vec<Option<Point2<i32>>> = ranked
            .into_iter()
            .map(|slot| {
                let contour = slot?;
                rects.push(contour.bounding_rect());
                contour.lowest_point()
            })
            .collect();
        self.bounding_rects = rects;

        log::debug!(
            "{} of {} ground contacts found",
            contacts.iter().filter(|c| c.is_some()).count(),
            n
        );
        contacts
    }

    fn detect(&mut self, frame: &ColorImageView<'_>) {
        let mask = self.segmenter.segment(frame, &self.color);
        self.contours = find_external_contours(mask);
    }

    /// Contours found in the last frame, in discovery order.
    pub fn contours(&self) -> &[Contour] {
        &self.contours
    }

    /// Bounding rectangles of the contours used by the last call.
    pub fn bounding_rects(&self) -> &[PixelRect] {
        &self.bounding_rects
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.segmenter.mask()
    }

    pub fn dilated_mask(&self) -> Option<&GrayImage> {
        self.segmenter.dilated_mask()
    }

    pub fn track_path(&self) -> &TrackPath {
        &self.path
    }

    pub fn clear_track_path(&mut self) {
        self.path.clear();
    }
}

impl Default for ColorTracker {
    fn default() -> Self {
        Self::new(TrackerParams::default())
    }
}
