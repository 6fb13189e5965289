//! External contour extraction from binary masks.
//!
//! Foreground is 8-connected, background 4-connected. Only outermost
//! borders are reported: a blob sitting inside the hole of another blob is
//! skipped, and holes themselves never produce contours. Borders are traced
//! with Suzuki-Abe border following and then compressed to the vertices where
//! the chain direction changes.

use std::collections::VecDeque;

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};
use visual_servo_core::{GrayImage, PixelRect};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// 8-neighborhood offsets, counter-clockwise on screen starting east.
const NEIGHBORHOOD: [[i32; 2]; 8] = [
    [1, 0],
    [1, -1],
    [0, -1],
    [-1, -1],
    [-1, 0],
    [-1, 1],
    [0, 1],
    [1, 1],
];
const WEST: usize = 4;

/// Closed polygon bounding one connected mask region, in pixel coordinates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contour {
    pub points: Vec<Point2<i32>>,
}

impl Contour {
    pub fn new(points: Vec<Point2<i32>>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Unsigned polygon area (shoelace formula).
    pub fn area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let twice: i64 = (0..n)
            .map(|i| {
                let a = self.points[i];
                let b = self.points[(i + 1) % n];
                a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
            })
            .sum();
        (twice as f64 / 2.0).abs()
    }

    /// Smallest upright rectangle containing every point (inclusive pixels).
    pub fn bounding_rect(&self) -> PixelRect {
        let Some(first) = self.points.first() else {
            return PixelRect::default();
        };
        let (mut min, mut max) = (*first, *first);
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        PixelRect::new(min.x, min.y, max.x - min.x + 1, max.y - min.y + 1)
    }

    /// Point with the largest `y`, i.e. closest to the bottom of the frame.
    /// The first such point in contour order wins.
    pub fn lowest_point(&self) -> Option<Point2<i32>> {
        let mut best: Option<Point2<i32>> = None;
        for &p in &self.points {
            if best.map_or(true, |b| p.y > b.y) {
                best = Some(p);
            }
        }
        best
    }
}

/// Padded label grid: one pixel of background around the mask.
struct Labels {
    width: usize,
    labels: Vec<u32>,
}

impl Labels {
    #[inline]
    fn at(&self, x: i32, y: i32) -> u32 {
        self.labels[y as usize * self.width + x as usize]
    }
}

/// Extract the outermost contours of all mask blobs, in raster discovery order.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(mask), fields(width = mask.width, height = mask.height))
)]
pub fn find_external_contours(mask: &GrayImage) -> Vec<Contour> {
    let (pw, ph) = (mask.width + 2, mask.height + 2);
    let mut labels = vec![0u32; pw * ph];
    for y in 0..mask.height {
        for x in 0..mask.width {
            if mask.get(x, y) != 0 {
                labels[(y + 1) * pw + x + 1] = u32::MAX;
            }
        }
    }

    let starts = label_components(&mut labels, pw, ph);
    if starts.is_empty() {
        return Vec::new();
    }
    let external = external_components(&labels, pw, ph, starts.len());
    let grid = Labels { width: pw, labels };

    let mut contours = Vec::new();
    for (idx, &start) in starts.iter().enumerate() {
        if !external[idx] {
            continue;
        }
        let chain = follow_border(&grid, start, idx as u32 + 1);
        let points = compress_chain(&chain)
            .into_iter()
            .map(|p| Point2::new(p.x - 1, p.y - 1))
            .collect();
        contours.push(Contour::new(points));
    }
    contours
}

/// Label 8-connected foreground components (marked `u32::MAX`) with 1.. and
/// return the first raster pixel of each.
fn label_components(labels: &mut [u32], pw: usize, ph: usize) -> Vec<Point2<i32>> {
    let mut starts = Vec::new();
    let mut queue = VecDeque::new();
    for y in 1..ph - 1 {
        for x in 1..pw - 1 {
            if labels[y * pw + x] != u32::MAX {
                continue;
            }
            let label = starts.len() as u32 + 1;
            starts.push(Point2::new(x as i32, y as i32));
            labels[y * pw + x] = label;
            queue.push_back((x, y));
            while let Some((cx, cy)) = queue.pop_front() {
                for [dx, dy] in NEIGHBORHOOD {
                    let nx = (cx as i32 + dx) as usize;
                    let ny = (cy as i32 + dy) as usize;
                    let n = ny * pw + nx;
                    if labels[n] == u32::MAX {
                        labels[n] = label;
                        queue.push_back((nx, ny));
                    }
                }
            }
        }
    }
    starts
}

/// A component is external when it touches the background region connected
/// to the image border.
fn external_components(labels: &[u32], pw: usize, ph: usize, count: usize) -> Vec<bool> {
    let mut outside = vec![false; pw * ph];
    let mut queue = VecDeque::from([(0usize, 0usize)]);
    outside[0] = true;
    while let Some((x, y)) = queue.pop_front() {
        for [dx, dy] in [[1i32, 0i32], [-1, 0], [0, 1], [0, -1]] {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if nx < 0 || ny < 0 || nx >= pw as i32 || ny >= ph as i32 {
                continue;
            }
            let n = ny as usize * pw + nx as usize;
            if !outside[n] && labels[n] == 0 {
                outside[n] = true;
                queue.push_back((nx as usize, ny as usize));
            }
        }
    }

    let mut external = vec![false; count];
    for y in 1..ph - 1 {
        for x in 1..pw - 1 {
            let label = labels[y * pw + x];
            if label == 0 || external[label as usize - 1] {
                continue;
            }
            let touches = [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]
                .iter()
                .any(|&(nx, ny)| outside[ny * pw + nx]);
            if touches {
                external[label as usize - 1] = true;
            }
        }
    }
    external
}

/// Trace the outer border of component `label` starting at its first raster
/// pixel (whose west neighbor is background).
fn follow_border(grid: &Labels, start: Point2<i32>, label: u32) -> Vec<Point2<i32>> {
    let step = |p: Point2<i32>, d: usize| {
        Point2::new(p.x + NEIGHBORHOOD[d][0], p.y + NEIGHBORHOOD[d][1])
    };

    // clockwise from west for the first neighbor
    let first = (1..8)
        .map(|k| (WEST + 8 - k) & 7)
        .find(|&d| {
            let q = step(start, d);
            grid.at(q.x, q.y) == label
        });
    let Some(first_dir) = first else {
        return vec![start];
    };

    let p1 = step(start, first_dir);
    let mut chain = Vec::new();
    let mut current = start;
    // direction from `current` back to the previously visited pixel
    let mut back = first_dir;
    loop {
        let mut next_dir = back;
        for k in 1..=8 {
            let d = (back + k) & 7;
            let q = step(current, d);
            if grid.at(q.x, q.y) == label {
                next_dir = d;
                break;
            }
        }
        chain.push(current);
        let next = step(current, next_dir);
        if next == start && current == p1 {
            break;
        }
        current = next;
        back = (next_dir + 4) & 7;
    }
    chain
}

/// Keep only vertices where the chain direction changes.
fn compress_chain(chain: &[Point2<i32>]) -> Vec<Point2<i32>> {
    let n = chain.len();
    if n < 3 {
        return chain.to_vec();
    }
    let dir = |a: Point2<i32>, b: Point2<i32>| -> Vector2<i32> { b - a };
    (0..n)
        .filter(|&i| {
            let prev = chain[(i + n - 1) % n];
            let next = chain[(i + 1) % n];
            dir(prev, chain[i]) != dir(chain[i], next)
        })
        .map(|i| chain[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&str]) -> GrayImage {
        let mut mask = GrayImage::new(rows[0].len(), rows.len());
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.bytes().enumerate() {
                if c == b'#' {
                    mask.set(x, y, 255);
                }
            }
        }
        mask
    }

    fn fill(mask: &mut GrayImage, rect: PixelRect) {
        for y in rect.y..rect.y + rect.height {
            for x in rect.x..rect.x + rect.width {
                mask.set(x as usize, y as usize, 255);
            }
        }
    }

    #[test]
    fn empty_mask_has_no_contours() {
        assert!(find_external_contours(&GrayImage::new(8, 8)).is_empty());
    }

    #[test]
    fn filled_square_compresses_to_corners() {
        let mut mask = GrayImage::new(10, 10);
        fill(&mut mask, PixelRect::new(2, 3, 4, 4));
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);

        let c = &contours[0];
        assert_eq!(c.len(), 4);
        for corner in [
            Point2::new(2, 3),
            Point2::new(5, 3),
            Point2::new(5, 6),
            Point2::new(2, 6),
        ] {
            assert!(c.points.contains(&corner), "missing {corner:?}");
        }
        assert_eq!(c.area(), 9.0);
        assert_eq!(c.bounding_rect(), PixelRect::new(2, 3, 4, 4));
    }

    #[test]
    fn single_pixel_is_a_degenerate_contour() {
        let mask = mask_from_rows(&["...", ".#.", "..."]);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].points, vec![Point2::new(1, 1)]);
        assert_eq!(contours[0].area(), 0.0);
    }

    #[test]
    fn ring_reports_only_the_outer_border() {
        let mask = mask_from_rows(&[
            ".......", //
            ".#####.", //
            ".#...#.", //
            ".#.#.#.", //
            ".#...#.", //
            ".#####.", //
            ".......",
        ]);
        // the inner dot lives inside the hole and is not external
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_rect(), PixelRect::new(1, 1, 5, 5));
        assert_eq!(contours[0].area(), 16.0);
    }

    #[test]
    fn diagonal_pixels_form_one_blob() {
        let mask = mask_from_rows(&["#..", ".#.", "..#"]);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].bounding_rect(), PixelRect::new(0, 0, 3, 3));
    }

    #[test]
    fn blobs_touching_the_border_are_traced() {
        let mask = mask_from_rows(&["##..", "##..", "...#"]);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].bounding_rect(), PixelRect::new(0, 0, 2, 2));
        assert_eq!(contours[1].points, vec![Point2::new(3, 2)]);
    }

    #[test]
    fn lowest_point_prefers_first_on_ties() {
        let c = Contour::new(vec![
            Point2::new(0, 0),
            Point2::new(4, 7),
            Point2::new(1, 7),
            Point2::new(2, 3),
        ]);
        assert_eq!(c.lowest_point(), Some(Point2::new(4, 7)));
        assert_eq!(Contour::new(Vec::new()).lowest_point(), None);
    }

    #[test]
    fn thin_concave_shape_keeps_corner_area() {
        let mask = mask_from_rows(&[
            "......", //
            ".####.", //
            ".#....", //
            ".####.", //
            "......",
        ]);
        let contours = find_external_contours(&mask);
        assert_eq!(contours.len(), 1);
        // the chain runs along pixel centers; only the two diagonal
        // shortcuts at the inner corners enclose any area
        assert_eq!(contours[0].area(), 1.0);
        assert_eq!(contours[0].bounding_rect(), PixelRect::new(1, 1, 4, 3));
    }
}
