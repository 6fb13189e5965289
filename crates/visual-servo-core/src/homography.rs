use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Projective transform between two planes, `dst ~ H * src`.
///
/// The matrix is kept normalized so that `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let mut rows = [[0.0; 3]; 3];
        for (r, row) in rows.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.h[(r, c)];
            }
        }
        rows
    }

    /// Map a point through the transform, dividing out the homogeneous scale.
    ///
    /// Returns `None` for points mapped onto the line at infinity.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Option<Point2<f64>> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        if w.abs() < f64::EPSILON {
            return None;
        }
        Some(Point2::new(v[0] / w, v[1] / w))
    }

    pub fn inverse(&self) -> Option<Self> {
        let inv = self.h.try_inverse()?;
        normalize_homography(inv).map(Self::new)
    }
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance to sqrt(2).
fn hartley_normalization(pts: &[Point2<f64>; 4]) -> ([Point2<f64>; 4], Matrix3<f64>) {
    let centroid = pts.iter().fold(Vector3::zeros(), |acc, p| {
        acc + Vector3::new(p.x, p.y, 0.0)
    }) / 4.0;
    let (cx, cy) = (centroid.x, centroid.y);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);

    let out = pts.map(|p| {
        let v = t * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0], v[1])
    });
    (out, t)
}

/// True when any three of the (normalized) points are collinear.
fn has_collinear_triple(pts: &[Point2<f64>; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().any(|&[i, j, k]| {
        let ab = pts[j] - pts[i];
        let ac = pts[k] - pts[i];
        (ab.x * ac.y - ab.y * ac.x).abs() < 1e-9
    })
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

/// Compute H such that `dst ~ H * src` from exactly four correspondences.
///
/// Point order must be consistent between `src` and `dst`. Returns `None`
/// when the configuration is degenerate (three or more collinear points,
/// repeated points).
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    // h11 x + h12 y + h13 - u h31 x - u h32 y = u
    // h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let (src_n, t_src) = hartley_normalization(src);
    let (dst_n, t_dst) = hartley_normalization(dst);
    if has_collinear_triple(&src_n) || has_collinear_triple(&dst_n) {
        return None;
    }

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for (k, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = r0 + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    if x.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let hn = Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    // H = T_dst^-1 * Hn * T_src
    let h = t_dst.try_inverse()? * hn * t_src;
    normalize_homography(h).map(Homography::new)
}
