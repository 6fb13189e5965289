use serde::{Deserialize, Serialize};

/// Per-channel tolerance used when none is configured.
pub const DEFAULT_TOLERANCE: [f64; 3] = [25.0, 25.0, 25.0];

/// Target color plus symmetric per-channel tolerance.
///
/// Bounds are derived eagerly: every setter recomputes them, so they are never
/// stale. Channels 0..3 are *not* clamped to the byte range; a negative lower
/// bound or an upper bound above 255 simply makes that side of the check
/// always pass. The fourth channel (alpha) always spans `[0, 255]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "ColorRangeRepr", into = "ColorRangeRepr")]
pub struct ColorRange {
    target: [f64; 3],
    tolerance: [f64; 3],
    lower: [f64; 4],
    upper: [f64; 4],
}

/// Serialized form: only the inputs, bounds are rebuilt on load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct ColorRangeRepr {
    target: [f64; 3],
    #[serde(default = "default_tolerance")]
    tolerance: [f64; 3],
}

fn default_tolerance() -> [f64; 3] {
    DEFAULT_TOLERANCE
}

impl From<ColorRangeRepr> for ColorRange {
    fn from(repr: ColorRangeRepr) -> Self {
        Self::new(repr.target, repr.tolerance)
    }
}

impl From<ColorRange> for ColorRangeRepr {
    fn from(range: ColorRange) -> Self {
        Self {
            target: range.target,
            tolerance: range.tolerance,
        }
    }
}

impl ColorRange {
    pub fn new(target: [f64; 3], tolerance: [f64; 3]) -> Self {
        let mut range = Self {
            target,
            tolerance,
            lower: [0.0; 4],
            upper: [0.0; 4],
        };
        range.recompute_bounds();
        range
    }

    /// Range around `target` with [`DEFAULT_TOLERANCE`].
    pub fn around(target: [f64; 3]) -> Self {
        Self::new(target, DEFAULT_TOLERANCE)
    }

    pub fn target(&self) -> [f64; 3] {
        self.target
    }

    pub fn tolerance(&self) -> [f64; 3] {
        self.tolerance
    }

    pub fn set_target(&mut self, target: [f64; 3]) {
        self.target = target;
        self.recompute_bounds();
    }

    pub fn set_tolerance(&mut self, tolerance: [f64; 3]) {
        self.tolerance = tolerance;
        self.recompute_bounds();
    }

    pub fn lower_bound(&self) -> [f64; 4] {
        self.lower
    }

    pub fn upper_bound(&self) -> [f64; 4] {
        self.upper
    }

    /// True when every channel of `pixel` lies inside the inclusive bounds.
    /// Channels past the fourth are not checked.
    #[inline]
    pub fn contains(&self, pixel: &[u8]) -> bool {
        pixel
            .iter()
            .zip(self.lower.iter().zip(&self.upper))
            .all(|(&v, (&lo, &hi))| {
                let v = v as f64;
                v >= lo && v <= hi
            })
    }

    fn recompute_bounds(&mut self) {
        for c in 0..3 {
            self.lower[c] = self.target[c] - self.tolerance[c];
            self.upper[c] = self.target[c] + self.tolerance[c];
        }
        self.lower[3] = 0.0;
        self.upper[3] = 255.0;
    }
}

impl Default for ColorRange {
    fn default() -> Self {
        Self::around([0.0; 3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_every_setter() {
        let mut range = ColorRange::around([100.0, 150.0, 200.0]);
        assert_eq!(range.lower_bound(), [75.0, 125.0, 175.0, 0.0]);
        assert_eq!(range.upper_bound(), [125.0, 175.0, 225.0, 255.0]);

        range.set_tolerance([10.0, 0.0, 5.0]);
        assert_eq!(range.lower_bound(), [90.0, 150.0, 195.0, 0.0]);

        range.set_target([0.0, 0.0, 0.0]);
        assert_eq!(range.upper_bound(), [10.0, 0.0, 5.0, 255.0]);
    }

    #[test]
    fn bounds_are_not_clamped() {
        let range = ColorRange::around([10.0, 250.0, 0.0]);
        assert_eq!(range.lower_bound()[0], -15.0);
        assert_eq!(range.upper_bound()[1], 275.0);
        assert!(range.contains(&[0, 255, 25]));
        assert!(!range.contains(&[0, 255, 26]));
    }

    #[test]
    fn alpha_channel_is_ignored() {
        let range = ColorRange::around([100.0, 100.0, 100.0]);
        assert!(range.contains(&[100, 100, 100, 0]));
        assert!(range.contains(&[100, 100, 100, 255]));
    }

    #[test]
    fn channels_past_alpha_are_not_checked() {
        let range = ColorRange::around([100.0, 100.0, 100.0]);
        assert!(range.contains(&[100, 100, 100, 0, 7, 9]));
    }

    #[test]
    fn deserialized_range_has_fresh_bounds() {
        let range: ColorRange =
            serde_json::from_str(r#"{"target":[60.0,200.0,200.0]}"#).expect("json");
        assert_eq!(range.tolerance(), DEFAULT_TOLERANCE);
        assert_eq!(range.lower_bound(), [35.0, 175.0, 175.0, 0.0]);
    }
}
