use crate::contour::Contour;

/// Pick the `k` largest contours by area.
///
/// The result always has exactly `k` slots; slots past the number of
/// available contours are `None`. Areas are compared at full precision and
/// exact ties keep discovery order, so no contour is ever lost to a
/// collision.
pub fn rank_contours(contours: &[Contour], k: usize) -> Vec<Option<&Contour>> {
    let mut by_area: Vec<(f64, &Contour)> = contours.iter().map(|c| (c.area(), c)).collect();
    // stable sort: equal areas stay in discovery order
    by_area.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut ranked: Vec<Option<&Contour>> =
        by_area.into_iter().take(k).map(|(_, c)| Some(c)).collect();
    ranked.resize(k, None);
    ranked
}

/// The single largest contour, if any.
pub fn largest_contour(contours: &[Contour]) -> Option<&Contour> {
    rank_contours(contours, 1).into_iter().next().flatten()
}
