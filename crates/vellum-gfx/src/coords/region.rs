/// Axis-aligned rectangle in pixels (top-left origin, +Y toward higher rows).
///
/// Used for destination scissor regions and source clip regions. An empty
/// region means "no restriction" wherever a draw accepts one.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Region covering a whole `width`×`height` image.
    #[inline]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    #[inline]
    pub fn max_x(self) -> f32 {
        self.x + self.width
    }

    #[inline]
    pub fn max_y(self) -> f32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains(self, x: f32, y: f32) -> bool {
        x >= self.x && y >= self.y && x < self.max_x() && y < self.max_y()
    }

    #[inline]
    pub fn intersect(self, other: Region) -> Option<Region> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());

        let w = x1 - x0;
        let h = y1 - y0;

        if w <= 0.0 || h <= 0.0 {
            None
        } else {
            Some(Region::new(x0, y0, w, h))
        }
    }

    /// Integer pixel bounds `(x0, y0, x1, y1)` covering this region.
    ///
    /// Fractional edges round outward so partially covered pixels are kept.
    #[inline]
    pub fn pixel_bounds(self) -> (i32, i32, i32, i32) {
        (
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.max_x().ceil() as i32,
            self.max_y().ceil() as i32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: f32, y: f32, w: f32, h: f32) -> Region { Region::new(x, y, w, h) }

    // ── contains ──────────────────────────────────────────────────────────

    #[test]
    fn contains_interior_point() {
        assert!(r(0.0, 0.0, 10.0, 10.0).contains(5.0, 5.0));
    }

    #[test]
    fn contains_top_left_inclusive() {
        assert!(r(0.0, 0.0, 10.0, 10.0).contains(0.0, 0.0));
    }

    #[test]
    fn contains_bottom_right_exclusive() {
        assert!(!r(0.0, 0.0, 10.0, 10.0).contains(10.0, 10.0));
    }

    // ── intersect ─────────────────────────────────────────────────────────

    #[test]
    fn intersect_overlapping() {
        let a = r(0.0, 0.0, 10.0, 10.0);
        let b = r(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(b), Some(r(5.0, 5.0, 5.0, 5.0)));
    }

    #[test]
    fn intersect_touching_edge_returns_none() {
        let a = r(0.0, 0.0, 10.0, 10.0);
        let b = r(10.0, 0.0, 10.0, 10.0);
        assert!(a.intersect(b).is_none());
    }

    #[test]
    fn intersect_disjoint_returns_none() {
        assert!(r(0.0, 0.0, 5.0, 5.0).intersect(r(20.0, 20.0, 5.0, 5.0)).is_none());
    }

    // ── pixel_bounds ──────────────────────────────────────────────────────

    #[test]
    fn pixel_bounds_round_outward() {
        assert_eq!(r(0.5, 1.25, 2.0, 2.0).pixel_bounds(), (0, 1, 3, 4));
    }

    #[test]
    fn from_size_is_not_empty() {
        assert!(!Region::from_size(1, 1).is_empty());
        assert!(Region::default().is_empty());
    }
}
