/// Point cloud coordinate bounds tracking
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCloudBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl Default for PointCloudBounds {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCloudBounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
            min_z: f64::INFINITY,
            max_z: f64::NEG_INFINITY,
        }
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
        self.min_z = self.min_z.min(z);
        self.max_z = self.max_z.max(z);
    }

    /// Combine two partial bounds, used when reducing parallel chunks
    pub fn merge(mut self, other: Self) -> Self {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.min_z = self.min_z.min(other.min_z);
        self.max_z = self.max_z.max(other.max_z);
        self
    }

    /// True until at least one point has been added
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x
    }

    /// Get world space dimensions
    pub fn dimensions(&self) -> (f64, f64, f64) {
        (
            self.max_x - self.min_x,
            self.max_y - self.min_y,
            self.max_z - self.min_z,
        )
    }

    /// Horizontal footprint in square map units
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let (width, height, _) = self.dimensions();
        width * height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both_inputs() {
        let mut a = PointCloudBounds::new();
        a.update(0.0, 0.0, 5.0);
        let mut b = PointCloudBounds::new();
        b.update(10.0, -2.0, 1.0);

        let merged = a.merge(b);
        assert_eq!(merged.min_x, 0.0);
        assert_eq!(merged.max_x, 10.0);
        assert_eq!(merged.min_y, -2.0);
        assert_eq!(merged.min_z, 1.0);
        assert_eq!(merged.max_z, 5.0);
        assert_eq!(merged.area(), 20.0);
    }

    #[test]
    fn empty_bounds_have_no_area() {
        let bounds = PointCloudBounds::new();
        assert!(bounds.is_empty());
        assert_eq!(bounds.area(), 0.0);
    }
}
