//! Axis-aligned bounding boxes in f32 scene space.

use glam::Vec3;

/// Axis-aligned bounding box.
///
/// Invariant: `min.x <= max.x`, `min.y <= max.y`, `min.z <= max.z`.
/// The constructor enforces this by sorting components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Vec3,
    /// Maximum corner of the bounding box.
    pub max: Vec3,
}

impl Aabb {
    /// Create an AABB from two corners. Automatically sorts
    /// components so that min <= max on every axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create an AABB from a center point and a uniform edge length.
    pub fn from_center_size(center: Vec3, size: f32) -> Self {
        let half = Vec3::splat(size.abs() * 0.5);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Returns the center point of the AABB.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns the half-extents (half-size along each axis).
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Return a copy scaled about its own center by `factor`.
    ///
    /// Used for buffered frustum tests: inflating the box by the frustum
    /// buffer multiplier is equivalent to expanding the frustum by the
    /// same factor for these symmetric node boxes.
    pub fn inflated(&self, factor: f32) -> Self {
        let center = self.center();
        let half = self.extents() * factor;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Corners passed in any order should produce a sorted min/max pair.
    #[test]
    fn test_new_sorts_corners() {
        let aabb = Aabb::new(Vec3::new(5.0, -1.0, 3.0), Vec3::new(-2.0, 4.0, 0.0));
        assert_eq!(aabb.min, Vec3::new(-2.0, -1.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(5.0, 4.0, 3.0));
    }

    /// A box built from center and size should be centered on that point.
    #[test]
    fn test_from_center_size() {
        let aabb = Aabb::from_center_size(Vec3::new(10.0, 20.0, 30.0), 4.0);
        assert_eq!(aabb.center(), Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(aabb.extents(), Vec3::splat(2.0));
    }

    /// Inflation should scale extents while keeping the center fixed.
    #[test]
    fn test_inflated_keeps_center() {
        let aabb = Aabb::from_center_size(Vec3::new(1.0, 2.0, 3.0), 2.0);
        let bigger = aabb.inflated(1.5);
        assert_eq!(bigger.center(), aabb.center());
        assert_eq!(bigger.extents(), Vec3::splat(1.5));
    }

    /// Boundary points count as contained.
    #[test]
    fn test_contains_boundary_point() {
        let aabb = Aabb::from_center_size(Vec3::ZERO, 2.0);
        assert!(aabb.contains_point(Vec3::new(1.0, 0.0, 0.0)));
        assert!(!aabb.contains_point(Vec3::new(1.01, 0.0, 0.0)));
    }
}
