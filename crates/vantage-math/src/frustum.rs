//! View-frustum culling using f32 AABB tests against view-projection planes.

use glam::{Mat4, Vec3, Vec4};

use crate::Aabb;

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A view frustum defined by six inward-pointing planes extracted from
/// the view-projection matrix.
#[derive(Clone, Debug)]
pub struct Frustum {
    /// Six planes: left, right, bottom, top, near, far.
    /// Each `Vec4(a, b, c, d)` where `(a,b,c)` is the normalized inward
    /// normal and `d` is the signed distance term.
    planes: [Vec4; 6],
}

impl Frustum {
    /// Extract frustum planes from a combined view-projection matrix
    /// using the Griggs-Hartmann method.
    ///
    /// Works with both perspective and orthographic projections.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [Vec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[3] + rows[2];
        planes[FAR] = rows[3] - rows[2];

        // Normalize each plane so that (a,b,c) is a unit vector.
        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Test whether an AABB is at least partially inside the frustum.
    ///
    /// Uses the p-vertex (positive vertex) method: for each plane, find
    /// the corner of the AABB furthest along the plane normal. If that
    /// corner is behind the plane, the entire AABB is outside.
    ///
    /// This is conservative — it may return `true` for some AABBs that
    /// are fully outside (false positives near frustum corners), but
    /// never returns `false` for visible objects.
    pub fn is_visible(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let normal = plane.truncate();
            let d = plane.w;

            // Positive vertex: the corner furthest along the plane normal.
            let p = Vec3::new(
                if normal.x >= 0.0 {
                    aabb.max.x
                } else {
                    aabb.min.x
                },
                if normal.y >= 0.0 {
                    aabb.max.y
                } else {
                    aabb.min.y
                },
                if normal.z >= 0.0 {
                    aabb.max.z
                } else {
                    aabb.min.z
                },
            );

            if normal.dot(p) + d < 0.0 {
                return false;
            }
        }
        true
    }

    /// Buffered visibility test: the AABB is inflated about its center by
    /// `buffer_multiplier` before the containment test, so nodes just
    /// outside the view cone are still treated as in-view.
    pub fn is_visible_buffered(&self, aabb: &Aabb, buffer_multiplier: f32) -> bool {
        self.is_visible(&aabb.inflated(buffer_multiplier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frustum() -> Frustum {
        // Perspective camera at origin looking down -Z.
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    /// A box directly in front of the camera should be visible.
    #[test]
    fn test_box_in_front_is_visible() {
        let frustum = test_frustum();
        let aabb = Aabb::from_center_size(Vec3::new(0.0, 0.0, -50.0), 10.0);
        assert!(frustum.is_visible(&aabb));
    }

    /// A box behind the camera should be culled.
    #[test]
    fn test_box_behind_is_culled() {
        let frustum = test_frustum();
        let aabb = Aabb::from_center_size(Vec3::new(0.0, 0.0, 50.0), 10.0);
        assert!(!frustum.is_visible(&aabb));
    }

    /// A box far off to the side should be culled, but the buffered test
    /// should accept a box just outside the cone.
    #[test]
    fn test_buffer_multiplier_widens_acceptance() {
        let frustum = test_frustum();
        // 90 degree FOV: at z=-100 the half-width of the cone is 100.
        let just_outside = Aabb::from_center_size(Vec3::new(118.0, 0.0, -100.0), 10.0);
        assert!(!frustum.is_visible(&just_outside));
        assert!(frustum.is_visible_buffered(&just_outside, 2.0));
    }

    /// A box straddling a frustum edge should count as visible.
    #[test]
    fn test_partially_inside_is_visible() {
        let frustum = test_frustum();
        let aabb = Aabb::from_center_size(Vec3::new(100.0, 0.0, -100.0), 30.0);
        assert!(frustum.is_visible(&aabb));
    }
}
