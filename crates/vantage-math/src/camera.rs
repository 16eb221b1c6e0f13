//! Immutable per-frame camera snapshot consumed by the streaming scheduler.

use glam::{Mat4, Vec3};

/// Snapshot of the camera state for one frame.
///
/// The scheduler never talks to the live camera controller; the host
/// captures a pose once per frame and hands it in by value, so every
/// evaluation within the frame sees a consistent view.
#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    /// World-space camera position.
    pub position: Vec3,
    /// Normalized view direction.
    pub forward: Vec3,
    /// Combined view-projection matrix for frustum extraction.
    pub view_projection: Mat4,
}

impl CameraPose {
    /// Build a pose from position, look target, and a projection matrix.
    pub fn from_look_at(position: Vec3, target: Vec3, projection: Mat4) -> Self {
        let view = Mat4::look_at_rh(position, target, Vec3::Y);
        Self {
            position,
            forward: (target - position).normalize_or(Vec3::NEG_Z),
            view_projection: projection * view,
        }
    }

    /// Euclidean distance from the camera to a point.
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.position.distance(point)
    }

    /// Dot product between the view direction and the direction to a point.
    ///
    /// Ranges from -1.0 (directly behind) to 1.0 (directly ahead); 0.0 when
    /// the point coincides with the camera.
    pub fn view_alignment(&self, point: Vec3) -> f32 {
        let to_point = point - self.position;
        let len = to_point.length();
        if len <= f32::EPSILON {
            return 0.0;
        }
        self.forward.dot(to_point / len)
    }

    /// Whether the camera has moved meaningfully since `previous`.
    ///
    /// `position_epsilon` is the translation delta that counts as movement;
    /// `rotation_dot_threshold` is the minimum forward-vector dot product
    /// below which the rotation counts as movement.
    pub fn moved_since(
        &self,
        previous: &CameraPose,
        position_epsilon: f32,
        rotation_dot_threshold: f32,
    ) -> bool {
        if self.position.distance_squared(previous.position) > position_epsilon * position_epsilon {
            return true;
        }
        self.forward.dot(previous.forward) < rotation_dot_threshold
    }
}
