//! Culling math and camera snapshots shared by the streaming scheduler and its workers.

mod aabb;
mod camera;
mod frustum;

pub use aabb::Aabb;
pub use camera::CameraPose;
pub use frustum::Frustum;
