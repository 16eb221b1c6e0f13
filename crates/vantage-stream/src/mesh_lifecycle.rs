//! Materializing fetched payloads into renderable resources.
//!
//! Loader responses never build meshes inline; each becomes a
//! MESH_CREATION-tier task wrapping a [`MeshBuild`], which works through
//! its payload in stages and yields back to the scheduler when its
//! creation budget runs out mid-build.

use std::time::Duration;

use glam::{Mat4, Vec3};

use vantage_workers::MeshPayload;

use crate::clock::Clock;

/// Interaction surface for highlight toggling, implemented once per mesh
/// type rather than attached per instance.
pub trait Highlightable {
    fn set_highlighted(&mut self, on: bool);
    fn is_highlighted(&self) -> bool;
}

/// Interaction surface for ray picking.
pub trait Pickable {
    /// Stable id reported on pick hits.
    fn pick_id(&self) -> u64;
    /// Ray-vs-bounding-sphere test; returns the hit distance along the
    /// ray, if any.
    fn hit_test(&self, origin: Vec3, direction: Vec3) -> Option<f32>;
}

/// Materialized renderable resource for a loaded node.
///
/// Created exclusively by a completed [`MeshBuild`]; destroyed exclusively
/// by the disposal coordinator after the disposal worker's terminal
/// response.
#[derive(Clone, Debug)]
pub struct ActiveMesh {
    /// Octree node this mesh belongs to.
    pub node: u64,
    /// Stream depth the mesh was fetched at.
    pub depth: u8,
    /// Source name for provenance.
    pub name: Option<String>,
    /// World-space center of the mesh's bounding sphere.
    pub center: Vec3,
    /// Bounding-sphere radius, fed back into face-distance evaluation.
    pub bounding_radius: f32,
    /// Vertex count, used for memory estimation.
    pub vertex_count: usize,
    /// Triangle count, used for memory estimation.
    pub triangle_count: usize,
    /// Node-local transform, if the payload carried one.
    pub transform: Option<Mat4>,
    /// Whether the mesh is currently shown.
    pub visible: bool,
    highlighted: bool,
}

impl ActiveMesh {
    /// Rough GPU-side footprint: positions + normals + colors + indices.
    pub fn estimated_bytes(&self) -> usize {
        let per_vertex = 3 * 4 + 3 * 4 + 4 * 4;
        self.vertex_count * per_vertex + self.triangle_count * 3 * 4
    }
}

impl Highlightable for ActiveMesh {
    fn set_highlighted(&mut self, on: bool) {
        self.highlighted = on;
    }

    fn is_highlighted(&self) -> bool {
        self.highlighted
    }
}

impl Pickable for ActiveMesh {
    fn pick_id(&self) -> u64 {
        self.node
    }

    fn hit_test(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO {
            return None;
        }
        let to_center = self.center - origin;
        let along = to_center.dot(dir);
        let closest_sq = to_center.length_squared() - along * along;
        let radius_sq = self.bounding_radius * self.bounding_radius;
        if closest_sq > radius_sq {
            return None;
        }
        let half_chord = (radius_sq - closest_sq).sqrt();
        let near = along - half_chord;
        if near >= 0.0 {
            Some(near)
        } else if along + half_chord >= 0.0 {
            Some(0.0)
        } else {
            None
        }
    }
}

/// Outcome of one [`MeshBuild::step`] call.
#[derive(Debug)]
pub enum BuildStep {
    /// Creation budget exhausted mid-build; resubmit next frame.
    Yielded,
    /// The mesh is ready for registration.
    Complete(Box<ActiveMesh>),
    /// The payload lacked required data; nothing was built.
    Skipped(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BuildStage {
    Positions,
    Indices,
    Normals,
    Finalize,
}

/// Cooperative, resumable mesh construction.
///
/// Each call to [`step`](Self::step) runs build stages until done or
/// until `creation_budget` has elapsed within that call, checking the
/// clock after the positions, indices, normals, and finalize stages.
pub struct MeshBuild {
    node: u64,
    depth: u8,
    center: Vec3,
    initially_visible: bool,
    payload: MeshPayload,
    stage: BuildStage,
    bounding_radius: f32,
}

impl MeshBuild {
    /// Prepare a build for `node`'s payload. `initially_visible` is the
    /// distance/frustum verdict at response time, re-checked by the
    /// caller on completion.
    pub fn new(
        node: u64,
        depth: u8,
        center: Vec3,
        payload: MeshPayload,
        initially_visible: bool,
    ) -> Self {
        Self {
            node,
            depth,
            center,
            initially_visible,
            payload,
            stage: BuildStage::Positions,
            bounding_radius: 0.0,
        }
    }

    pub fn node(&self) -> u64 {
        self.node
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Run build stages until complete or the creation budget elapses.
    pub fn step(&mut self, clock: &dyn Clock, creation_budget: Duration) -> BuildStep {
        if !self.payload.is_materializable() {
            return BuildStep::Skipped("payload missing positions or indices");
        }

        let started = clock.now();
        loop {
            match self.stage {
                BuildStage::Positions => {
                    if self.payload.positions.len() % 3 != 0 {
                        return BuildStep::Skipped("position buffer not a multiple of 3");
                    }
                    self.bounding_radius = self.payload.bounding_radius();
                    self.stage = BuildStage::Indices;
                }
                BuildStage::Indices => {
                    let vertex_count = self.payload.vertex_count() as u32;
                    if self.payload.indices.len() % 3 != 0
                        || self.payload.indices.iter().any(|&i| i >= vertex_count)
                    {
                        return BuildStep::Skipped("index buffer out of range");
                    }
                    self.stage = BuildStage::Normals;
                }
                BuildStage::Normals => {
                    // Malformed optional attributes are dropped, not fatal.
                    if let Some(normals) = &self.payload.normals {
                        if normals.len() != self.payload.positions.len() {
                            self.payload.normals = None;
                        }
                    }
                    if let Some(colors) = &self.payload.colors {
                        if colors.len() / 4 != self.payload.vertex_count() {
                            self.payload.colors = None;
                        }
                    }
                    self.stage = BuildStage::Finalize;
                }
                BuildStage::Finalize => {
                    let mesh = ActiveMesh {
                        node: self.node,
                        depth: self.depth,
                        name: self.payload.name.take(),
                        center: self.center,
                        bounding_radius: self.bounding_radius,
                        vertex_count: self.payload.vertex_count(),
                        triangle_count: self.payload.indices.len() / 3,
                        transform: self.payload.transform,
                        visible: self.initially_visible,
                        highlighted: false,
                    };
                    return BuildStep::Complete(Box::new(mesh));
                }
            }

            if clock.now() - started >= creation_budget {
                return BuildStep::Yielded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn triangle_payload() -> MeshPayload {
        MeshPayload {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2],
            normals: None,
            colors: None,
            transform: None,
            name: Some("tile_42".into()),
        }
    }

    /// A valid payload builds to completion in one step when the clock
    /// never advances.
    #[test]
    fn test_build_completes_within_budget() {
        let clock = ManualClock::new();
        let mut build = MeshBuild::new(42, 3, Vec3::ZERO, triangle_payload(), true);
        match build.step(&clock, Duration::from_millis(8)) {
            BuildStep::Complete(mesh) => {
                assert_eq!(mesh.node, 42);
                assert_eq!(mesh.depth, 3);
                assert_eq!(mesh.vertex_count, 3);
                assert_eq!(mesh.triangle_count, 1);
                assert_eq!(mesh.name.as_deref(), Some("tile_42"));
                assert!(mesh.visible);
                assert!(mesh.bounding_radius > 0.0);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// An empty payload is a skip, not an error.
    #[test]
    fn test_missing_indices_is_skip() {
        let clock = ManualClock::new();
        let mut payload = triangle_payload();
        payload.indices.clear();
        let mut build = MeshBuild::new(7, 4, Vec3::ZERO, payload, false);
        assert!(matches!(
            build.step(&clock, Duration::from_millis(8)),
            BuildStep::Skipped(_)
        ));
    }

    /// Out-of-range indices are a skip.
    #[test]
    fn test_out_of_range_indices_is_skip() {
        let clock = ManualClock::new();
        let mut payload = triangle_payload();
        payload.indices = vec![0, 1, 9];
        let mut build = MeshBuild::new(7, 4, Vec3::ZERO, payload, false);
        assert!(matches!(
            build.step(&clock, Duration::from_millis(8)),
            BuildStep::Skipped(_)
        ));
    }

    /// A build interrupted by the budget resumes from its last checkpoint
    /// and still produces the same mesh.
    #[test]
    fn test_build_yields_and_resumes() {
        let clock = ManualClock::new();
        let mut build = MeshBuild::new(42, 3, Vec3::ZERO, triangle_payload(), true);

        // Zero budget: the first stage runs, then the deadline check fires.
        match build.step(&clock, Duration::ZERO) {
            BuildStep::Yielded => {}
            other => panic!("expected yield, got {other:?}"),
        }

        match build.step(&clock, Duration::from_millis(8)) {
            BuildStep::Complete(mesh) => assert_eq!(mesh.triangle_count, 1),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    /// Mismatched optional attributes are dropped rather than failing the
    /// build.
    #[test]
    fn test_malformed_normals_dropped() {
        let clock = ManualClock::new();
        let mut payload = triangle_payload();
        payload.normals = Some(vec![0.0; 5]);
        let mut build = MeshBuild::new(1, 2, Vec3::ZERO, payload, true);
        assert!(matches!(
            build.step(&clock, Duration::from_millis(8)),
            BuildStep::Complete(_)
        ));
    }

    /// A ray through the bounding sphere hits; one past it misses.
    #[test]
    fn test_hit_test() {
        let mesh = ActiveMesh {
            node: 1,
            depth: 2,
            name: None,
            center: Vec3::new(0.0, 0.0, -10.0),
            bounding_radius: 2.0,
            vertex_count: 3,
            triangle_count: 1,
            transform: None,
            visible: true,
            highlighted: false,
        };
        let hit = mesh.hit_test(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        assert!(hit.is_some());
        assert!((hit.unwrap() - 8.0).abs() < 1e-4);
        assert!(mesh.hit_test(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0)).is_none());
    }
}
