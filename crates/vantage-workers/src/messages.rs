//! Typed request/response messages for the six workers.
//!
//! Each worker kind has its own request and response enums; there are no
//! string-tagged message kinds anywhere. Correlation is by [`RequestId`],
//! handed out by the gateway.

use glam::{Mat4, Vec3};

use vantage_math::CameraPose;
use vantage_octree::{MAX_STREAM_DEPTH, MIN_STREAM_DEPTH};

/// Correlation id for an outstanding worker request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// The kind of worker a request is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Depth-specific mesh loader (depth 2, 3, or 4).
    Loader(u8),
    /// Mesh disposer.
    Disposal,
    /// Frustum culler.
    Frustum,
    /// Distance evaluator.
    Distance,
}

impl WorkerKind {
    /// All loader kinds, ordered coarse to fine.
    pub fn loaders() -> impl Iterator<Item = WorkerKind> {
        (MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH).map(WorkerKind::Loader)
    }
}

/// Per-node visibility state, owned by the frustum culler.
///
/// Nodes default to `Disposed` until first evaluated. `Disposed → Hidden`
/// happens only via the reload path; `Hidden/Visible → Disposed` only via
/// the cull path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VisibilityState {
    /// Loaded, in view, and shown.
    Visible,
    /// In the buffered frustum but not currently shown.
    Hidden,
    /// Outside the buffered frustum; resources evicted or never loaded.
    #[default]
    Disposed,
}

/// Decoded geometry for one node, as produced by a loader worker.
#[derive(Clone, Debug, Default)]
pub struct MeshPayload {
    /// Flat `xyz` vertex positions. Required.
    pub positions: Vec<f32>,
    /// Triangle indices. Required.
    pub indices: Vec<u32>,
    /// Flat `xyz` vertex normals, if the source carries them.
    pub normals: Option<Vec<f32>>,
    /// Flat `rgba` vertex colors, if the source carries them.
    pub colors: Option<Vec<f32>>,
    /// Node-local transform, if any.
    pub transform: Option<Mat4>,
    /// Source name for provenance tagging.
    pub name: Option<String>,
}

impl MeshPayload {
    /// Whether the payload has the data required to build a mesh.
    /// Missing positions or indices is a skip, not an error.
    pub fn is_materializable(&self) -> bool {
        !self.positions.is_empty() && !self.indices.is_empty()
    }

    /// Number of vertices in the payload.
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    /// Radius of the bounding sphere around the positions' centroid-free
    /// origin (max vertex norm). Zero for empty payloads.
    pub fn bounding_radius(&self) -> f32 {
        self.positions
            .chunks_exact(3)
            .map(|p| Vec3::new(p[0], p[1], p[2]).length())
            .fold(0.0, f32::max)
    }
}

/// Requests understood by a depth loader worker.
#[derive(Clone, Debug)]
pub enum LoaderRequest {
    /// Fetch one node's mesh.
    LoadMesh {
        /// Correlation id.
        request_id: RequestId,
        /// Node to fetch.
        node: u64,
        /// Distance-like priority, lower = sooner.
        priority: f32,
        /// Front-of-queue reload (node already known to be needed).
        urgent: bool,
    },
    /// Bulk fetch used once at startup for the base layer.
    PreloadBatch {
        /// Correlation id.
        request_id: RequestId,
        /// Nodes to fetch, in priority order.
        nodes: Vec<u64>,
    },
}

/// Responses from a depth loader worker. Every variant is terminal for
/// its request id.
#[derive(Clone, Debug)]
pub enum LoaderResponse {
    /// Mesh data fetched and decoded.
    MeshLoaded {
        request_id: RequestId,
        node: u64,
        payload: MeshPayload,
    },
    /// The source had no usable data for this node. Not an error.
    MeshSkipped {
        request_id: RequestId,
        node: u64,
        reason: String,
    },
    /// The node does not exist in the source.
    MeshNotFound { request_id: RequestId, node: u64 },
    /// All nodes of a preload batch, with whatever loaded.
    BatchLoaded {
        request_id: RequestId,
        meshes: Vec<(u64, MeshPayload)>,
    },
    /// The worker failed while fetching.
    LoadFailed {
        request_id: RequestId,
        node: u64,
        message: String,
    },
}

impl LoaderResponse {
    /// The correlation id this response terminates.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::MeshLoaded { request_id, .. }
            | Self::MeshSkipped { request_id, .. }
            | Self::MeshNotFound { request_id, .. }
            | Self::BatchLoaded { request_id, .. }
            | Self::LoadFailed { request_id, .. } => *request_id,
        }
    }
}

/// Requests understood by the disposal worker.
#[derive(Clone, Debug)]
pub enum DisposalRequest {
    /// Release the resources of the given nodes.
    DisposeMeshes {
        request_id: RequestId,
        nodes: Vec<u64>,
        priority: f32,
    },
}

/// Responses from the disposal worker.
#[derive(Clone, Debug)]
pub enum DisposalResponse {
    /// The nodes were released.
    MeshesDisposed {
        request_id: RequestId,
        disposed: Vec<u64>,
    },
    /// Disposal bookkeeping failed; the nodes were not released.
    DisposalFailed {
        request_id: RequestId,
        message: String,
    },
}

impl DisposalResponse {
    /// The correlation id this response terminates.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::MeshesDisposed { request_id, .. } | Self::DisposalFailed { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// One node submitted for frustum culling.
#[derive(Clone, Copy, Debug)]
pub struct CullCandidate {
    /// Node number.
    pub node: u64,
    /// Octree depth (2–4).
    pub depth: u8,
    /// World-space node center.
    pub center: Vec3,
    /// Estimated node edge length.
    pub size: f32,
    /// Whether the node currently has a materialized mesh.
    pub loaded: bool,
    /// Current visibility state.
    pub state: VisibilityState,
}

/// Requests understood by the frustum worker.
#[derive(Clone, Debug)]
pub enum FrustumRequest {
    /// Replace the worker's cached camera frustum. Fire-and-forget.
    UpdateFrustum { camera: CameraPose },
    /// Classify the given nodes against the cached frustum.
    CullNodes {
        request_id: RequestId,
        candidates: Vec<CullCandidate>,
        /// AABB inflation factor for the buffered test.
        buffer_multiplier: f32,
    },
}

/// A node re-entering the buffered frustum, to be re-enqueued for loading.
#[derive(Clone, Copy, Debug)]
pub struct ReloadCandidate {
    /// Node number.
    pub node: u64,
    /// Octree depth.
    pub depth: u8,
    /// Camera distance at cull time; the reload priority is derived from it.
    pub distance: f32,
}

/// Classification produced by one cull pass.
#[derive(Clone, Debug, Default)]
pub struct CullResults {
    /// Loaded nodes inside the buffered frustum.
    pub visible: Vec<u64>,
    /// Nodes inside the buffered frustum but not shown.
    pub hidden: Vec<u64>,
    /// Nodes that left the buffered frustum and should be evicted.
    pub dispose: Vec<u64>,
    /// Previously disposed nodes that re-entered the buffered frustum.
    pub reload: Vec<ReloadCandidate>,
}

/// Telemetry echoed with cull results.
#[derive(Clone, Copy, Debug, Default)]
pub struct CullStats {
    /// Candidates evaluated in this pass.
    pub evaluated: usize,
    /// Worker time spent, in microseconds.
    pub elapsed_us: u64,
}

/// Responses from the frustum worker.
#[derive(Clone, Debug)]
pub enum FrustumResponse {
    /// Classification of the submitted candidates.
    CullingResults {
        request_id: RequestId,
        results: CullResults,
        stats: CullStats,
    },
    /// The worker had no frustum yet (no `UpdateFrustum` seen).
    NotReady { request_id: RequestId },
}

impl FrustumResponse {
    /// The correlation id this response terminates.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::CullingResults { request_id, .. } | Self::NotReady { request_id } => *request_id,
        }
    }
}

/// One node registered with the distance worker at initialization.
#[derive(Clone, Copy, Debug)]
pub struct DistanceNode {
    /// Node number.
    pub node: u64,
    /// Octree depth (2–4).
    pub depth: u8,
    /// World-space node center.
    pub center: Vec3,
}

/// Calibrated distance thresholds, fixed once per scene.
#[derive(Clone, Copy, Debug)]
pub struct DistanceThresholds {
    /// Scene max distance (bounding-radius calibrated).
    pub max_distance: f32,
    /// Depth-3 eligibility threshold (0.90 × max distance by default).
    pub depth3_threshold: f32,
    /// Depth-4 eligibility threshold (0.50 × max distance by default).
    pub depth4_threshold: f32,
    /// Load-side hysteresis buffer (0.03 × max distance by default).
    pub load_buffer: f32,
    /// Unload-side hysteresis buffer (1.2 × the load buffer by default).
    pub unload_buffer: f32,
}

impl DistanceThresholds {
    /// Calibrate thresholds from the scene max distance with the standard
    /// fractions.
    pub fn from_max_distance(max_distance: f32) -> Self {
        Self::new(max_distance, 0.90, 0.50, 0.03, 1.2)
    }

    /// Calibrate thresholds from explicit fractions.
    pub fn new(
        max_distance: f32,
        depth3_fraction: f32,
        depth4_fraction: f32,
        buffer_fraction: f32,
        unload_buffer_scale: f32,
    ) -> Self {
        let load_buffer = buffer_fraction * max_distance;
        Self {
            max_distance,
            depth3_threshold: depth3_fraction * max_distance,
            depth4_threshold: depth4_fraction * max_distance,
            load_buffer,
            unload_buffer: unload_buffer_scale * load_buffer,
        }
    }

    /// Raw eligibility threshold for a depth, if that depth is
    /// distance-gated at all (depth 2 is not).
    pub fn threshold_for_depth(&self, depth: u8) -> Option<f32> {
        match depth {
            3 => Some(self.depth3_threshold),
            4 => Some(self.depth4_threshold),
            _ => None,
        }
    }
}

/// Per-node dynamic state snapshot sent with each distance request.
#[derive(Clone, Copy, Debug)]
pub struct NodeStreamState {
    /// Node number.
    pub node: u64,
    /// Whether the node currently has a materialized mesh.
    pub loaded: bool,
    /// Whether that mesh is currently shown.
    pub visible: bool,
    /// Bounding-sphere radius of the loaded mesh, when known. Enables the
    /// face-distance refinement.
    pub bounding_radius: Option<f32>,
}

/// Requests understood by the distance worker.
#[derive(Clone, Debug)]
pub enum DistanceRequest {
    /// One-time priming with the full streamable node set.
    InitializeNodes {
        request_id: RequestId,
        nodes: Vec<DistanceNode>,
    },
    /// Evaluate load/unload/visibility for all primed nodes.
    CalculateDistances {
        request_id: RequestId,
        camera: CameraPose,
        thresholds: DistanceThresholds,
        states: Vec<NodeStreamState>,
    },
}

/// A load the evaluator decided on.
#[derive(Clone, Copy, Debug)]
pub struct LoadDecision {
    /// Node number.
    pub node: u64,
    /// Octree depth.
    pub depth: u8,
    /// Raw distance-like priority, lower = sooner.
    pub priority: f32,
}

/// Telemetry echoed with a distance evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct DistanceStats {
    /// Nodes evaluated in this pass.
    pub evaluated: usize,
    /// Worker time spent, in microseconds.
    pub elapsed_us: u64,
}

/// Full output of one distance evaluation, applied atomically by the caller.
#[derive(Clone, Debug, Default)]
pub struct DistanceEvaluation {
    /// Nodes to enqueue for loading.
    pub loads: Vec<LoadDecision>,
    /// Loaded nodes past the unload threshold. Never contains depth 2.
    pub unloads: Vec<u64>,
    /// `(node, show)` visibility flips for loaded nodes.
    pub visibility: Vec<(u64, bool)>,
    /// Nodes just outside the load threshold, enqueued at reduced priority.
    pub predictive: Vec<LoadDecision>,
    /// Telemetry for this pass.
    pub stats: DistanceStats,
}

/// Responses from the distance worker.
#[derive(Clone, Debug)]
pub enum DistanceResponse {
    /// The worker is primed with the node set.
    Initialized {
        request_id: RequestId,
        node_count: usize,
    },
    /// Evaluation output.
    Calculated {
        request_id: RequestId,
        result: DistanceEvaluation,
    },
}

impl DistanceResponse {
    /// The correlation id this response terminates.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Initialized { request_id, .. } | Self::Calculated { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Any worker response, as drained from the gateway.
#[derive(Clone, Debug)]
pub enum WorkerEvent {
    /// Response from a depth loader; the `u8` is the loader's depth.
    Loader(u8, LoaderResponse),
    /// Response from the disposal worker.
    Disposal(DisposalResponse),
    /// Response from the frustum worker.
    Frustum(FrustumResponse),
    /// Response from the distance worker.
    Distance(DistanceResponse),
}

impl WorkerEvent {
    /// The correlation id the event terminates.
    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Loader(_, r) => r.request_id(),
            Self::Disposal(r) => r.request_id(),
            Self::Frustum(r) => r.request_id(),
            Self::Distance(r) => r.request_id(),
        }
    }
}
