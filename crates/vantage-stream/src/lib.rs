//! Progressive LOD streaming and eviction scheduling.
//!
//! Given a camera and a fixed octree of content nodes at depths 2–4, the
//! [`StreamingManager`] decides frame by frame which nodes' geometry must
//! be fetched, materialized, shown, hidden, or evicted, under a per-frame
//! time budget and bounded worker concurrency.

mod clock;
mod disposal;
mod distance;
mod frustum_cull;
mod load_queue;
mod manager;
mod mesh_lifecycle;
mod scheduler;
mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use disposal::DisposalCoordinator;
pub use distance::{DistanceEvaluator, EvaluationPath};
pub use frustum_cull::{CullOutcome, FrustumCuller};
pub use load_queue::{ImportanceModel, LoadQueueEntry, LoadQueueManager};
pub use manager::{StreamingManager, TaskKind};
pub use mesh_lifecycle::{ActiveMesh, BuildStep, Highlightable, MeshBuild, Pickable};
pub use scheduler::{
    FetchPlan, FetchPump, FrameReport, FrameScheduler, TaskError, TaskOutcome, TaskSpawner,
    TaskTier,
};
pub use stats::{MemoryUsage, PerformanceStats};

pub use vantage_workers::VisibilityState;
