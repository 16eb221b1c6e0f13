//! The six asynchronous compute workers and the correlated request/response
//! gateway the streaming scheduler drives them through.
//!
//! Three depth-specific mesh loaders, one disposer, one frustum culler, and
//! one distance evaluator run as named threads behind bounded channels. The
//! scheduler only ever sees typed messages addressed by request id; the
//! gateway enforces per-kind concurrency ceilings and keeps the pending
//! table and load counters in lockstep.

mod culling;
mod disposer;
mod distance;
mod error;
mod gateway;
mod loader;
mod messages;

pub use culling::cull_nodes;
pub use distance::evaluate_distances;
pub use error::DispatchError;
pub use gateway::{GatewayLimits, PendingRequest, WorkerGateway};
pub use loader::{MeshFetch, MeshSource};
pub use messages::{
    CullCandidate, CullResults, CullStats, DisposalRequest, DisposalResponse, DistanceEvaluation,
    DistanceNode, DistanceRequest, DistanceResponse, DistanceStats, DistanceThresholds,
    FrustumRequest, FrustumResponse, LoadDecision, LoaderRequest, LoaderResponse, MeshPayload,
    NodeStreamState, ReloadCandidate, RequestId, VisibilityState, WorkerEvent, WorkerKind,
};
