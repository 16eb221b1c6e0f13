//! Read-only telemetry surfaced to the host application.

/// Counters accumulated over the manager's lifetime.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerformanceStats {
    /// Frames driven through `update`.
    pub frames: u64,
    /// Scheduler tasks executed to completion.
    pub tasks_run: u64,
    /// Scheduler tasks that returned an error (logged, never fatal).
    pub tasks_failed: u64,
    /// Tasks deferred to a later frame by the budget ceiling.
    pub tasks_deferred: u64,
    /// LOD evaluation passes (worker or fallback).
    pub lod_updates: u64,
    /// Distance evaluations answered by the worker.
    pub distance_worker_evals: u64,
    /// Distance evaluations computed synchronously inline.
    pub distance_fallback_evals: u64,
    /// Frustum cull passes applied.
    pub cull_passes: u64,
    /// Meshes materialized.
    pub meshes_created: u64,
    /// Loads skipped for missing data (not errors).
    pub loads_skipped: u64,
    /// Loads that failed in a worker.
    pub loads_failed: u64,
    /// Meshes destroyed after disposal acknowledgment.
    pub disposals: u64,
    /// Worker responses discarded because the node's state had moved on.
    pub stale_responses: u64,
    /// Worker-side time echoed in response stats, in microseconds.
    pub worker_time_us: u64,
}

/// Point-in-time memory accounting.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryUsage {
    /// Materialized meshes currently registered.
    pub active_meshes: usize,
    /// Active meshes per depth 2/3/4.
    pub per_depth: [usize; 3],
    /// Estimated bytes held by vertex and index data.
    pub estimated_bytes: usize,
    /// Entries waiting in the load queues.
    pub queued_loads: usize,
    /// Requests in flight at the worker gateway.
    pub pending_requests: usize,
}
