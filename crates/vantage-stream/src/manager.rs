//! The streaming manager: single-writer facade over every subsystem.
//!
//! All shared state — the mesh map, the load queues, the visibility
//! machine, the disposal queue — is owned here and mutated only from
//! scheduler-dispatched tasks, so the whole control flow needs no locks.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use vantage_config::StreamConfig;
use vantage_math::CameraPose;
use vantage_octree::{MIN_STREAM_DEPTH, NodeIndex, OctreeBlock, OctreeError, estimate_node_size};
use vantage_workers::{
    CullCandidate, CullResults, DispatchError, DisposalResponse, DistanceEvaluation, DistanceNode,
    DistanceResponse, DistanceThresholds, FrustumResponse, GatewayLimits, LoaderResponse,
    MeshPayload, MeshSource, NodeStreamState, VisibilityState, WorkerEvent, WorkerGateway,
    cull_nodes,
};

use crate::clock::{Clock, SystemClock};
use crate::disposal::DisposalCoordinator;
use crate::distance::{DistanceEvaluator, EvaluationPath};
use crate::frustum_cull::FrustumCuller;
use crate::load_queue::{ImportanceModel, LoadQueueManager};
use crate::mesh_lifecycle::{ActiveMesh, BuildStep, MeshBuild};
use crate::scheduler::{
    FetchPump, FrameReport, FrameScheduler, TaskOutcome, TaskSpawner, TaskTier,
};
use crate::stats::{MemoryUsage, PerformanceStats};

/// One unit of scheduler work. Tasks are data; [`StreamingManager`] is
/// the only executor.
pub enum TaskKind {
    /// Detect camera movement, push the frustum, gate the LOD update.
    CameraCheck,
    /// One distance-evaluation round plus (on its cadence) a cull pass.
    LodUpdate,
    /// A resumable mesh build.
    MeshCreation(MeshBuild),
    /// Disposal pumping and other low-priority maintenance.
    Background,
}

/// Facade driving the full streaming pipeline once per rendered frame.
pub struct StreamingManager {
    config: StreamConfig,
    clock: Rc<dyn Clock>,
    gateway: WorkerGateway,
    index: NodeIndex,
    thresholds: Option<DistanceThresholds>,
    importance: Option<ImportanceModel>,
    queues: LoadQueueManager,
    evaluator: DistanceEvaluator,
    culler: FrustumCuller,
    disposal: DisposalCoordinator,
    scheduler: FrameScheduler<TaskKind>,
    fetch_pump: FetchPump,
    meshes: FxHashMap<u64, ActiveMesh>,
    camera: Option<CameraPose>,
    /// Pose at the last LOD update, for movement gating.
    lod_camera: Option<CameraPose>,
    creation_budget: Duration,
    preload_pending: bool,
    stats: PerformanceStats,
}

impl StreamingManager {
    /// Spawn the worker pool and build a manager on the wall clock.
    pub fn new(config: StreamConfig, source: Arc<dyn MeshSource>) -> Self {
        let limits = GatewayLimits {
            loader_concurrency: config.workers.loader_concurrency,
            disposal_concurrency: config.workers.disposal_concurrency,
        };
        let gateway = WorkerGateway::spawn(source, limits);
        Self::from_parts(config, gateway, Rc::new(SystemClock::new()))
    }

    /// Build a manager from an existing gateway and clock. Tests use this
    /// with a degraded gateway and a manual clock.
    pub fn from_parts(config: StreamConfig, gateway: WorkerGateway, clock: Rc<dyn Clock>) -> Self {
        let frame_budget = Duration::from_secs_f64(config.budget.frame_budget_ms / 1000.0);
        let fetch_budget = Duration::from_secs_f64(config.budget.fetch_budget_ms / 1000.0);
        let creation_budget =
            Duration::from_secs_f64(config.budget.mesh_creation_budget_ms / 1000.0);

        Self {
            queues: LoadQueueManager::new(config.queue.soft_cap, config.queue.trim_to),
            evaluator: DistanceEvaluator::new(Duration::from_millis(
                config.distance.calculation_frequency_ms,
            )),
            culler: FrustumCuller::new(Duration::from_millis(config.frustum.update_frequency_ms)),
            disposal: DisposalCoordinator::new(),
            scheduler: FrameScheduler::new(frame_budget, config.budget.frame_budget_ceiling as f32),
            fetch_pump: FetchPump::new(fetch_budget, config.queue.max_batch_per_depth),
            meshes: FxHashMap::default(),
            index: NodeIndex::default(),
            thresholds: None,
            importance: None,
            camera: None,
            lod_camera: None,
            creation_budget,
            preload_pending: false,
            stats: PerformanceStats::default(),
            config,
            clock,
            gateway,
        }
    }

    /// Calibrate the distance thresholds from an explicit max distance.
    ///
    /// Called automatically by [`init_with_octree`](Self::init_with_octree)
    /// from the scene's bounding radius unless calibrated beforehand.
    pub fn set_distance_thresholds(&mut self, max_distance: f32) {
        let d = &self.config.distance;
        self.thresholds = Some(DistanceThresholds::new(
            max_distance,
            d.depth3_threshold_fraction,
            d.depth4_threshold_fraction,
            d.buffer_fraction,
            d.unload_buffer_scale,
        ));
        self.queues
            .calibrate(max_distance, self.config.queue.tie_break_gap_fraction);
        if !self.index.is_empty() {
            self.importance = Some(ImportanceModel::new(self.index.octree_center(), max_distance));
        }
        info!(max_distance, "distance thresholds calibrated");
    }

    /// Index the octree document, prime the distance worker, and arm the
    /// base-layer preload.
    pub fn init_with_octree(&mut self, root: &OctreeBlock) -> Result<(), OctreeError> {
        let index = NodeIndex::build(root)?;
        info!(nodes = index.len(), "octree indexed");

        self.index = index;
        match self.thresholds {
            Some(t) => {
                self.importance = Some(ImportanceModel::new(
                    self.index.octree_center(),
                    t.max_distance,
                ));
            }
            None => {
                // Uncalibrated scenes fall back to the bounding diameter.
                self.set_distance_thresholds(self.index.bounding_radius() * 2.0);
            }
        }

        let nodes: Vec<DistanceNode> = self
            .index
            .streamable_nodes()
            .map(|(node, depth, center)| DistanceNode { node, depth, center })
            .collect();
        self.evaluator.prime(nodes, &mut self.gateway);

        // The bulk preload waits for the distance worker's priming ack;
        // with no workers there is nothing to wait for.
        self.preload_pending = true;
        if self.gateway.is_degraded() {
            self.start_preload();
        }
        Ok(())
    }

    /// Drive one frame: drain worker responses, run the tiered scheduler
    /// under the frame ceiling, then pace the fetch pump.
    pub fn update(&mut self, camera: CameraPose) -> FrameReport {
        self.stats.frames += 1;
        self.camera = Some(camera);

        self.drain_worker_events();

        self.scheduler
            .enqueue(TaskTier::Camera, "camera_check", TaskKind::CameraCheck);
        self.scheduler
            .enqueue(TaskTier::Background, "maintenance", TaskKind::Background);

        let clock = Rc::clone(&self.clock);
        let mut scheduler = std::mem::replace(
            &mut self.scheduler,
            FrameScheduler::new(Duration::ZERO, 0.0),
        );
        let report = scheduler.run_frame(clock.as_ref(), |_, task, spawner| {
            self.execute_task(task, spawner)
        });
        self.scheduler = scheduler;

        self.pump_fetches();

        self.stats.tasks_run += report.executed as u64;
        self.stats.tasks_failed += report.failed as u64;
        self.stats.tasks_deferred += report.deferred as u64;
        report
    }

    /// The materialized mesh for a node, if loaded.
    pub fn active_mesh(&self, node: u64) -> Option<&ActiveMesh> {
        self.meshes.get(&node)
    }

    /// Whether a node currently has a materialized mesh.
    pub fn is_loaded(&self, node: u64) -> bool {
        self.meshes.contains_key(&node)
    }

    /// Current visibility state of a node.
    pub fn visibility_of(&self, node: u64) -> VisibilityState {
        self.culler.state_of(node)
    }

    /// Whether a load for this node is waiting in the queue at this depth.
    pub fn is_queued(&self, node: u64, depth: u8) -> bool {
        self.queues.contains(node, depth)
    }

    /// Lifetime counters.
    pub fn performance_stats(&self) -> PerformanceStats {
        self.stats
    }

    /// Point-in-time memory accounting.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut per_depth = [0usize; 3];
        let mut estimated_bytes = 0;
        for mesh in self.meshes.values() {
            let slot = mesh.depth.saturating_sub(MIN_STREAM_DEPTH) as usize;
            if slot < per_depth.len() {
                per_depth[slot] += 1;
            }
            estimated_bytes += mesh.estimated_bytes();
        }
        MemoryUsage {
            active_meshes: self.meshes.len(),
            per_depth,
            estimated_bytes,
            queued_loads: self.queues.total_len(),
            pending_requests: self.gateway.pending_count(),
        }
    }

    /// Full teardown: stop the workers and drop all streaming state.
    pub fn dispose(&mut self) {
        self.gateway.shutdown();
        self.meshes.clear();
        self.queues.clear();
        self.culler.clear();
        self.disposal.clear();
        info!("streaming manager disposed");
    }

    fn execute_task(
        &mut self,
        task: TaskKind,
        spawner: &mut TaskSpawner<TaskKind>,
    ) -> Result<TaskOutcome<TaskKind>, crate::scheduler::TaskError> {
        match task {
            TaskKind::CameraCheck => {
                self.run_camera_check(spawner);
                Ok(TaskOutcome::Done)
            }
            TaskKind::LodUpdate => {
                self.run_lod_update();
                Ok(TaskOutcome::Done)
            }
            TaskKind::MeshCreation(mut build) => {
                match build.step(self.clock.as_ref(), self.creation_budget) {
                    BuildStep::Yielded => Ok(TaskOutcome::Requeue(TaskKind::MeshCreation(build))),
                    BuildStep::Complete(mesh) => {
                        self.register_mesh(*mesh);
                        Ok(TaskOutcome::Done)
                    }
                    BuildStep::Skipped(reason) => {
                        self.stats.loads_skipped += 1;
                        debug!(node = build.node(), reason, "mesh build skipped");
                        Ok(TaskOutcome::Done)
                    }
                }
            }
            TaskKind::Background => {
                let locally_disposed = self.disposal.pump(&mut self.gateway);
                self.destroy_meshes(&locally_disposed);
                Ok(TaskOutcome::Done)
            }
        }
    }

    /// Camera-tier work: gate LOD updates on meaningful movement.
    fn run_camera_check(&mut self, spawner: &mut TaskSpawner<TaskKind>) {
        let Some(camera) = self.camera else {
            return;
        };
        let moved = match &self.lod_camera {
            Some(previous) => camera.moved_since(
                previous,
                self.config.camera.position_epsilon,
                self.config.camera.rotation_dot_threshold,
            ),
            None => true,
        };
        if !moved {
            return;
        }
        self.lod_camera = Some(camera);
        if let Err(e) = self.gateway.update_frustum(camera) {
            trace!("frustum update not delivered: {e}");
        }
        spawner.spawn(TaskTier::LodUpdate, "lod_update", TaskKind::LodUpdate);
    }

    fn run_lod_update(&mut self) {
        let (Some(camera), Some(thresholds)) = (self.camera, self.thresholds) else {
            return;
        };
        self.stats.lod_updates += 1;
        let now = self.clock.now();

        let states = self.snapshot_states();
        let (inline, path) =
            self.evaluator
                .tick(now, &camera, &thresholds, states, &mut self.gateway);
        if path == EvaluationPath::Fallback {
            self.stats.distance_fallback_evals += 1;
        }
        if let Some(result) = inline {
            self.apply_distance_evaluation(result);
        }

        if self.culler.should_cull(now) {
            self.run_cull_pass(&camera, thresholds.max_distance);
        }
    }

    fn run_cull_pass(&mut self, camera: &CameraPose, max_distance: f32) {
        let candidates: Vec<CullCandidate> = self
            .index
            .streamable_nodes()
            .map(|(node, depth, center)| CullCandidate {
                node,
                depth,
                center,
                size: estimate_node_size(depth, max_distance),
                loaded: self.meshes.contains_key(&node),
                state: self.culler.state_of(node),
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let buffer = self.config.frustum.buffer_multiplier;
        if self.gateway.is_degraded() {
            let (results, cull_stats) = cull_nodes(&candidates, camera, buffer);
            self.stats.worker_time_us += cull_stats.elapsed_us;
            self.apply_cull_results(&results);
            return;
        }
        match self.gateway.request_cull(candidates, buffer) {
            Ok(_) => {}
            Err(DispatchError::Busy(_)) => trace!("cull pass skipped, one in flight"),
            Err(e) => debug!("cull request refused: {e}"),
        }
    }

    fn apply_cull_results(&mut self, results: &CullResults) {
        let index = &self.index;
        let outcome = self
            .culler
            .apply_results(results, |node| index.depth_of(node));
        self.stats.cull_passes += 1;

        for node in outcome.hide {
            if let Some(mesh) = self.meshes.get_mut(&node) {
                mesh.visible = false;
            }
        }
        for node in outcome.show {
            if let Some(mesh) = self.meshes.get_mut(&node) {
                mesh.visible = true;
            }
        }
        for node in outcome.dispose {
            self.queues.remove(node);
            if self.meshes.contains_key(&node) {
                self.disposal.enqueue(node);
            }
        }
        for reload in outcome.reloads {
            let raw = self.config.frustum.reload_priority_scale * reload.distance;
            self.enqueue_load(reload.node, reload.depth, raw, true);
        }
    }

    /// Apply one distance evaluation atomically: loads, unloads, and
    /// visibility flips in a single pass.
    fn apply_distance_evaluation(&mut self, eval: DistanceEvaluation) {
        self.stats.worker_time_us += eval.stats.elapsed_us;

        for load in &eval.loads {
            self.enqueue_load(load.node, load.depth, load.priority, false);
        }
        for load in &eval.predictive {
            self.enqueue_load(load.node, load.depth, load.priority, false);
        }

        for &(node, show) in &eval.visibility {
            if let Some(mesh) = self.meshes.get_mut(&node) {
                let show = show || mesh.depth == MIN_STREAM_DEPTH;
                mesh.visible = show;
                self.culler.mark(
                    node,
                    if show {
                        VisibilityState::Visible
                    } else {
                        VisibilityState::Hidden
                    },
                );
            }
        }

        for &node in &eval.unloads {
            // The base layer never distance-unloads.
            if self.index.depth_of(node) == Some(MIN_STREAM_DEPTH) {
                continue;
            }
            self.queues.remove(node);
            if let Some(mesh) = self.meshes.get_mut(&node) {
                mesh.visible = false;
                self.disposal.enqueue(node);
            }
        }
    }

    fn enqueue_load(&mut self, node: u64, depth: u8, raw_priority: f32, urgent: bool) -> bool {
        let Some(center) = self.index.center_of(node) else {
            return false;
        };
        let importance = match (&self.importance, &self.camera) {
            (Some(model), Some(camera)) => model.importance(camera, center, depth),
            _ => 0.0,
        };
        self.queues.enqueue(
            node,
            depth,
            raw_priority,
            importance,
            urgent,
            self.meshes.contains_key(&node),
            self.gateway.has_pending_load(node),
            self.clock.now(),
        )
    }

    /// Drain the independently-paced fetch pump: one depth per iteration,
    /// a small batch per depth.
    fn pump_fetches(&mut self) {
        let Some(plan) = self.fetch_pump.next_plan(self.clock.now()) else {
            return;
        };

        let meshes = &self.meshes;
        let gateway = &self.gateway;
        let disposal = &self.disposal;
        let batch = self.queues.dequeue_batch(plan.depth, plan.max_batch, |node| {
            !meshes.contains_key(&node)
                && !gateway.has_pending_load(node)
                && !disposal.is_pending(node)
        });

        for entry in batch {
            match self
                .gateway
                .dispatch_load(entry.depth, entry.node, entry.priority, entry.urgent)
            {
                Ok(_) => trace!(node = entry.node, depth = entry.depth, "load dispatched"),
                Err(e) => {
                    // Ceiling hit or worker down: put the entry back and
                    // retry next iteration.
                    trace!(node = entry.node, "load not dispatched ({e}); requeued");
                    self.queues.enqueue(
                        entry.node,
                        entry.depth,
                        entry.priority + entry.importance,
                        entry.importance,
                        entry.urgent,
                        false,
                        false,
                        entry.enqueued_at,
                    );
                    break;
                }
            }
        }
    }

    fn drain_worker_events(&mut self) {
        for event in self.gateway.poll() {
            match event {
                WorkerEvent::Loader(depth, response) => {
                    self.handle_loader_response(depth, response);
                }
                WorkerEvent::Disposal(DisposalResponse::MeshesDisposed { disposed, .. }) => {
                    let confirmed = self.disposal.acknowledge(&disposed);
                    self.destroy_meshes(&confirmed);
                }
                WorkerEvent::Disposal(DisposalResponse::DisposalFailed { message, .. }) => {
                    warn!(%message, "disposal batch failed");
                }
                WorkerEvent::Frustum(FrustumResponse::CullingResults { results, stats, .. }) => {
                    self.stats.worker_time_us += stats.elapsed_us;
                    self.apply_cull_results(&results);
                }
                WorkerEvent::Frustum(FrustumResponse::NotReady { .. }) => {
                    debug!("cull pass ran before the frustum was primed");
                }
                WorkerEvent::Distance(DistanceResponse::Initialized { node_count, .. }) => {
                    debug!(node_count, "distance worker primed");
                    if self.preload_pending {
                        self.start_preload();
                    }
                }
                WorkerEvent::Distance(DistanceResponse::Calculated { result, .. }) => {
                    self.stats.distance_worker_evals += 1;
                    self.apply_distance_evaluation(result);
                }
            }
        }
    }

    fn handle_loader_response(&mut self, depth: u8, response: LoaderResponse) {
        match response {
            LoaderResponse::MeshLoaded { node, payload, .. } => {
                self.schedule_mesh_build(node, depth, payload);
            }
            LoaderResponse::BatchLoaded { meshes, .. } => {
                for (node, payload) in meshes {
                    self.schedule_mesh_build(node, depth, payload);
                }
            }
            LoaderResponse::MeshSkipped { node, reason, .. } => {
                self.stats.loads_skipped += 1;
                debug!(node, reason, "load skipped");
            }
            LoaderResponse::MeshNotFound { node, .. } => {
                self.stats.loads_skipped += 1;
                debug!(node, "node absent from the source");
            }
            LoaderResponse::LoadFailed { node, message, .. } => {
                self.stats.loads_failed += 1;
                warn!(node, %message, "load failed");
            }
        }
    }

    /// Queue a MESH_CREATION task for a fetched payload, unless the
    /// node's state moved on while the request was in flight.
    fn schedule_mesh_build(&mut self, node: u64, depth: u8, payload: MeshPayload) {
        if self.meshes.contains_key(&node) || self.disposal.is_pending(node) {
            self.stats.stale_responses += 1;
            trace!(node, "discarding stale load response");
            return;
        }
        let Some(center) = self.index.center_of(node) else {
            self.stats.stale_responses += 1;
            return;
        };

        let initially_visible =
            self.initial_visibility(depth, center, payload.bounding_radius());
        let build = MeshBuild::new(node, depth, center, payload, initially_visible);
        self.scheduler.enqueue(
            TaskTier::MeshCreation,
            "mesh_creation",
            TaskKind::MeshCreation(build),
        );
    }

    /// Visibility verdict for a freshly fetched node: depth 2 is always
    /// shown; deeper nodes compare face distance against the raw
    /// threshold, without the hysteresis buffers.
    fn initial_visibility(&self, depth: u8, center: glam::Vec3, radius: f32) -> bool {
        if depth == MIN_STREAM_DEPTH {
            return true;
        }
        let (Some(camera), Some(thresholds)) = (&self.camera, &self.thresholds) else {
            return true;
        };
        let Some(threshold) = thresholds.threshold_for_depth(depth) else {
            return true;
        };
        let face_distance = (camera.distance_to(center) - radius).max(0.0);
        face_distance <= threshold
    }

    fn register_mesh(&mut self, mesh: ActiveMesh) {
        let node = mesh.node;
        // Exclusivity: a node with an active mesh is never also queued.
        self.queues.remove(node);
        self.culler.mark(
            node,
            if mesh.visible {
                VisibilityState::Visible
            } else {
                VisibilityState::Hidden
            },
        );
        trace!(node, depth = mesh.depth, visible = mesh.visible, "mesh registered");
        self.meshes.insert(node, mesh);
        self.stats.meshes_created += 1;
    }

    /// The only place active meshes are destroyed, reached exclusively
    /// from disposal acknowledgment (or its degraded inline equivalent).
    fn destroy_meshes(&mut self, nodes: &[u64]) {
        for &node in nodes {
            if self.meshes.remove(&node).is_some() {
                self.stats.disposals += 1;
                self.culler.mark(node, VisibilityState::Disposed);
                trace!(node, "mesh destroyed");
            }
        }
    }

    fn snapshot_states(&self) -> Vec<NodeStreamState> {
        self.evaluator
            .nodes()
            .iter()
            .map(|n| {
                let mesh = self.meshes.get(&n.node);
                NodeStreamState {
                    node: n.node,
                    loaded: mesh.is_some(),
                    visible: mesh.is_some_and(|m| m.visible),
                    bounding_radius: mesh.map(|m| m.bounding_radius),
                }
            })
            .collect()
    }

    /// Bulk-fetch the always-resident base layer, falling back to the
    /// regular queues when no loader can take the batch.
    fn start_preload(&mut self) {
        self.preload_pending = false;
        let nodes = self.index.nodes_at_depth(MIN_STREAM_DEPTH);
        if nodes.is_empty() {
            return;
        }
        match self.gateway.preload_batch(MIN_STREAM_DEPTH, nodes.clone()) {
            Ok(_) => info!(count = nodes.len(), "base layer preload dispatched"),
            Err(e) => {
                debug!("preload batch refused ({e}); queueing individually");
                for node in nodes {
                    self.enqueue_load(node, MIN_STREAM_DEPTH, 0.0, false);
                }
            }
        }
    }
}
