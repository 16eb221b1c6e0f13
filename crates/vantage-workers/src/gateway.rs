//! The worker gateway: spawning, correlation, and concurrency ceilings.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use vantage_math::CameraPose;
use vantage_octree::{MAX_STREAM_DEPTH, MIN_STREAM_DEPTH};

use crate::culling::run_frustum_worker;
use crate::disposer::run_disposer;
use crate::distance::run_distance_worker;
use crate::error::DispatchError;
use crate::loader::{MeshSource, run_loader};
use crate::messages::{
    CullCandidate, DisposalRequest, DistanceNode, DistanceRequest, DistanceThresholds,
    FrustumRequest, LoaderRequest, NodeStreamState, RequestId, WorkerEvent, WorkerKind,
};

/// Request channel capacity per worker. Generous relative to the
/// concurrency ceilings so `try_send` never sees a full channel in
/// normal operation.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Event channel capacity shared by all workers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-kind concurrency ceilings.
#[derive(Clone, Copy, Debug)]
pub struct GatewayLimits {
    /// Concurrent requests allowed per depth loader.
    pub loader_concurrency: usize,
    /// Concurrent requests allowed for the disposal worker.
    pub disposal_concurrency: usize,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self {
            loader_concurrency: 3,
            disposal_concurrency: 5,
        }
    }
}

/// An outstanding request awaiting its terminal response.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// The worker the request went to.
    pub kind: WorkerKind,
    /// Nodes the request concerns.
    pub nodes: Vec<u64>,
    /// When the request was dispatched.
    pub submitted_at: Instant,
}

/// Facade over the six workers.
///
/// Every dispatch increments the kind's load counter and records a
/// pending entry; [`poll`](Self::poll) pairs each terminal response with
/// the removal of that entry and the decrement, in one place, so the
/// counters always equal the number of dispatched-but-not-terminal
/// requests.
///
/// If any worker fails to spawn, the whole gateway runs degraded: every
/// dispatch is refused as [`DispatchError::Unavailable`] and callers fall
/// back to their synchronous paths or simply skip the work.
pub struct WorkerGateway {
    loaders: FxHashMap<u8, Sender<LoaderRequest>>,
    disposer: Option<Sender<DisposalRequest>>,
    frustum: Option<Sender<FrustumRequest>>,
    distance: Option<Sender<DistanceRequest>>,
    events: Receiver<WorkerEvent>,
    pending: FxHashMap<RequestId, PendingRequest>,
    counters: FxHashMap<WorkerKind, usize>,
    limits: GatewayLimits,
    next_request_id: u64,
    degraded: bool,
}

impl WorkerGateway {
    /// Spawn all six workers. Loader workers fetch through `source`.
    ///
    /// If any thread fails to spawn the gateway comes up degraded rather
    /// than failing: the scheduler must be able to operate, at reduced
    /// functionality, with zero workers available.
    pub fn spawn(source: Arc<dyn MeshSource>, limits: GatewayLimits) -> Self {
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);

        let mut loaders = FxHashMap::default();
        for depth in MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH {
            let (tx, rx) = bounded(REQUEST_CHANNEL_CAPACITY);
            let source = Arc::clone(&source);
            let events = event_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("mesh-loader-{depth}"))
                .spawn(move || run_loader(depth, source, rx, events));
            match spawned {
                Ok(_) => {
                    loaders.insert(depth, tx);
                }
                Err(e) => {
                    warn!("failed to spawn depth-{depth} loader: {e}; gateway degraded");
                    return Self::degraded();
                }
            }
        }

        let (disposer_tx, disposer_rx) = bounded(REQUEST_CHANNEL_CAPACITY);
        let (frustum_tx, frustum_rx) = bounded(REQUEST_CHANNEL_CAPACITY);
        let (distance_tx, distance_rx) = bounded(REQUEST_CHANNEL_CAPACITY);

        let workers: [(&str, Box<dyn FnOnce() + Send>); 3] = [
            ("mesh-disposer", {
                let events = event_tx.clone();
                Box::new(move || run_disposer(disposer_rx, events))
            }),
            ("frustum-cull", {
                let events = event_tx.clone();
                Box::new(move || run_frustum_worker(frustum_rx, events))
            }),
            ("distance-eval", {
                let events = event_tx;
                Box::new(move || run_distance_worker(distance_rx, events))
            }),
        ];
        for (name, body) in workers {
            if let Err(e) = std::thread::Builder::new().name(name.into()).spawn(body) {
                warn!("failed to spawn {name} worker: {e}; gateway degraded");
                return Self::degraded();
            }
        }

        debug!("worker gateway ready: 3 loaders + disposer + frustum + distance");
        Self {
            loaders,
            disposer: Some(disposer_tx),
            frustum: Some(frustum_tx),
            distance: Some(distance_tx),
            events: event_rx,
            pending: FxHashMap::default(),
            counters: FxHashMap::default(),
            limits,
            next_request_id: 1,
            degraded: false,
        }
    }

    /// A gateway with no workers: every dispatch is refused.
    pub fn degraded() -> Self {
        let (_tx, rx) = bounded(1);
        Self {
            loaders: FxHashMap::default(),
            disposer: None,
            frustum: None,
            distance: None,
            events: rx,
            pending: FxHashMap::default(),
            counters: FxHashMap::default(),
            limits: GatewayLimits::default(),
            next_request_id: 1,
            degraded: true,
        }
    }

    /// Whether the gateway is running without workers.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn in_flight_mut(&mut self, kind: WorkerKind) -> &mut usize {
        self.counters.entry(kind).or_insert(0)
    }

    /// Dispatched-but-not-terminal request count for one worker kind.
    pub fn in_flight(&self, kind: WorkerKind) -> usize {
        self.counters.get(&kind).copied().unwrap_or(0)
    }

    /// Total outstanding requests across all workers.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether any pending loader request concerns this node.
    pub fn has_pending_load(&self, node: u64) -> bool {
        self.pending
            .values()
            .any(|p| matches!(p.kind, WorkerKind::Loader(_)) && p.nodes.contains(&node))
    }

    fn record(&mut self, id: RequestId, kind: WorkerKind, nodes: Vec<u64>) {
        self.pending.insert(
            id,
            PendingRequest {
                kind,
                nodes,
                submitted_at: Instant::now(),
            },
        );
        *self.in_flight_mut(kind) += 1;
    }

    /// Fetch one node's mesh through the depth loader.
    pub fn dispatch_load(
        &mut self,
        depth: u8,
        node: u64,
        priority: f32,
        urgent: bool,
    ) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Loader(depth);
        let sender = self
            .loaders
            .get(&depth)
            .cloned()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) >= self.limits.loader_concurrency {
            return Err(DispatchError::AtCapacity(kind));
        }

        let request_id = self.next_id();
        sender
            .try_send(LoaderRequest::LoadMesh {
                request_id,
                node,
                priority,
                urgent,
            })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, vec![node]);
        Ok(request_id)
    }

    /// Bulk fetch for the initial base-layer load. Counts as one request
    /// against the depth loader's ceiling.
    pub fn preload_batch(
        &mut self,
        depth: u8,
        nodes: Vec<u64>,
    ) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Loader(depth);
        let sender = self
            .loaders
            .get(&depth)
            .cloned()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) >= self.limits.loader_concurrency {
            return Err(DispatchError::AtCapacity(kind));
        }

        let request_id = self.next_id();
        sender
            .try_send(LoaderRequest::PreloadBatch {
                request_id,
                nodes: nodes.clone(),
            })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, nodes);
        Ok(request_id)
    }

    /// Forward an eviction batch to the disposal worker.
    pub fn dispatch_dispose(
        &mut self,
        nodes: Vec<u64>,
        priority: f32,
    ) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Disposal;
        let sender = self
            .disposer
            .clone()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) >= self.limits.disposal_concurrency {
            return Err(DispatchError::AtCapacity(kind));
        }

        let request_id = self.next_id();
        sender
            .try_send(DisposalRequest::DisposeMeshes {
                request_id,
                nodes: nodes.clone(),
                priority,
            })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, nodes);
        Ok(request_id)
    }

    /// Replace the frustum worker's cached camera. Fire-and-forget: no
    /// correlation, no counter.
    pub fn update_frustum(&mut self, camera: CameraPose) -> Result<(), DispatchError> {
        let kind = WorkerKind::Frustum;
        let sender = self
            .frustum
            .clone()
            .ok_or(DispatchError::Unavailable(kind))?;
        sender
            .try_send(FrustumRequest::UpdateFrustum { camera })
            .map_err(|_| DispatchError::Unavailable(kind))
    }

    /// Submit a cull pass. A single request may be outstanding; a new one
    /// is refused while the previous has not come back.
    pub fn request_cull(
        &mut self,
        candidates: Vec<CullCandidate>,
        buffer_multiplier: f32,
    ) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Frustum;
        let sender = self
            .frustum
            .clone()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) > 0 {
            return Err(DispatchError::Busy(kind));
        }

        let request_id = self.next_id();
        let nodes = candidates.iter().map(|c| c.node).collect();
        sender
            .try_send(FrustumRequest::CullNodes {
                request_id,
                candidates,
                buffer_multiplier,
            })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, nodes);
        Ok(request_id)
    }

    /// Prime the distance worker with the full streamable node set.
    pub fn prime_distance(&mut self, nodes: Vec<DistanceNode>) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Distance;
        let sender = self
            .distance
            .clone()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) > 0 {
            return Err(DispatchError::Busy(kind));
        }

        let request_id = self.next_id();
        sender
            .try_send(DistanceRequest::InitializeNodes { request_id, nodes })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, Vec::new());
        Ok(request_id)
    }

    /// Ask the distance worker for a full evaluation. A single request may
    /// be outstanding.
    pub fn request_distances(
        &mut self,
        camera: CameraPose,
        thresholds: DistanceThresholds,
        states: Vec<NodeStreamState>,
    ) -> Result<RequestId, DispatchError> {
        let kind = WorkerKind::Distance;
        let sender = self
            .distance
            .clone()
            .ok_or(DispatchError::Unavailable(kind))?;
        if self.in_flight(kind) > 0 {
            return Err(DispatchError::Busy(kind));
        }

        let request_id = self.next_id();
        sender
            .try_send(DistanceRequest::CalculateDistances {
                request_id,
                camera,
                thresholds,
                states,
            })
            .map_err(|_| DispatchError::Unavailable(kind))?;
        self.record(request_id, kind, Vec::new());
        Ok(request_id)
    }

    /// Drain all worker responses received since the last poll.
    ///
    /// Every drained event is terminal for its request id: the pending
    /// entry is removed and the kind's counter decremented here, and only
    /// here, keeping the counters symmetric with the pending table.
    pub fn poll(&mut self) -> Vec<WorkerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            match self.pending.remove(&event.request_id()) {
                Some(request) => {
                    let counter = self.in_flight_mut(request.kind);
                    *counter = counter.saturating_sub(1);
                }
                None => {
                    warn!(request_id = ?event.request_id(), "response with no pending entry");
                }
            }
            drained.push(event);
        }
        drained
    }

    /// Drop every worker channel. Worker threads exit when their request
    /// channels disconnect; any in-flight responses are discarded.
    pub fn shutdown(&mut self) {
        self.loaders.clear();
        self.disposer = None;
        self.frustum = None;
        self.distance = None;
        self.pending.clear();
        self.counters.clear();
    }
}
