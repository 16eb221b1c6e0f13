//! Per-depth load queues with importance-blended priority ordering.

use std::time::Duration;

use glam::Vec3;
use rustc_hash::FxHashMap;
use tracing::trace;

use vantage_math::CameraPose;
use vantage_octree::{MAX_STREAM_DEPTH, MIN_STREAM_DEPTH};

/// Importance weights. Importance is subtracted from the raw distance
/// priority, so higher importance sorts sooner.
const VIEW_ALIGNMENT_WEIGHT: f32 = 50.0;
const CENTRALITY_WEIGHT: f32 = 30.0;
const DEPTH3_BIAS: f32 = 20.0;
const DEPTH4_BIAS: f32 = 10.0;

/// One pending load request.
#[derive(Clone, Copy, Debug)]
pub struct LoadQueueEntry {
    /// Node to fetch.
    pub node: u64,
    /// Octree depth (2–4).
    pub depth: u8,
    /// Final priority: raw distance minus importance. Lower = sooner.
    pub priority: f32,
    /// The importance that was subtracted, kept for tie-breaking.
    pub importance: f32,
    /// Urgent entries (frustum reloads) sort ahead of everything else.
    pub urgent: bool,
    /// Clock time at enqueue.
    pub enqueued_at: Duration,
}

/// Computes the synthetic importance score that perturbs pure-distance
/// ordering: view-direction alignment, centrality relative to the octree
/// center, and a bias favoring coarser geometry first.
#[derive(Clone, Copy, Debug)]
pub struct ImportanceModel {
    octree_center: Vec3,
    max_distance: f32,
}

impl ImportanceModel {
    /// Build a model around the octree center and the calibrated max distance.
    pub fn new(octree_center: Vec3, max_distance: f32) -> Self {
        Self {
            octree_center,
            max_distance: max_distance.max(f32::EPSILON),
        }
    }

    /// Importance of a node for the current camera.
    pub fn importance(&self, camera: &CameraPose, center: Vec3, depth: u8) -> f32 {
        let alignment = camera.view_alignment(center).clamp(0.0, 1.0) * VIEW_ALIGNMENT_WEIGHT;

        let centrality = (1.0 - self.octree_center.distance(center) / self.max_distance)
            .clamp(0.0, 1.0)
            * CENTRALITY_WEIGHT;

        let depth_bias = match depth {
            3 => DEPTH3_BIAS,
            4 => DEPTH4_BIAS,
            _ => 0.0,
        };

        alignment + centrality + depth_bias
    }
}

/// Per-depth priority queues of pending load requests.
///
/// Queues are kept unsorted on insert; sorting and trimming happens lazily
/// when a queue exceeds the soft cap, and again at dequeue. Exclusivity is
/// enforced at enqueue time: a node that is loaded, already queued at the
/// depth, or already in flight is never inserted.
pub struct LoadQueueManager {
    queues: FxHashMap<u8, Vec<LoadQueueEntry>>,
    /// Soft cap per queue; exceeding it triggers a sort-and-trim.
    soft_cap: usize,
    /// Entries retained after a trim.
    trim_to: usize,
    /// Absolute priority gap under which importance breaks ties.
    tie_gap: f32,
}

impl LoadQueueManager {
    /// Create empty queues for depths 2–4.
    pub fn new(soft_cap: usize, trim_to: usize) -> Self {
        let mut queues = FxHashMap::default();
        for depth in MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH {
            queues.insert(depth, Vec::new());
        }
        Self {
            queues,
            soft_cap,
            trim_to,
            tie_gap: 0.0,
        }
    }

    /// Set the tie-break gap from the calibrated max distance.
    pub fn calibrate(&mut self, max_distance: f32, gap_fraction: f32) {
        self.tie_gap = max_distance * gap_fraction;
    }

    /// Insert a load request unless the node is already loaded, already
    /// queued at this depth, or already in flight. Returns whether the
    /// entry was inserted.
    ///
    /// `raw_priority` is a distance-like scalar (lower = sooner);
    /// `importance` is subtracted from it to boost preferred nodes.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &mut self,
        node: u64,
        depth: u8,
        raw_priority: f32,
        importance: f32,
        urgent: bool,
        already_loaded: bool,
        in_flight: bool,
        now: Duration,
    ) -> bool {
        if already_loaded || in_flight {
            return false;
        }
        let Some(queue) = self.queues.get_mut(&depth) else {
            return false;
        };
        if queue.iter().any(|e| e.node == node) {
            return false;
        }

        queue.push(LoadQueueEntry {
            node,
            depth,
            priority: raw_priority - importance,
            importance,
            urgent,
            enqueued_at: now,
        });
        trace!(node, depth, priority = raw_priority - importance, urgent, "enqueued load");

        if queue.len() > self.soft_cap {
            let tie_gap = self.tie_gap;
            sort_entries(queue, tie_gap);
            queue.truncate(self.trim_to);
        }
        true
    }

    /// Remove and return up to `max_count` entries for one depth, best
    /// priority first. Each entry is re-validated through `still_needed`
    /// before it is returned; entries that fail are dropped silently (a
    /// node may have become unnecessary while queued).
    pub fn dequeue_batch(
        &mut self,
        depth: u8,
        max_count: usize,
        mut still_needed: impl FnMut(u64) -> bool,
    ) -> Vec<LoadQueueEntry> {
        let Some(queue) = self.queues.get_mut(&depth) else {
            return Vec::new();
        };
        let tie_gap = self.tie_gap;
        sort_entries(queue, tie_gap);

        let mut batch = Vec::new();
        while batch.len() < max_count && !queue.is_empty() {
            let entry = queue.remove(0);
            if still_needed(entry.node) {
                batch.push(entry);
            }
        }
        batch
    }

    /// Drop any queued entry for this node, at any depth.
    pub fn remove(&mut self, node: u64) {
        for queue in self.queues.values_mut() {
            queue.retain(|e| e.node != node);
        }
    }

    /// Whether this node is queued at this depth.
    pub fn contains(&self, node: u64, depth: u8) -> bool {
        self.queues
            .get(&depth)
            .is_some_and(|q| q.iter().any(|e| e.node == node))
    }

    /// Queued entries at one depth.
    pub fn len_at(&self, depth: u8) -> usize {
        self.queues.get(&depth).map_or(0, Vec::len)
    }

    /// Queued entries across all depths.
    pub fn total_len(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    /// Drop every queued entry.
    pub fn clear(&mut self) {
        for queue in self.queues.values_mut() {
            queue.clear();
        }
    }
}

/// Sort by priority, except that urgent entries come first and entries
/// whose priorities are within the tie gap are ordered by importance
/// (higher first) instead.
fn sort_entries(entries: &mut [LoadQueueEntry], tie_gap: f32) {
    entries.sort_by(|a, b| {
        if a.urgent != b.urgent {
            b.urgent.cmp(&a.urgent)
        } else if (a.priority - b.priority).abs() <= tie_gap {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        } else {
            a.priority
                .partial_cmp(&b.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    });
}
