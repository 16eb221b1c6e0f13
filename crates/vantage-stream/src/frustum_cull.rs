//! Visibility-state ownership and frustum-cull reconciliation.

use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::trace;

use vantage_octree::MIN_STREAM_DEPTH;
use vantage_workers::{CullResults, ReloadCandidate, VisibilityState};

/// What one cull pass asks the rest of the scheduler to do.
#[derive(Debug, Default)]
pub struct CullOutcome {
    /// Nodes to queue for eviction. Never contains depth 2.
    pub dispose: Vec<u64>,
    /// Nodes to re-enqueue for loading at boosted priority.
    pub reloads: Vec<ReloadCandidate>,
    /// Loaded nodes whose meshes should be shown.
    pub show: Vec<u64>,
    /// Nodes whose meshes should be hidden.
    pub hide: Vec<u64>,
}

/// Sole owner of the per-node [`VisibilityState`] map, driving the
/// `Visible ⇄ Hidden ⇄ Disposed` machine from cull results.
///
/// `Disposed → Hidden` happens only via the reload path, `Hidden/Visible
/// → Disposed` only via the cull path, and depth-2 nodes are pinned
/// outside the machine entirely (always visible once loaded).
pub struct FrustumCuller {
    states: FxHashMap<u64, VisibilityState>,
    /// Minimum interval between cull passes.
    frequency: Duration,
    last_cull_at: Option<Duration>,
    /// Culls also run only on alternating LOD-update cycles.
    alternate: bool,
}

impl FrustumCuller {
    /// Create a culler with the given cadence.
    pub fn new(frequency: Duration) -> Self {
        Self {
            states: FxHashMap::default(),
            frequency,
            last_cull_at: None,
            alternate: false,
        }
    }

    /// Current state of a node; unknown nodes are `Disposed`.
    pub fn state_of(&self, node: u64) -> VisibilityState {
        self.states.get(&node).copied().unwrap_or_default()
    }

    /// Record a state transition directly (used by the mesh lifecycle when
    /// a mesh materializes and by disposal acknowledgment).
    pub fn mark(&mut self, node: u64, state: VisibilityState) {
        self.states.insert(node, state);
    }

    /// Whether a cull pass should run now. Advances the alternation
    /// toggle each call, so at most every other LOD-update cycle culls,
    /// and never more often than the cadence allows.
    pub fn should_cull(&mut self, now: Duration) -> bool {
        self.alternate = !self.alternate;
        if !self.alternate {
            return false;
        }
        match self.last_cull_at {
            Some(last) if now.saturating_sub(last) < self.frequency => false,
            _ => {
                self.last_cull_at = Some(now);
                true
            }
        }
    }

    /// Fold one set of cull results into the state map and produce the
    /// work the rest of the scheduler must pick up.
    ///
    /// `depth_of` resolves node depths so the depth-2 exemption can be
    /// enforced here as well, regardless of what the worker sent.
    pub fn apply_results(
        &mut self,
        results: &CullResults,
        mut depth_of: impl FnMut(u64) -> Option<u8>,
    ) -> CullOutcome {
        let mut outcome = CullOutcome::default();

        for &node in &results.dispose {
            // The base layer is exempt from frustum-triggered disposal.
            if depth_of(node) == Some(MIN_STREAM_DEPTH) {
                continue;
            }
            self.states.insert(node, VisibilityState::Disposed);
            outcome.dispose.push(node);
            outcome.hide.push(node);
        }

        for reload in &results.reload {
            // Disposed → Hidden happens only here, the reload path.
            self.states.insert(reload.node, VisibilityState::Hidden);
            outcome.reloads.push(*reload);
        }

        for &node in &results.hidden {
            if self.state_of(node) != VisibilityState::Disposed {
                self.states.insert(node, VisibilityState::Hidden);
                outcome.hide.push(node);
            } else if results.reload.iter().any(|r| r.node == node) {
                // Already transitioned to Hidden by the reload above.
            } else {
                trace!(node, "hidden result for disposed node ignored");
            }
        }

        for &node in &results.visible {
            self.states.insert(node, VisibilityState::Visible);
            outcome.show.push(node);
        }

        outcome
    }

    /// Forget every state (full teardown).
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_of(node: u64) -> Option<u8> {
        // Test convention: node id 2xx is depth 2, 3xx depth 3, 4xx depth 4.
        Some((node / 100) as u8)
    }

    /// The alternation toggle culls at most every other cycle, and the
    /// cadence gates further.
    #[test]
    fn test_should_cull_alternates_and_rate_limits() {
        let mut culler = FrustumCuller::new(Duration::from_millis(60));

        assert!(culler.should_cull(Duration::from_millis(0)));
        assert!(!culler.should_cull(Duration::from_millis(16)), "off cycle");
        assert!(
            !culler.should_cull(Duration::from_millis(32)),
            "on cycle but inside the 60 ms cadence"
        );
        assert!(!culler.should_cull(Duration::from_millis(48)), "off cycle");
        assert!(culler.should_cull(Duration::from_millis(64)));
    }

    /// Dispose transitions skip depth 2 and mark everything else Disposed.
    #[test]
    fn test_dispose_exempts_base_layer() {
        let mut culler = FrustumCuller::new(Duration::from_millis(60));
        culler.mark(201, VisibilityState::Visible);
        culler.mark(301, VisibilityState::Visible);

        let results = CullResults {
            dispose: vec![201, 301],
            ..Default::default()
        };
        let outcome = culler.apply_results(&results, depth_of);

        assert_eq!(outcome.dispose, vec![301], "depth 2 never disposed");
        assert_eq!(culler.state_of(201), VisibilityState::Visible);
        assert_eq!(culler.state_of(301), VisibilityState::Disposed);
    }

    /// Re-entering nodes become Hidden (not Visible) and are reloaded.
    #[test]
    fn test_reentry_is_hidden_and_reloaded() {
        let mut culler = FrustumCuller::new(Duration::from_millis(60));
        assert_eq!(culler.state_of(401), VisibilityState::Disposed);

        let results = CullResults {
            reload: vec![ReloadCandidate {
                node: 401,
                depth: 4,
                distance: 120.0,
            }],
            hidden: vec![401],
            ..Default::default()
        };
        let outcome = culler.apply_results(&results, depth_of);

        assert_eq!(culler.state_of(401), VisibilityState::Hidden);
        assert_eq!(outcome.reloads.len(), 1);
        assert!(outcome.show.is_empty(), "visibility only after reload");
    }

    /// Visible results flow through to the show list.
    #[test]
    fn test_visible_results_show_meshes() {
        let mut culler = FrustumCuller::new(Duration::from_millis(60));
        culler.mark(302, VisibilityState::Hidden);

        let results = CullResults {
            visible: vec![302],
            ..Default::default()
        };
        let outcome = culler.apply_results(&results, depth_of);
        assert_eq!(outcome.show, vec![302]);
        assert_eq!(culler.state_of(302), VisibilityState::Visible);
    }
}
