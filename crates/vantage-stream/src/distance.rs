//! Distance & visibility evaluation: worker delegation with a synchronous
//! fallback.

use std::time::Duration;

use tracing::debug;

use vantage_math::CameraPose;
use vantage_workers::{
    DispatchError, DistanceEvaluation, DistanceNode, DistanceThresholds, NodeStreamState,
    WorkerGateway, evaluate_distances,
};

/// How one evaluation round was answered.
#[derive(Debug, PartialEq, Eq)]
pub enum EvaluationPath {
    /// A request went to the distance worker; the result arrives later
    /// through the gateway.
    Delegated,
    /// The worker was unavailable; the evaluation was computed inline.
    Fallback,
    /// Rate-limited or a prior request is still outstanding; nothing ran.
    Skipped,
}

/// Decides per round whether to delegate distance evaluation to the
/// worker or recompute it inline, and rate-limits worker requests.
pub struct DistanceEvaluator {
    /// The full streamable node set, cached at initialization.
    nodes: Vec<DistanceNode>,
    /// Minimum interval between worker requests.
    frequency: Duration,
    last_request_at: Option<Duration>,
}

impl DistanceEvaluator {
    /// Create an evaluator with the given worker-request cadence.
    pub fn new(frequency: Duration) -> Self {
        Self {
            nodes: Vec::new(),
            frequency,
            last_request_at: None,
        }
    }

    /// Cache the streamable node set and prime the distance worker with it.
    ///
    /// In degraded mode the prime is refused and the evaluator simply owns
    /// the fallback path.
    pub fn prime(&mut self, nodes: Vec<DistanceNode>, gateway: &mut WorkerGateway) {
        self.nodes = nodes;
        match gateway.prime_distance(self.nodes.clone()) {
            Ok(_) => debug!(count = self.nodes.len(), "priming distance worker"),
            Err(e) => debug!("distance worker not primed ({e}); fallback only"),
        }
    }

    /// The cached node set.
    pub fn nodes(&self) -> &[DistanceNode] {
        &self.nodes
    }

    /// Run one evaluation round.
    ///
    /// Delegates to the distance worker when it is available, no prior
    /// request is outstanding, and the cadence allows; otherwise computes
    /// the result inline. Returns the inline result (to be applied
    /// atomically by the caller) together with the path taken; delegated
    /// results arrive later as a gateway event.
    pub fn tick(
        &mut self,
        now: Duration,
        camera: &CameraPose,
        thresholds: &DistanceThresholds,
        states: Vec<NodeStreamState>,
        gateway: &mut WorkerGateway,
    ) -> (Option<DistanceEvaluation>, EvaluationPath) {
        if let Some(last) = self.last_request_at
            && now.saturating_sub(last) < self.frequency
        {
            return (None, EvaluationPath::Skipped);
        }

        match gateway.request_distances(*camera, *thresholds, states.clone()) {
            Ok(_) => {
                self.last_request_at = Some(now);
                (None, EvaluationPath::Delegated)
            }
            Err(DispatchError::Busy(_)) => (None, EvaluationPath::Skipped),
            Err(_) => {
                // Degraded gateway: recompute inline.
                self.last_request_at = Some(now);
                let result = evaluate_distances(&self.nodes, camera, thresholds, &states);
                (Some(result), EvaluationPath::Fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    fn camera() -> CameraPose {
        CameraPose::from_look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            Mat4::perspective_rh(1.0, 1.0, 0.1, 10_000.0),
        )
    }

    fn nodes() -> Vec<DistanceNode> {
        vec![DistanceNode {
            node: 1,
            depth: 2,
            center: Vec3::new(0.0, 0.0, -100.0),
        }]
    }

    /// With a degraded gateway the evaluator computes inline, still
    /// honoring the cadence.
    #[test]
    fn test_fallback_with_rate_limit() {
        let mut gateway = WorkerGateway::degraded();
        let mut evaluator = DistanceEvaluator::new(Duration::from_millis(50));
        evaluator.prime(nodes(), &mut gateway);
        let thresholds = DistanceThresholds::from_max_distance(1000.0);

        let (result, path) = evaluator.tick(
            Duration::from_millis(0),
            &camera(),
            &thresholds,
            Vec::new(),
            &mut gateway,
        );
        assert_eq!(path, EvaluationPath::Fallback);
        let eval = result.expect("fallback returns a result");
        assert_eq!(eval.loads.len(), 1, "the base-layer node loads");

        // 20 ms later: rate-limited.
        let (result, path) = evaluator.tick(
            Duration::from_millis(20),
            &camera(),
            &thresholds,
            Vec::new(),
            &mut gateway,
        );
        assert_eq!(path, EvaluationPath::Skipped);
        assert!(result.is_none());

        // 60 ms later: allowed again.
        let (_, path) = evaluator.tick(
            Duration::from_millis(60),
            &camera(),
            &thresholds,
            Vec::new(),
            &mut gateway,
        );
        assert_eq!(path, EvaluationPath::Fallback);
    }
}
