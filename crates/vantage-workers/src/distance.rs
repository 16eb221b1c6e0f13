//! Distance evaluation: the worker thread body and the pure function it
//! shares with the scheduler's synchronous fallback path.

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use rustc_hash::FxHashMap;

use vantage_math::CameraPose;
use vantage_octree::MIN_STREAM_DEPTH;

use crate::messages::{
    DistanceEvaluation, DistanceNode, DistanceRequest, DistanceResponse, DistanceStats,
    DistanceThresholds, LoadDecision, NodeStreamState, WorkerEvent,
};

/// Evaluate load/unload/visibility decisions for every node.
///
/// This is the single implementation behind both the distance worker and
/// the scheduler's synchronous fallback, so the two paths can never drift.
///
/// Rules, per depth:
/// - Depth 2 is always load-eligible and never unloaded by distance.
/// - Depth 3/4 load when face distance ≤ threshold + load buffer, and
///   unload only past threshold + unload buffer. The asymmetry is the
///   hysteresis that prevents oscillation at the boundary.
/// - Visibility of loaded nodes follows the raw threshold with no buffer
///   inflation.
/// - Nodes within one extra load buffer beyond the load boundary become
///   predictive loads at reduced priority.
///
/// Face distance is the camera-to-center distance minus the loaded mesh's
/// bounding-sphere radius when known, else the raw center distance.
pub fn evaluate_distances(
    nodes: &[DistanceNode],
    camera: &CameraPose,
    thresholds: &DistanceThresholds,
    states: &[NodeStreamState],
) -> DistanceEvaluation {
    let started = Instant::now();

    let state_by_node: FxHashMap<u64, &NodeStreamState> =
        states.iter().map(|s| (s.node, s)).collect();

    let mut out = DistanceEvaluation::default();

    for node in nodes {
        let state = state_by_node.get(&node.node);
        let loaded = state.is_some_and(|s| s.loaded);
        let shown = state.is_some_and(|s| s.visible);

        let center_distance = camera.distance_to(node.center);
        let face_distance = match state.and_then(|s| s.bounding_radius) {
            Some(radius) if loaded => (center_distance - radius).max(0.0),
            _ => center_distance,
        };

        if node.depth == MIN_STREAM_DEPTH {
            // Base layer: always load, always show.
            if !loaded {
                out.loads.push(LoadDecision {
                    node: node.node,
                    depth: node.depth,
                    priority: face_distance,
                });
            } else if !shown {
                out.visibility.push((node.node, true));
            }
            continue;
        }

        let Some(threshold) = thresholds.threshold_for_depth(node.depth) else {
            continue;
        };
        let load_boundary = threshold + thresholds.load_buffer;
        let unload_boundary = threshold + thresholds.unload_buffer;

        if loaded {
            if face_distance > unload_boundary {
                out.unloads.push(node.node);
                continue;
            }
            // Shown strictly by the raw threshold, no hysteresis.
            let should_show = face_distance <= threshold;
            if should_show != shown {
                out.visibility.push((node.node, should_show));
            }
        } else if face_distance <= load_boundary {
            out.loads.push(LoadDecision {
                node: node.node,
                depth: node.depth,
                priority: face_distance,
            });
        } else if face_distance <= load_boundary + thresholds.load_buffer {
            // Just outside the load boundary: worth fetching early, but
            // behind every real load.
            out.predictive.push(LoadDecision {
                node: node.node,
                depth: node.depth,
                priority: face_distance + thresholds.load_buffer,
            });
        }
    }

    out.stats = DistanceStats {
        evaluated: nodes.len(),
        elapsed_us: started.elapsed().as_micros() as u64,
    };
    out
}

/// Distance worker thread body: primes itself with the node set, then
/// answers evaluation requests until the request channel closes.
pub(crate) fn run_distance_worker(
    requests: Receiver<DistanceRequest>,
    events: Sender<WorkerEvent>,
) {
    let mut nodes: Vec<DistanceNode> = Vec::new();

    while let Ok(request) = requests.recv() {
        let response = match request {
            DistanceRequest::InitializeNodes {
                request_id,
                nodes: primed,
            } => {
                nodes = primed;
                DistanceResponse::Initialized {
                    request_id,
                    node_count: nodes.len(),
                }
            }
            DistanceRequest::CalculateDistances {
                request_id,
                camera,
                thresholds,
                states,
            } => DistanceResponse::Calculated {
                request_id,
                result: evaluate_distances(&nodes, &camera, &thresholds, &states),
            },
        };
        if events.send(WorkerEvent::Distance(response)).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    fn camera_at(position: Vec3) -> CameraPose {
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 10_000.0);
        CameraPose::from_look_at(position, position + Vec3::NEG_Z, proj)
    }

    fn node(id: u64, depth: u8, center: Vec3) -> DistanceNode {
        DistanceNode {
            node: id,
            depth,
            center,
        }
    }

    fn loaded_state(id: u64, visible: bool) -> NodeStreamState {
        NodeStreamState {
            node: id,
            loaded: true,
            visible,
            bounding_radius: None,
        }
    }

    /// maxDistance 1000, depth 3: a node at face distance 925 loads
    /// (boundary 930), and once loaded does not unload until past 936.
    #[test]
    fn test_hysteresis_asymmetry() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        assert_eq!(thresholds.depth3_threshold, 900.0);
        assert_eq!(thresholds.load_buffer, 30.0);
        assert!((thresholds.unload_buffer - 36.0).abs() < 1e-3);

        let nodes = [node(1, 3, Vec3::new(0.0, 0.0, -925.0))];
        let camera = camera_at(Vec3::ZERO);

        // Not loaded, inside the load boundary: loads.
        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[]);
        assert_eq!(eval.loads.len(), 1, "925 <= 930 should load");
        assert!(eval.unloads.is_empty());

        // Loaded, anywhere in [900, 936]: stays loaded.
        for z in [905.0_f32, 925.0, 935.9] {
            let nodes = [node(1, 3, Vec3::new(0.0, 0.0, -z))];
            let eval = evaluate_distances(&nodes, &camera, &thresholds, &[loaded_state(1, false)]);
            assert!(
                eval.unloads.is_empty(),
                "face distance {z} should not unload (boundary 936)"
            );
        }

        // Loaded, past 936: unloads.
        let nodes = [node(1, 3, Vec3::new(0.0, 0.0, -937.0))];
        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[loaded_state(1, true)]);
        assert_eq!(eval.unloads, vec![1], "937 > 936 should unload");
    }

    /// Depth 2 is always load-eligible and never distance-unloaded.
    #[test]
    fn test_depth2_permanence() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        let camera = camera_at(Vec3::ZERO);
        let far_base = [node(9, 2, Vec3::new(0.0, 0.0, -5000.0))];

        let eval = evaluate_distances(&far_base, &camera, &thresholds, &[]);
        assert_eq!(eval.loads.len(), 1, "depth 2 loads regardless of distance");

        let eval = evaluate_distances(&far_base, &camera, &thresholds, &[loaded_state(9, true)]);
        assert!(eval.unloads.is_empty(), "depth 2 is never unloaded");
    }

    /// Visibility follows the raw threshold without hysteresis inflation:
    /// a loaded depth-3 node between threshold and the load boundary stays
    /// loaded but is not shown.
    #[test]
    fn test_visibility_uses_raw_threshold() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        let camera = camera_at(Vec3::ZERO);
        let nodes = [node(1, 3, Vec3::new(0.0, 0.0, -915.0))];

        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[loaded_state(1, true)]);
        assert!(eval.unloads.is_empty());
        assert_eq!(
            eval.visibility,
            vec![(1, false)],
            "915 > 900: loaded but not shown"
        );

        // Back inside the raw threshold: shown again.
        let nodes = [node(1, 3, Vec3::new(0.0, 0.0, -890.0))];
        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[loaded_state(1, false)]);
        assert_eq!(eval.visibility, vec![(1, true)]);
    }

    /// A known bounding radius shrinks the effective distance: a node whose
    /// center is out of range can still be within face-distance range.
    #[test]
    fn test_face_distance_uses_bounding_radius() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        let camera = camera_at(Vec3::ZERO);
        let nodes = [node(1, 4, Vec3::new(0.0, 0.0, -560.0))];

        // Raw center distance 560 > unload boundary 536: would unload...
        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[loaded_state(1, true)]);
        assert_eq!(eval.unloads, vec![1]);

        // ...but a 100-unit bounding radius brings the face to 460.
        let state = NodeStreamState {
            node: 1,
            loaded: true,
            visible: true,
            bounding_radius: Some(100.0),
        };
        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[state]);
        assert!(eval.unloads.is_empty());
    }

    /// The §scenario: depth-4 node at 400 with threshold30 = 500 loads only
    /// once the camera is within 530 of it.
    #[test]
    fn test_depth4_load_boundary() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        assert_eq!(thresholds.depth4_threshold, 500.0);
        let nodes = [node(4, 4, Vec3::new(0.0, 0.0, -400.0))];

        // Camera 531 away: no load yet.
        let eval = evaluate_distances(
            &nodes,
            &camera_at(Vec3::new(0.0, 0.0, 131.0)),
            &thresholds,
            &[],
        );
        assert!(eval.loads.is_empty(), "531 > 530 must not load");

        // Camera 530 away: loads.
        let eval = evaluate_distances(
            &nodes,
            &camera_at(Vec3::new(0.0, 0.0, 130.0)),
            &thresholds,
            &[],
        );
        assert_eq!(eval.loads.len(), 1, "530 <= 530 must load");
    }

    /// Nodes within one extra buffer beyond the load boundary come back as
    /// predictive loads, behind every real load.
    #[test]
    fn test_predictive_band() {
        let thresholds = DistanceThresholds::from_max_distance(1000.0);
        let camera = camera_at(Vec3::ZERO);
        let nodes = [
            node(1, 3, Vec3::new(0.0, 0.0, -925.0)),
            node(2, 3, Vec3::new(0.0, 0.0, -945.0)),
            node(3, 3, Vec3::new(0.0, 0.0, -990.0)),
        ];

        let eval = evaluate_distances(&nodes, &camera, &thresholds, &[]);
        assert_eq!(eval.loads.len(), 1);
        assert_eq!(eval.predictive.len(), 1, "945 is in (930, 960]");
        assert_eq!(eval.predictive[0].node, 2);
        assert!(
            eval.predictive[0].priority > eval.loads[0].priority,
            "predictive priority must sort behind real loads"
        );
    }
}
