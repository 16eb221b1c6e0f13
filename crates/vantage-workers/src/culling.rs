//! Frustum culling: the worker thread body and the pure classification
//! function behind it.

use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use vantage_math::{Aabb, CameraPose, Frustum};
use vantage_octree::MIN_STREAM_DEPTH;

use crate::messages::{
    CullCandidate, CullResults, CullStats, FrustumRequest, FrustumResponse, ReloadCandidate,
    VisibilityState, WorkerEvent,
};

/// Classify nodes against the camera frustum expanded by `buffer_multiplier`.
///
/// Transitions follow the three-state machine:
/// - Leaving the buffered frustum marks a node for disposal — except depth
///   2, the always-resident base layer.
/// - A disposed node re-entering the buffered frustum becomes a reload
///   candidate and is marked hidden, not visible; visibility is granted
///   only once reloaded and distance-eligible.
/// - Loaded in-frustum nodes are reported visible; in-frustum nodes still
///   awaiting their mesh stay hidden.
pub fn cull_nodes(
    candidates: &[CullCandidate],
    camera: &CameraPose,
    buffer_multiplier: f32,
) -> (CullResults, CullStats) {
    let started = Instant::now();
    let frustum = Frustum::from_view_projection(&camera.view_projection);

    let mut results = CullResults::default();

    for candidate in candidates {
        let aabb = Aabb::from_center_size(candidate.center, candidate.size);
        let inside = frustum.is_visible_buffered(&aabb, buffer_multiplier);

        if !inside {
            // Base layer never leaves residency via culling.
            if candidate.depth == MIN_STREAM_DEPTH {
                continue;
            }
            if candidate.state != VisibilityState::Disposed {
                results.dispose.push(candidate.node);
            }
            continue;
        }

        if candidate.state == VisibilityState::Disposed {
            if !candidate.loaded {
                results.reload.push(ReloadCandidate {
                    node: candidate.node,
                    depth: candidate.depth,
                    distance: camera.distance_to(candidate.center),
                });
            }
            results.hidden.push(candidate.node);
        } else if candidate.loaded {
            results.visible.push(candidate.node);
        } else {
            results.hidden.push(candidate.node);
        }
    }

    let stats = CullStats {
        evaluated: candidates.len(),
        elapsed_us: started.elapsed().as_micros() as u64,
    };
    (results, stats)
}

/// Frustum worker thread body: caches the latest camera pose and answers
/// cull requests until the request channel closes.
pub(crate) fn run_frustum_worker(requests: Receiver<FrustumRequest>, events: Sender<WorkerEvent>) {
    let mut camera: Option<CameraPose> = None;

    while let Ok(request) = requests.recv() {
        match request {
            FrustumRequest::UpdateFrustum { camera: pose } => {
                camera = Some(pose);
            }
            FrustumRequest::CullNodes {
                request_id,
                candidates,
                buffer_multiplier,
            } => {
                let response = match &camera {
                    Some(pose) => {
                        let (results, stats) = cull_nodes(&candidates, pose, buffer_multiplier);
                        FrustumResponse::CullingResults {
                            request_id,
                            results,
                            stats,
                        }
                    }
                    None => FrustumResponse::NotReady { request_id },
                };
                if events.send(WorkerEvent::Frustum(response)).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    fn camera() -> CameraPose {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10_000.0);
        CameraPose::from_look_at(Vec3::ZERO, Vec3::NEG_Z, proj)
    }

    fn candidate(
        node: u64,
        depth: u8,
        center: Vec3,
        loaded: bool,
        state: VisibilityState,
    ) -> CullCandidate {
        CullCandidate {
            node,
            depth,
            center,
            size: 10.0,
            loaded,
            state,
        }
    }

    /// A loaded node in front of the camera is visible; an unloaded one is hidden.
    #[test]
    fn test_in_frustum_classification() {
        let in_front = Vec3::new(0.0, 0.0, -100.0);
        let candidates = [
            candidate(1, 3, in_front, true, VisibilityState::Hidden),
            candidate(2, 3, in_front, false, VisibilityState::Hidden),
        ];
        let (results, stats) = cull_nodes(&candidates, &camera(), 1.5);
        assert_eq!(results.visible, vec![1]);
        assert_eq!(results.hidden, vec![2]);
        assert!(results.dispose.is_empty());
        assert_eq!(stats.evaluated, 2);
    }

    /// Nodes leaving the buffered frustum are marked for disposal, except
    /// the depth-2 base layer.
    #[test]
    fn test_leaving_frustum_disposes_except_depth2() {
        let behind = Vec3::new(0.0, 0.0, 500.0);
        let candidates = [
            candidate(1, 3, behind, true, VisibilityState::Visible),
            candidate(2, 2, behind, true, VisibilityState::Visible),
            candidate(3, 4, behind, false, VisibilityState::Disposed),
        ];
        let (results, _) = cull_nodes(&candidates, &camera(), 1.5);
        assert_eq!(results.dispose, vec![1], "only the non-base visible node");
        assert!(results.reload.is_empty());
    }

    /// A disposed node re-entering the frustum becomes a reload candidate
    /// and is hidden, not visible.
    #[test]
    fn test_reentry_reloads_as_hidden() {
        let in_front = Vec3::new(0.0, 0.0, -200.0);
        let candidates = [candidate(7, 4, in_front, false, VisibilityState::Disposed)];
        let (results, _) = cull_nodes(&candidates, &camera(), 1.5);
        assert!(results.visible.is_empty());
        assert_eq!(results.hidden, vec![7]);
        assert_eq!(results.reload.len(), 1);
        assert_eq!(results.reload[0].node, 7);
        assert!((results.reload[0].distance - 200.0).abs() < 1e-3);
    }

    /// The worker answers NotReady before any UpdateFrustum arrives.
    #[test]
    fn test_worker_not_ready_without_frustum() {
        let (req_tx, req_rx) = crossbeam_channel::bounded(4);
        let (ev_tx, ev_rx) = crossbeam_channel::bounded(4);
        let handle = std::thread::spawn(move || run_frustum_worker(req_rx, ev_tx));

        req_tx
            .send(FrustumRequest::CullNodes {
                request_id: crate::messages::RequestId(1),
                candidates: Vec::new(),
                buffer_multiplier: 1.5,
            })
            .unwrap();
        let event = ev_rx
            .recv_timeout(std::time::Duration::from_secs(1))
            .expect("worker should respond");
        assert!(matches!(
            event,
            WorkerEvent::Frustum(FrustumResponse::NotReady { .. })
        ));

        drop(req_tx);
        handle.join().unwrap();
    }
}
