//! Disposal worker: acknowledges eviction requests.
//!
//! The renderer releases GPU resources on the control thread; this worker
//! owns the disposal bookkeeping (which nodes have been evicted, in what
//! order) so eviction acks are serialized and the coordinator can destroy
//! an `ActiveMesh` only after its terminal response.

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;

use crate::messages::{DisposalRequest, DisposalResponse, WorkerEvent};

/// Disposal worker thread body. Answers requests until the request
/// channel closes.
pub(crate) fn run_disposer(requests: Receiver<DisposalRequest>, events: Sender<WorkerEvent>) {
    let mut total_disposed: u64 = 0;

    while let Ok(request) = requests.recv() {
        let DisposalRequest::DisposeMeshes {
            request_id, nodes, ..
        } = request;

        total_disposed += nodes.len() as u64;
        trace!(
            count = nodes.len(),
            total = total_disposed,
            "disposing meshes"
        );

        let response = DisposalResponse::MeshesDisposed {
            request_id,
            disposed: nodes,
        };
        if events.send(WorkerEvent::Disposal(response)).is_err() {
            return;
        }
    }
}
