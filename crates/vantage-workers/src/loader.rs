//! Depth loader worker: fetches mesh payloads from a pluggable source.

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::messages::{LoaderRequest, LoaderResponse, MeshPayload, WorkerEvent};

/// Outcome of one source fetch.
#[derive(Debug)]
pub enum MeshFetch {
    /// Usable mesh data.
    Loaded(MeshPayload),
    /// The source had nothing for this node. Not an error.
    Skipped(String),
    /// The node does not exist in the source.
    NotFound,
    /// The fetch failed.
    Failed(String),
}

/// Where loader workers get their geometry.
///
/// Implementations wrap whatever actually stores the scene — a tile
/// server, a local cache, a decoder pipeline. Fetches run on loader
/// threads, so implementations must be thread-safe and may block.
pub trait MeshSource: Send + Sync {
    /// Fetch the payload for one node at the given depth.
    fn fetch(&self, node: u64, depth: u8) -> MeshFetch;
}

/// Loader worker thread body for one depth. Answers requests until the
/// request channel closes.
pub(crate) fn run_loader(
    depth: u8,
    source: std::sync::Arc<dyn MeshSource>,
    requests: Receiver<LoaderRequest>,
    events: Sender<WorkerEvent>,
) {
    while let Ok(request) = requests.recv() {
        let response = match request {
            LoaderRequest::LoadMesh {
                request_id, node, ..
            } => match source.fetch(node, depth) {
                MeshFetch::Loaded(payload) => LoaderResponse::MeshLoaded {
                    request_id,
                    node,
                    payload,
                },
                MeshFetch::Skipped(reason) => LoaderResponse::MeshSkipped {
                    request_id,
                    node,
                    reason,
                },
                MeshFetch::NotFound => LoaderResponse::MeshNotFound { request_id, node },
                MeshFetch::Failed(message) => LoaderResponse::LoadFailed {
                    request_id,
                    node,
                    message,
                },
            },
            LoaderRequest::PreloadBatch { request_id, nodes } => {
                let mut meshes = Vec::with_capacity(nodes.len());
                for node in nodes {
                    match source.fetch(node, depth) {
                        MeshFetch::Loaded(payload) => meshes.push((node, payload)),
                        MeshFetch::Skipped(reason) => {
                            debug!(node, depth, reason, "preload skipped node");
                        }
                        MeshFetch::NotFound => {
                            debug!(node, depth, "preload node not found");
                        }
                        MeshFetch::Failed(message) => {
                            debug!(node, depth, message, "preload fetch failed");
                        }
                    }
                }
                LoaderResponse::BatchLoaded { request_id, meshes }
            }
        };
        if events.send(WorkerEvent::Loader(depth, response)).is_err() {
            return;
        }
    }
}
