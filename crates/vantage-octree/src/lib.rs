//! Octree document parsing and the flat node index used by the streaming scheduler.

mod block;
mod error;
mod index;

pub use block::OctreeBlock;
pub use error::OctreeError;
pub use index::{MAX_STREAM_DEPTH, MIN_STREAM_DEPTH, NodeIndex, estimate_node_size};
