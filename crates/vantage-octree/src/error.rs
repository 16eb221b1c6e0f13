//! Octree parsing error types.

/// Errors that can occur when parsing the inbound octree document.
#[derive(Debug, thiserror::Error)]
pub enum OctreeError {
    /// The document is not valid JSON.
    #[error("failed to parse octree document: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The root block carries no node number.
    #[error("octree root block has no node number")]
    MissingRoot,

    /// Two blocks in the document claim the same node number.
    #[error("duplicate node number {0} in octree document")]
    DuplicateNode(u64),
}
