//! Flat node index derived once from the octree document.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::{OctreeBlock, OctreeError};

/// Shallowest depth handled by the streaming scheduler (always-resident base LOD).
pub const MIN_STREAM_DEPTH: u8 = 2;

/// Deepest depth handled by the streaming scheduler.
pub const MAX_STREAM_DEPTH: u8 = 4;

/// Estimated node edge length fractions of the scene's max distance,
/// indexed by depth 2/3/4.
///
/// These are heuristic approximations of the true octree cell size, not
/// derived from the spatial data; confirm against real bounds before
/// relying on them for octrees with unusual aspect ratios.
const SIZE_FRACTIONS: [f32; 3] = [0.30, 0.15, 0.07];

/// Estimated edge length of a node at the given depth.
///
/// Returns 0.0 for depths outside the streamable range.
pub fn estimate_node_size(depth: u8, max_distance: f32) -> f32 {
    if (MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH).contains(&depth) {
        SIZE_FRACTIONS[(depth - MIN_STREAM_DEPTH) as usize] * max_distance
    } else {
        0.0
    }
}

/// Flat maps from node number to depth, center, and parent, derived once
/// from the inbound octree document and immutable thereafter.
#[derive(Clone, Debug, Default)]
pub struct NodeIndex {
    depths: FxHashMap<u64, u8>,
    centers: FxHashMap<u64, Vec3>,
    parents: FxHashMap<u64, u64>,
    /// Center of the root block's bounds; the centrality reference point.
    octree_center: Vec3,
    /// Half the diagonal of the root bounds; calibrates `max_distance`.
    bounding_radius: f32,
}

impl NodeIndex {
    /// Build the index by a depth-first walk of the octree document.
    ///
    /// Every block with a node number is recorded with its recursion depth
    /// and bounds center. Blocks without a node number are skipped but
    /// their children are still walked (their parent link points past them).
    pub fn build(root: &OctreeBlock) -> Result<Self, OctreeError> {
        if root.properties.node_number.is_none() {
            return Err(OctreeError::MissingRoot);
        }

        let mut index = Self::default();

        let root_center = root.center();
        let half_diag = [
            (root.bounds.max[0] - root.bounds.min[0]) * 0.5,
            (root.bounds.max[1] - root.bounds.min[1]) * 0.5,
            (root.bounds.max[2] - root.bounds.min[2]) * 0.5,
        ];
        index.octree_center = Vec3::new(
            root_center[0] as f32,
            root_center[1] as f32,
            root_center[2] as f32,
        );
        index.bounding_radius = ((half_diag[0] * half_diag[0]
            + half_diag[1] * half_diag[1]
            + half_diag[2] * half_diag[2])
            .sqrt()) as f32;

        index.walk(root, 0, None)?;
        Ok(index)
    }

    fn walk(&mut self, block: &OctreeBlock, depth: u8, parent: Option<u64>) -> Result<(), OctreeError> {
        let own_id = block.properties.node_number;
        if let Some(id) = own_id {
            if self.depths.insert(id, depth).is_some() {
                return Err(OctreeError::DuplicateNode(id));
            }
            let c = block.center();
            self.centers
                .insert(id, Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32));
            if let Some(p) = parent {
                self.parents.insert(id, p);
            }
        }

        let next_parent = own_id.or(parent);
        for child in &block.relationships.child_blocks {
            self.walk(child, depth + 1, next_parent)?;
        }
        Ok(())
    }

    /// Depth of a node, if indexed.
    pub fn depth_of(&self, node: u64) -> Option<u8> {
        self.depths.get(&node).copied()
    }

    /// Bounds center of a node, if indexed.
    pub fn center_of(&self, node: u64) -> Option<Vec3> {
        self.centers.get(&node).copied()
    }

    /// Parent node number, if the node has an indexed ancestor.
    pub fn parent_of(&self, node: u64) -> Option<u64> {
        self.parents.get(&node).copied()
    }

    /// Whether the node's depth is in the streamable 2–4 range.
    pub fn is_streamable(&self, node: u64) -> bool {
        self.depth_of(node)
            .is_some_and(|d| (MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH).contains(&d))
    }

    /// Iterate over all streamable nodes as `(node, depth, center)`.
    pub fn streamable_nodes(&self) -> impl Iterator<Item = (u64, u8, Vec3)> + '_ {
        self.depths
            .iter()
            .filter(|&(_, &d)| (MIN_STREAM_DEPTH..=MAX_STREAM_DEPTH).contains(&d))
            .map(|(&id, &d)| (id, d, self.centers[&id]))
    }

    /// All streamable node numbers at one depth.
    pub fn nodes_at_depth(&self, depth: u8) -> Vec<u64> {
        self.depths
            .iter()
            .filter(|&(_, &d)| d == depth)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Total number of indexed nodes (all depths).
    pub fn len(&self) -> usize {
        self.depths.len()
    }

    /// Whether the index holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.depths.is_empty()
    }

    /// Center of the root bounds, used as the centrality reference for
    /// load-priority scoring.
    pub fn octree_center(&self) -> Vec3 {
        self.octree_center
    }

    /// Half-diagonal of the root bounds; the natural calibration for the
    /// scheduler's `max_distance`.
    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_level_doc() -> OctreeBlock {
        let doc = r#"{
            "properties": { "nodeNumber": 1 },
            "bounds": { "min": [-100, -100, -100], "max": [100, 100, 100] },
            "relationships": { "childBlocks": [
                { "properties": { "nodeNumber": 10 },
                  "bounds": { "min": [-100, -100, -100], "max": [0, 0, 0] },
                  "relationships": { "childBlocks": [
                      { "properties": { "nodeNumber": 100 },
                        "bounds": { "min": [-100, -100, -100], "max": [-50, -50, -50] },
                        "relationships": { "childBlocks": [
                            { "properties": { "nodeNumber": 1000 },
                              "bounds": { "min": [-100, -100, -100], "max": [-75, -75, -75] },
                              "relationships": {} }
                        ] } }
                  ] } }
            ] }
        }"#;
        OctreeBlock::from_json(doc).expect("document should parse")
    }

    /// Depths should follow recursion depth, with the root at 0.
    #[test]
    fn test_depths_follow_recursion() {
        let index = NodeIndex::build(&three_level_doc()).expect("index should build");
        assert_eq!(index.depth_of(1), Some(0));
        assert_eq!(index.depth_of(10), Some(1));
        assert_eq!(index.depth_of(100), Some(2));
        assert_eq!(index.depth_of(1000), Some(3));
        assert_eq!(index.parent_of(1000), Some(100));
    }

    /// Only depth 2-4 nodes are streamable.
    #[test]
    fn test_streamable_range() {
        let index = NodeIndex::build(&three_level_doc()).expect("index should build");
        assert!(!index.is_streamable(1));
        assert!(!index.is_streamable(10));
        assert!(index.is_streamable(100));
        assert!(index.is_streamable(1000));
        assert_eq!(index.streamable_nodes().count(), 2);
    }

    /// Centrality reference and bounding radius come from the root bounds.
    #[test]
    fn test_root_geometry() {
        let index = NodeIndex::build(&three_level_doc()).expect("index should build");
        assert_eq!(index.octree_center(), Vec3::ZERO);
        let expected = (3.0_f32 * 100.0 * 100.0).sqrt();
        assert!((index.bounding_radius() - expected).abs() < 1e-3);
    }

    /// Size estimates follow the fixed depth fractions.
    #[test]
    fn test_estimate_node_size_fractions() {
        assert_eq!(estimate_node_size(2, 1000.0), 300.0);
        assert_eq!(estimate_node_size(3, 1000.0), 150.0);
        assert_eq!(estimate_node_size(4, 1000.0), 70.0);
        assert_eq!(estimate_node_size(1, 1000.0), 0.0);
        assert_eq!(estimate_node_size(5, 1000.0), 0.0);
    }

    /// Duplicate node numbers are rejected.
    #[test]
    fn test_duplicate_node_rejected() {
        let doc = r#"{
            "properties": { "nodeNumber": 7 },
            "bounds": { "min": [0,0,0], "max": [1,1,1] },
            "relationships": { "childBlocks": [
                { "properties": { "nodeNumber": 7 },
                  "bounds": { "min": [0,0,0], "max": [1,1,1] },
                  "relationships": {} }
            ] }
        }"#;
        let block = OctreeBlock::from_json(doc).expect("document should parse");
        assert!(matches!(
            NodeIndex::build(&block),
            Err(OctreeError::DuplicateNode(7))
        ));
    }
}
