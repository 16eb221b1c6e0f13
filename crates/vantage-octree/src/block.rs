//! Serde model of the recursive octree block document.

use serde::Deserialize;

/// One block of the inbound octree document.
///
/// The producer emits camelCase field names; depth is not stored in the
/// document and is derived from recursion depth during the index walk.
#[derive(Clone, Debug, Deserialize)]
pub struct OctreeBlock {
    /// Identifying properties of the block.
    #[serde(default)]
    pub properties: BlockProperties,
    /// World-space bounding box of the block.
    #[serde(default)]
    pub bounds: BlockBounds,
    /// Child links; empty for leaf blocks.
    #[serde(default)]
    pub relationships: BlockRelationships,
}

/// Identifying properties of a block.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockProperties {
    /// Stable node number, unique across the octree.
    #[serde(rename = "nodeNumber")]
    pub node_number: Option<u64>,
}

/// Axis-aligned bounds of a block, as two corner points.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockBounds {
    /// Minimum corner `[x, y, z]`.
    #[serde(default)]
    pub min: [f64; 3],
    /// Maximum corner `[x, y, z]`.
    #[serde(default)]
    pub max: [f64; 3],
}

/// Child links of a block.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockRelationships {
    /// Child blocks, one octant each.
    #[serde(rename = "childBlocks", default)]
    pub child_blocks: Vec<OctreeBlock>,
}

impl OctreeBlock {
    /// Parse an octree document from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Center of the block's bounding box.
    pub fn center(&self) -> [f64; 3] {
        [
            (self.bounds.min[0] + self.bounds.max[0]) * 0.5,
            (self.bounds.min[1] + self.bounds.max[1]) * 0.5,
            (self.bounds.min[2] + self.bounds.max[2]) * 0.5,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal document should parse, including missing optional fields.
    #[test]
    fn test_parse_minimal_document() {
        let doc = r#"{
            "properties": { "nodeNumber": 1 },
            "bounds": { "min": [0, 0, 0], "max": [10, 10, 10] },
            "relationships": { "childBlocks": [
                { "properties": { "nodeNumber": 2 },
                  "bounds": { "min": [0, 0, 0], "max": [5, 5, 5] },
                  "relationships": {} }
            ] }
        }"#;
        let block = OctreeBlock::from_json(doc).expect("document should parse");
        assert_eq!(block.properties.node_number, Some(1));
        assert_eq!(block.center(), [5.0, 5.0, 5.0]);
        assert_eq!(block.relationships.child_blocks.len(), 1);
        assert!(
            block.relationships.child_blocks[0]
                .relationships
                .child_blocks
                .is_empty()
        );
    }
}
