use super::space::Point;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// A vertex of the Mesh
///
/// Pairs of Nodes describe Edges and groups of 3 or 4 Nodes describe Elems.
/// Nodes created at load time keep the index they were given in the mesh file; midpoint Nodes are appended by h-refinement.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: usize,
    pub coords: Point,
}

impl Node {
    pub fn new(id: usize, coords: Point) -> Self {
        Self { id, coords }
    }

    /// Produce a Json Object that describes this Node
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "coords": self.coords,
        }
    }
}
