use super::{curve::Curve, h_refinement::HRefError, marker::MarkerId, node::Node};

#[cfg(feature = "json_export")]
use json::{array, object, JsonValue};

/// Edges describe a (possibly curved) line between two `Node`s
///
/// An Edge is shared by every `Elem` that borders it, so its identity is the unordered pair of its Nodes.
/// Edges on the domain boundary may carry a boundary marker, and any Edge may carry a [`Curve`].
///
/// ## Layout
/// The curve (if any) is oriented from `nodes[0]` to `nodes[1]`. Elems that traverse the Edge in the
/// opposite direction see the reversed curve.
///
/// Indices of child-edges after h-refinement:
/// ```text
///     nodes[0]    0     m     1    nodes[1]
///         *-----------*-----------*
/// ```
/// where `m` is the child node sitting on the (possibly curved) midpoint.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: usize,
    pub nodes: [usize; 2],
    /// Only one root Elem borders this Edge (or its ancestor)
    pub boundary: bool,
    pub marker: Option<MarkerId>,
    pub curve: Option<Curve>,
    /// Straight-line distance between the two Nodes
    pub length: f64,
    /// Introduced as the diagonal of a quadrilateral during a quad-to-triangle conversion
    pub diagonal: bool,
    children: Option<[usize; 2]>,
    parent: Option<usize>,
    child_node: Option<usize>,
}

impl Edge {
    /// Construct a new straight, unmarked edge between two Nodes
    pub fn new(id: usize, nodes: [&Node; 2]) -> Self {
        Self {
            id,
            nodes: [nodes[0].id, nodes[1].id],
            boundary: false,
            marker: None,
            curve: None,
            length: nodes[0].coords.dist(&nodes[1].coords),
            diagonal: false,
            children: None,
            parent: None,
            child_node: None,
        }
    }

    /// Produce two child Edges from this edge, connected to a new Node along its center
    ///
    /// The children inherit the boundary flag and marker. A curve is subdivided between them.
    pub(crate) fn h_refine(
        &mut self,
        new_ids: [usize; 2],
        child_node: &Node,
    ) -> Result<[Self; 2], HRefError> {
        if self.children.is_some() {
            return Err(HRefError::EdgeHasChildren(self.id));
        }

        let (first_curve, second_curve) = match &self.curve {
            Some(curve) => {
                let (first, second) = curve.split();
                (Some(first), Some(second))
            }
            None => (None, None),
        };

        self.children = Some(new_ids);
        self.child_node = Some(child_node.id);

        let child = |id: usize, nodes: [usize; 2], curve: Option<Curve>, length: f64| Self {
            id,
            nodes,
            boundary: self.boundary,
            marker: self.marker,
            curve,
            length,
            diagonal: false,
            children: None,
            parent: Some(self.id),
            child_node: None,
        };

        Ok([
            child(
                new_ids[0],
                [self.nodes[0], child_node.id],
                first_curve,
                self.length / 2.0,
            ),
            child(
                new_ids[1],
                [child_node.id, self.nodes[1]],
                second_curve,
                self.length / 2.0,
            ),
        ])
    }

    /// Id of the Parent Edge if this Edge has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// Ids of the two child Edges (ordered from `nodes[0]` to `nodes[1]`) if this Edge has been h-refined
    pub fn child_ids(&self) -> Option<[usize; 2]> {
        self.children
    }

    /// Has been h-Refined?
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Returns the Node sitting on the center of this Edge if it has been h-Refined; otherwise, `None` is returned.
    pub fn child_node_id(&self) -> Option<usize> {
        self.child_node
    }

    pub fn is_curved(&self) -> bool {
        self.curve.is_some()
    }

    /// The Node at the other end of the Edge
    pub fn other_node(&self, node_id: usize) -> Option<usize> {
        match self.nodes {
            [a, b] if a == node_id => Some(b),
            [a, b] if b == node_id => Some(a),
            _ => None,
        }
    }

    /// The Edge's curve as seen when walking from `start_node` to the other end
    pub fn curve_from(&self, start_node: usize) -> Option<Curve> {
        self.curve.as_ref().map(|curve| {
            if start_node == self.nodes[0] {
                curve.clone()
            } else {
                curve.reversed()
            }
        })
    }

    /// Produce a Json Object that describes this Edge
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "nodes": array![self.nodes[0], self.nodes[1]],
            "boundary": self.boundary,
            "marker": self.marker.map(|marker| marker.0),
            "curve": match &self.curve {
                Some(Curve::Arc { angle }) => object! { "arc": *angle },
                Some(Curve::Nurbs(nurbs)) => object! {
                    "degree": nurbs.degree,
                    "control_points": nurbs.control_points.iter().map(|p| array![p[0], p[1], p[2]]).collect::<Vec<_>>(),
                    "knots": nurbs.knots.clone(),
                },
                None => JsonValue::Null,
            },
            "parent": self.parent,
            "children": match self.children {
                Some(child_ids) => array![child_ids[0], child_ids[1]],
                None => array![],
            },
            "child_node": self.child_node,
        }
    }
}
