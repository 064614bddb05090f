use super::{h_refinement::HRef, marker::MarkerId};
use smallvec::SmallVec;
use std::fmt;

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// The shape of an [`Elem`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Triangle,
    Quad,
}

impl ElemKind {
    pub fn num_vertices(&self) -> usize {
        match self {
            Self::Triangle => 3,
            Self::Quad => 4,
        }
    }

    pub fn from_num_vertices(n: usize) -> Option<Self> {
        match n {
            3 => Some(Self::Triangle),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

/// Where an [`Elem`] sits in the refinement forest
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElemState {
    /// Part of the partition currently covering the domain
    Active,
    /// Replaced by its children through the given h-refinement
    Refined(HRef),
    /// Discarded by an unrefinement; kept in the arena so ids stay stable
    Retired,
}

/// `Elem`s are the basic geometric unit in the `Mesh`
///
/// `Elem`s are responsible for keeping track of:
/// * Connections to their `Node`s and `Edge`s
/// * Connections to their parent `Elem` (and their own h-refinement state)
/// * Connections to their child `Elem`s (if h-refined)
///
/// ## Layout
/// Nodes are listed counter-clockwise. Edge `i` runs from Node `i` to Node `i + 1`:
///
/// ```text
///                2                                    3         2
///                *                                    *---------*
///              /   \                                  |    2    |
///           2 /     \ 1                             3 |         | 1
///            /       \                                |    0    |
///           *---------*                               *---------*
///           0    0    1                               0         1
/// ```
///
/// ## h-Refinement
///
/// The relative indices of the child `Elem`s for each type of refinement are:
///
/// ```text
///   Uniform (triangle)      Uniform (quad)       Horizontal (quad)     Vertical (quad)
///         *                *----*----*            *---------*          *----*----*
///        / \               | 3  | 2  |            |    1    |          |    |    |
///       / 2 \              *----*----*            *---------*          | 0  | 1  |
///      *-----*             | 0  | 1  |            |    0    |          |    |    |
///     / \ 3 / \            *----*----*            *---------*          *----*----*
///    / 0 \ / 1 \
///   *-----*-----*
/// ```
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub kind: ElemKind,
    pub nodes: SmallVec<[usize; 4]>,
    pub edges: SmallVec<[usize; 4]>,
    pub marker: MarkerId,
    /// Number of h-refinements separating this Elem from its root
    pub level: usize,
    pub state: ElemState,
    /// The refinement of this Elem belongs to the initial Mesh and is kept when unrefining layers
    pub initial: bool,
    parent: Option<usize>,
    children: SmallVec<[usize; 4]>,
}

impl Elem {
    /// Construct a new root Elem
    pub fn new(
        id: usize,
        nodes: SmallVec<[usize; 4]>,
        edges: SmallVec<[usize; 4]>,
        marker: MarkerId,
    ) -> Self {
        let kind = ElemKind::from_num_vertices(nodes.len())
            .expect("Elems must have 3 or 4 Nodes; cannot construct Elem!");
        assert_eq!(nodes.len(), edges.len());

        Self {
            id,
            kind,
            nodes,
            edges,
            marker,
            level: 0,
            state: ElemState::Active,
            initial: false,
            parent: None,
            children: SmallVec::new(),
        }
    }

    /// Construct an active child of this Elem (the parent is not updated)
    pub(crate) fn new_child(
        &self,
        id: usize,
        nodes: SmallVec<[usize; 4]>,
        edges: SmallVec<[usize; 4]>,
    ) -> Self {
        let mut child = Self::new(id, nodes, edges, self.marker);
        child.level = self.level + 1;
        child.parent = Some(self.id);
        child
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ElemState::Active)
    }

    pub fn is_retired(&self) -> bool {
        matches!(self.state, ElemState::Retired)
    }

    /// The h-refinement that produced this Elem's children (if any)
    pub fn refinement(&self) -> Option<HRef> {
        match self.state {
            ElemState::Refined(refinement) => Some(refinement),
            _ => None,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.kind.num_vertices()
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.parent
    }

    /// Returns a list of child Elem ids. Will return `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<SmallVec<[usize; 4]>> {
        if self.children.is_empty() {
            None
        } else {
            Some(self.children.clone())
        }
    }

    /// Has been h-Refined?
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Local index of an Edge, or `None` if this Elem isn't bounded by it
    pub fn edge_index(&self, edge_id: usize) -> Option<usize> {
        self.edges.iter().position(|id| *id == edge_id)
    }

    /// The two Node ids bounding local edge `index`, in counter-clockwise order
    pub fn edge_nodes(&self, index: usize) -> [usize; 2] {
        [
            self.nodes[index],
            self.nodes[(index + 1) % self.nodes.len()],
        ]
    }

    pub(crate) fn set_children(&mut self, refinement: HRef, children: SmallVec<[usize; 4]>) {
        self.state = ElemState::Refined(refinement);
        self.children = children;
    }

    /// Drop all children and rejoin the active partition
    pub(crate) fn reactivate(&mut self) {
        self.state = ElemState::Active;
        self.initial = false;
        self.children.clear();
    }

    pub(crate) fn retire(&mut self) {
        self.state = ElemState::Retired;
        self.initial = false;
        self.children.clear();
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "kind": match self.kind {
                ElemKind::Triangle => "triangle",
                ElemKind::Quad => "quad",
            },
            "nodes": self.nodes.to_vec(),
            "edges": self.edges.to_vec(),
            "marker": self.marker.0,
            "level": self.level,
            "state": match self.state {
                ElemState::Active => "active",
                ElemState::Refined(_) => "refined",
                ElemState::Retired => "retired",
            },
            "refinement": self.refinement().map(|refinement| refinement.mode()),
            "initial": self.initial,
            "parent": self.parent,
            "children": self.children.to_vec(),
        }
    }
}

impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Elem {} ({:?}, level {}):", self.id, self.kind, self.level)?;
        writeln!(f, "\tNodes: {:?}", self.nodes)?;
        writeln!(f, "\tEdges: {:?}", self.edges)?;
        writeln!(f, "\tState: {:?}", self.state)?;
        writeln!(f, "\tParent: {:?}", self.parent)?;
        writeln!(f, "\tChildren: {:?}", self.children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn refinement_state_transitions() {
        let mut parent = Elem::new(0, smallvec![0, 1, 2, 3], smallvec![0, 1, 2, 3], MarkerId(0));
        assert!(parent.is_active());
        assert_eq!(parent.kind, ElemKind::Quad);
        assert_eq!(parent.edge_nodes(3), [3, 0]);

        let child = parent.new_child(1, smallvec![0, 1, 4, 5], smallvec![0, 6, 7, 8]);
        assert_eq!(child.parent_id(), Some(0));
        assert_eq!(child.level, 1);

        parent.set_children(HRef::Horizontal, smallvec![1, 2]);
        assert!(!parent.is_active());
        assert_eq!(parent.refinement(), Some(HRef::Horizontal));
        assert_eq!(parent.child_ids().unwrap().as_slice(), &[1, 2]);

        parent.reactivate();
        assert!(parent.is_active());
        assert!(!parent.has_children());
    }

    #[test]
    fn triangle_layout() {
        let elem = Elem::new(4, smallvec![7, 3, 5], smallvec![1, 2, 9], MarkerId(1));
        assert_eq!(elem.kind, ElemKind::Triangle);
        assert_eq!(elem.num_vertices(), 3);
        assert_eq!(elem.edge_nodes(2), [5, 7]);
        assert_eq!(elem.edge_index(9), Some(2));
        assert_eq!(elem.edge_index(4), None);
    }
}
