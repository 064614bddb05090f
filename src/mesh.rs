/// Conversions between triangular and quadrilateral partitions
pub mod conversion;
/// Arc and NURBS curves attached to Edges
pub mod curve;
/// A (possibly curved) line between two Nodes
pub mod edge;
/// A triangular or quadrilateral Finite Element
pub mod elem;
/// Structures and Functions to facilitate isotropic and anisotropic h-refinement
pub mod h_refinement;
/// Material and boundary condition names
pub mod marker;
/// A Point in 2D Space
pub mod node;
/// Enforcement of bounds on the number of hanging nodes
pub mod regularization;
/// Structures to describe the 2D space containing a Mesh
pub mod space;

use curve::straight_area_term;
use edge::Edge;
use elem::Elem;
use h_refinement::HRefError;
use marker::{Marker, MarkerId, MarkerTable};
use node::Node;
use space::Point;

use crate::mesh_file::ParseError;

use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};
#[cfg(feature = "json_export")]
use std::{fs::File, io::BufWriter};

/// The expected "h-Refinement" depth. This determines the stack allocation size of some `SmallVec`s related to h-Refinement
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// Information used to Define the geometric structure and refinement state of a Domain.
///
/// The Mesh is an arena: Elems, Edges and Nodes are referenced by their index and are never removed.
/// Elems that are discarded by unrefinement are retired rather than deallocated.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elems: Vec<Elem>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub element_markers: MarkerTable,
    pub boundary_markers: MarkerTable,
    edge_lookup: BTreeMap<[usize; 2], usize>,
}

impl Mesh {
    /// Construct a completely empty Mesh
    pub fn blank() -> Self {
        Self {
            elems: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            element_markers: MarkerTable::new(),
            boundary_markers: MarkerTable::new(),
            edge_lookup: BTreeMap::new(),
        }
    }

    /// Load a Mesh from a file. The format is chosen by extension (see [`load`](crate::mesh_file::load))
    ///
    /// A minimal native mesh file describing two unit squares looks like:
    /// ```text
    /// vertices = [[0, 0], [1, 0], [2, 0], [0, 1], [1, 1], [2, 1]]
    /// elements = [[0, 1, 4, 3, "air"], [1, 2, 5, 4, "teflon"]]
    /// boundaries = [[0, 1, "Bottom"], [1, 2, "Bottom"], [2, 5, "Right"], [5, 4, "Top"], [4, 3, "Top"], [3, 0, "Left"]]
    /// ```
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, ParseError> {
        crate::mesh_file::load(path.as_ref())
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);
        self.to_json().write_pretty(&mut w, 4)?;

        Ok(())
    }

    /// Produce a Json Object that describes the entire Mesh (including its refinement history)
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
            "Nodes": JsonValue::from(self.nodes.iter().map(|node| node.to_json()).collect::<Vec<_>>()),
            "Edges": JsonValue::from(self.edges.iter().map(|edge| edge.to_json()).collect::<Vec<_>>()),
            "ElementMarkers": JsonValue::from(self.element_markers.iter().map(|(_, marker)| marker.to_string()).collect::<Vec<_>>()),
            "BoundaryMarkers": JsonValue::from(self.boundary_markers.iter().map(|(_, marker)| marker.to_string()).collect::<Vec<_>>()),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    pub fn elem(&self, elem_id: usize) -> Option<&Elem> {
        self.elems.get(elem_id)
    }

    pub fn node(&self, node_id: usize) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn edge(&self, edge_id: usize) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// Find the Edge connecting two Nodes (in either order)
    pub fn edge_between(&self, node_a: usize, node_b: usize) -> Option<&Edge> {
        self.edge_lookup
            .get(&edge_key(node_a, node_b))
            .map(|edge_id| &self.edges[*edge_id])
    }

    /// Iterate over the Elems currently partitioning the domain
    pub fn active_elems(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| elem.is_active())
    }

    pub fn active_elem_ids(&self) -> Vec<usize> {
        self.active_elems().map(|elem| elem.id).collect()
    }

    pub fn num_active_elems(&self) -> usize {
        self.active_elems().count()
    }

    /// Ids of the Elems at the top of the refinement forest
    pub fn root_elems(&self) -> Vec<usize> {
        self.elems
            .iter()
            .filter(|elem| elem.parent_id().is_none() && !elem.is_retired())
            .map(|elem| elem.id)
            .collect()
    }

    /// Look up the material marker of an Elem
    pub fn element_marker(&self, elem_id: usize) -> Option<&Marker> {
        self.elem(elem_id)
            .and_then(|elem| self.element_markers.marker(elem.marker))
    }

    /// Look up the boundary marker of an Edge (`None` for unmarked Edges)
    pub fn boundary_marker(&self, edge_id: usize) -> Option<&Marker> {
        self.edge(edge_id)
            .and_then(|edge| edge.marker)
            .and_then(|marker_id| self.boundary_markers.marker(marker_id))
    }

    pub fn element_marker_id(&self, marker: &Marker) -> Option<MarkerId> {
        self.element_markers.id_of(marker)
    }

    pub fn boundary_marker_id(&self, marker: &Marker) -> Option<MarkerId> {
        self.boundary_markers.id_of(marker)
    }

    /// Get the [Point]s composing an [`Elem`] (in counter-clockwise order)
    pub fn elem_points(&self, elem_id: usize) -> Result<SmallVec<[&Point; 4]>, HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;
        Ok(elem
            .nodes
            .iter()
            .map(|node_id| &self.nodes[*node_id].coords)
            .collect())
    }

    /// Get the two [Point]s composing an [`Edge`]
    pub fn edge_points(&self, edge_id: usize) -> Result<[&Point; 2], HRefError> {
        let edge = self
            .edges
            .get(edge_id)
            .ok_or(HRefError::EdgeDoesntExist(edge_id))?;
        Ok(edge.nodes.map(|node_id| &self.nodes[node_id].coords))
    }

    /// Does any of the Elem's edges carry a curve?
    pub fn elem_is_curved(&self, elem_id: usize) -> Result<bool, HRefError> {
        self.elems
            .get(elem_id)
            .map(|elem| self.has_curved_edge(elem))
            .ok_or(HRefError::ElemDoesntExist(elem_id))
    }

    pub(crate) fn has_curved_edge(&self, elem: &Elem) -> bool {
        elem.edges
            .iter()
            .any(|edge_id| self.edges[*edge_id].is_curved())
    }

    /// Area enclosed by an Elem, taking its curved edges into account
    pub fn elem_area(&self, elem_id: usize) -> Result<f64, HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;

        Ok((0..elem.num_vertices())
            .map(|i| {
                let [a, b] = elem.edge_nodes(i);
                let [pa, pb] = [&self.nodes[a].coords, &self.nodes[b].coords];
                match self.edges[elem.edges[i]].curve_from(a) {
                    Some(curve) => curve.area_term(pa, pb),
                    None => straight_area_term(pa, pb),
                }
            })
            .sum())
    }

    /// Sum of the areas of all active Elems
    pub fn total_area(&self) -> f64 {
        self.active_elems()
            .map(|elem| self.elem_area(elem.id).unwrap_or(0.0))
            .sum()
    }

    /// Average of an Elem's vertices
    pub fn elem_centroid(&self, elem_id: usize) -> Result<Point, HRefError> {
        let points = self.elem_points(elem_id)?;
        let sum = points
            .iter()
            .fold(Point::default(), |acc, point| acc + **point);
        Ok(sum / points.len() as f64)
    }

    /// Ids of the active Elems sharing (part of) an Edge with an active Elem
    pub fn elem_neighbors(&self, elem_id: usize) -> Result<Vec<usize>, HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;

        let mut family: BTreeSet<usize> = BTreeSet::new();
        for edge_id in elem.edges.iter() {
            family.extend(self.descendant_edges(*edge_id, true)?);
            family.extend(self.ancestor_edges(*edge_id));
        }

        Ok(self
            .active_elems()
            .filter(|other| other.id != elem_id)
            .filter(|other| other.edges.iter().any(|edge_id| family.contains(edge_id)))
            .map(|other| other.id)
            .collect())
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get a list of an [`Elem`]s ancestors's IDs (nearest first)
    pub fn ancestor_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        if elem_id >= self.elems.len() {
            Err(HRefError::ElemDoesntExist(elem_id))
        } else {
            let mut ancestors = Vec::new();
            self.rec_ancestor_elems(elem_id, include_starting_elem, &mut ancestors);
            Ok(ancestors)
        }
    }

    fn rec_ancestor_elems(&self, elem_id: usize, include: bool, anc: &mut Vec<usize>) {
        if include {
            anc.push(elem_id);
        }
        if let Some(parent_elem_id) = self.elems[elem_id].parent_id() {
            self.rec_ancestor_elems(parent_elem_id, true, anc);
        }
    }

    /// Get a list of an [`Edge`]s descendant's IDs
    pub fn descendant_edges(
        &self,
        edge_id: usize,
        include_starting_edge: bool,
    ) -> Result<Vec<usize>, HRefError> {
        if edge_id >= self.edges.len() {
            Err(HRefError::EdgeDoesntExist(edge_id))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_edges(edge_id, include_starting_edge, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_edges(&self, edge_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(edge_id);
        }
        if let Some(child_edge_ids) = self.edges[edge_id].child_ids() {
            for cei in child_edge_ids {
                self.rec_descendant_edges(cei, true, desc);
            }
        }
    }

    fn ancestor_edges(&self, edge_id: usize) -> Vec<usize> {
        let mut ancestors = Vec::new();
        let mut current = self.edges[edge_id].parent_id();
        while let Some(parent_id) = current {
            ancestors.push(parent_id);
            current = self.edges[parent_id].parent_id();
        }
        ancestors
    }

    /// Nodes created along an Edge by h-refinement (at any depth)
    pub fn edge_midpoints(&self, edge_id: usize) -> Vec<usize> {
        let mut midpoints = Vec::new();
        let mut stack = vec![edge_id];
        while let Some(current) = stack.pop() {
            let edge = &self.edges[current];
            if let (Some(node_id), Some(child_ids)) = (edge.child_node_id(), edge.child_ids()) {
                midpoints.push(node_id);
                stack.extend(child_ids);
            }
        }
        midpoints
    }

    // ----------------------------------------------------------------------------------------------------
    // Construction
    // ----------------------------------------------------------------------------------------------------

    pub(crate) fn insert_node(&mut self, coords: Point) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::new(id, coords));
        id
    }

    /// Get the Edge between two Nodes, creating a straight one if it doesn't exist yet
    pub(crate) fn edge_or_insert(&mut self, node_a: usize, node_b: usize) -> usize {
        if let Some(edge_id) = self.edge_lookup.get(&edge_key(node_a, node_b)) {
            return *edge_id;
        }

        let id = self.edges.len();
        self.edges
            .push(Edge::new(id, [&self.nodes[node_a], &self.nodes[node_b]]));
        self.edge_lookup.insert(edge_key(node_a, node_b), id);
        id
    }

    /// Push a new Elem whose Edges are looked up (or created) from its Nodes
    pub(crate) fn insert_root_elem(
        &mut self,
        nodes: SmallVec<[usize; 4]>,
        marker: MarkerId,
    ) -> usize {
        let edges = self.edges_around(&nodes);
        let id = self.elems.len();
        self.elems.push(Elem::new(id, nodes, edges, marker));
        id
    }

    pub(crate) fn edges_around(&mut self, nodes: &[usize]) -> SmallVec<[usize; 4]> {
        (0..nodes.len())
            .map(|i| self.edge_or_insert(nodes[i], nodes[(i + 1) % nodes.len()]))
            .collect()
    }

    /// Split an Edge at its (possibly curved) midpoint
    ///
    /// If the Edge was already split by a neighboring Elem, its existing midpoint and children are reused.
    /// Returns the child Edge ids (ordered from `nodes[0]` to `nodes[1]`) and the midpoint Node id.
    pub(crate) fn split_edge(&mut self, edge_id: usize) -> Result<([usize; 2], usize), HRefError> {
        let edge = self
            .edges
            .get(edge_id)
            .ok_or(HRefError::EdgeDoesntExist(edge_id))?;

        if let (Some(child_ids), Some(node_id)) = (edge.child_ids(), edge.child_node_id()) {
            return Ok((child_ids, node_id));
        }

        let [a, b] = edge.nodes;
        let [pa, pb] = [self.nodes[a].coords, self.nodes[b].coords];
        let midpoint = match &edge.curve {
            Some(curve) => curve.midpoint(&pa, &pb),
            None => Point::between(&pa, &pb),
        };

        let node_id = self.insert_node(midpoint);
        let child_ids = [self.edges.len(), self.edges.len() + 1];
        let children = self.edges[edge_id].h_refine(child_ids, &self.nodes[node_id])?;

        for child in children {
            self.edge_lookup.insert(edge_key(child.nodes[0], child.nodes[1]), child.id);
            self.edges.push(child);
        }

        Ok((child_ids, node_id))
    }

    /// Replace the refinement forest with its active Elems, renumbered densely as root Elems
    ///
    /// Returns the previous id of each Elem (indexed by its new id).
    pub(crate) fn flatten(&mut self) -> Vec<usize> {
        let previous_ids = self.active_elem_ids();
        let old_elems = std::mem::take(&mut self.elems);

        self.elems = previous_ids
            .iter()
            .enumerate()
            .map(|(new_id, old_id)| {
                let old = &old_elems[*old_id];
                Elem::new(new_id, old.nodes.clone(), old.edges.clone(), old.marker)
            })
            .collect();

        previous_ids
    }
}

fn edge_key(node_a: usize, node_b: usize) -> [usize; 2] {
    if node_a < node_b {
        [node_a, node_b]
    } else {
        [node_b, node_a]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mesh_file::native::parse_native_str;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    pub(crate) fn lshape() -> Mesh {
        Mesh::from_file("./test_input/lshape.mesh").unwrap()
    }

    pub(crate) fn square() -> Mesh {
        Mesh::from_file("./test_input/square.mesh").unwrap()
    }

    pub(crate) fn unit_square() -> Mesh {
        Mesh::from_file("./test_input/unit_square.mesh").unwrap()
    }

    #[test]
    fn lshape_structure() {
        let mesh = lshape();
        assert_eq!(mesh.nodes.len(), 8);
        assert_eq!(mesh.num_active_elems(), 4);
        assert_eq!(mesh.root_elems(), vec![0, 1, 2, 3]);
        assert_eq!(mesh.element_marker(2), Some(&Marker::from("Material_2")));

        let outer = mesh.edge_between(7, 4).unwrap();
        assert!(outer.boundary && outer.is_curved());
        assert_eq!(mesh.boundary_marker(outer.id), Some(&Marker::from("Outer")));

        let interior = mesh.edge_between(3, 4).unwrap();
        assert!(!interior.boundary);
        assert_eq!(interior.marker, None);

        assert_eq!(mesh.elem_neighbors(1).unwrap(), vec![0, 2]);
    }

    #[test]
    fn lshape_area() {
        let mesh = lshape();
        assert_relative_eq!(mesh.total_area(), 2.0 + FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(mesh.elem_area(0).unwrap(), 1.0, epsilon = 1e-12);
        assert!(matches!(
            mesh.elem_area(10),
            Err(HRefError::ElemDoesntExist(10))
        ));
    }

    #[test]
    fn split_edge_reuses_midpoint() {
        let mut mesh = unit_square();
        let edge_id = mesh.edge_between(0, 1).unwrap().id;
        let num_nodes = mesh.nodes.len();

        let (children, mid) = mesh.split_edge(edge_id).unwrap();
        assert_eq!(mid, num_nodes);
        assert_eq!(mesh.nodes[mid].coords, Point::new(0.5, 0.0));
        assert_eq!(mesh.edge_between(0, mid).unwrap().id, children[0]);
        assert_eq!(mesh.edge_between(mid, 1).unwrap().id, children[1]);
        assert!(mesh.edges[children[0]].boundary);

        assert_eq!(mesh.split_edge(edge_id).unwrap(), (children, mid));
        assert_eq!(mesh.nodes.len(), num_nodes + 1);
        assert_eq!(mesh.edge_midpoints(edge_id), vec![mid]);
    }

    #[test]
    fn curved_midpoint_lies_on_arc() {
        let mut mesh = lshape();
        let edge_id = mesh.edge_between(4, 7).unwrap().id;
        let (_, mid) = mesh.split_edge(edge_id).unwrap();
        let coords = mesh.nodes[mid].coords;
        assert_relative_eq!(coords.x.hypot(coords.y), 1.0, epsilon = 1e-12);
        assert_relative_eq!(coords.y.atan2(coords.x), FRAC_PI_4 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn centroid_and_copy() {
        let mesh = parse_native_str(
            "vertices = [[0, 0], [2, 0], [2, 2], [0, 2]]
             elements = [[0, 1, 2, 3, 0]]
             boundaries = [[0, 1, 1], [1, 2, 1], [2, 3, 1], [3, 0, 1]]",
        )
        .unwrap();

        let copy = mesh.clone();
        assert_eq!(copy.elem_centroid(0).unwrap(), Point::new(1.0, 1.0));
        assert_eq!(copy.elem_points(0).unwrap().len(), 4);
    }

    #[test]
    fn point_queries_reject_unknown_ids() {
        let mesh = lshape();
        let num_elems = mesh.elems.len();
        let num_edges = mesh.edges.len();

        assert_eq!(
            mesh.elem_points(num_elems).unwrap_err(),
            HRefError::ElemDoesntExist(num_elems)
        );
        assert_eq!(
            mesh.edge_points(num_edges).unwrap_err(),
            HRefError::EdgeDoesntExist(num_edges)
        );
        assert_eq!(
            mesh.elem_is_curved(num_elems).unwrap_err(),
            HRefError::ElemDoesntExist(num_elems)
        );
        assert_eq!(mesh.edge_points(0).unwrap().len(), 2);
        assert_eq!(
            (0..num_elems)
                .filter(|elem_id| mesh.elem_is_curved(*elem_id).unwrap())
                .count(),
            2
        );
    }

    #[cfg(feature = "json_export")]
    #[test]
    fn json_export() {
        let mesh = lshape();
        let json = mesh.to_json();
        assert_eq!(json["Elems"].len(), 4);
        assert_eq!(json["Nodes"].len(), 8);
        assert_eq!(json["BoundaryMarkers"][0], "Bottom");
        assert_eq!(json["Edges"][0]["nodes"].len(), 2);
    }
}
