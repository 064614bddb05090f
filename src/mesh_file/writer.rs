use crate::mesh::{curve::Curve, marker::Marker, Mesh};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use tracing::info;

impl Mesh {
    /// Serialize the Mesh in the native format
    ///
    /// The root Elems are written along with the vertices they use, the marked and curved Edges bordering them,
    /// and the refinement history as a `refinements` list. Loading the result reproduces the same active Elems.
    pub fn to_native_string(&self) -> String {
        let roots = self.root_elems();

        let used_nodes: BTreeSet<usize> = roots
            .iter()
            .flat_map(|elem_id| self.elems[*elem_id].nodes.iter().copied())
            .collect();
        let vertex_ids: BTreeMap<usize, usize> = used_nodes
            .into_iter()
            .enumerate()
            .map(|(new_id, node_id)| (node_id, new_id))
            .collect();

        let vertices: Vec<String> = vertex_ids
            .keys()
            .map(|node_id| {
                let coords = self.nodes[*node_id].coords;
                format!("[{}, {}]", coords.x, coords.y)
            })
            .collect();

        let elements: Vec<String> = roots
            .iter()
            .map(|elem_id| {
                let elem = &self.elems[*elem_id];
                let mut entry: Vec<String> = elem
                    .nodes
                    .iter()
                    .map(|node_id| vertex_ids[node_id].to_string())
                    .collect();
                entry.push(
                    self.element_markers
                        .marker(elem.marker)
                        .map_or_else(|| String::from("0"), marker_literal),
                );
                format!("[{}]", entry.join(", "))
            })
            .collect();

        let mut seen = BTreeSet::new();
        let root_edges: Vec<usize> = roots
            .iter()
            .flat_map(|elem_id| self.elems[*elem_id].edges.iter().copied())
            .filter(|edge_id| seen.insert(*edge_id))
            .collect();

        let mut boundaries = Vec::new();
        let mut curves = Vec::new();
        for edge in root_edges.iter().map(|edge_id| &self.edges[*edge_id]) {
            let [a, b] = [vertex_ids[&edge.nodes[0]], vertex_ids[&edge.nodes[1]]];

            if let Some(marker) = edge.marker.and_then(|id| self.boundary_markers.marker(id)) {
                boundaries.push(format!("[{}, {}, {}]", a, b, marker_literal(marker)));
            }

            match &edge.curve {
                Some(Curve::Arc { angle }) => curves.push(format!("[{}, {}, {}]", a, b, angle)),
                Some(Curve::Nurbs(nurbs)) => {
                    let points: Vec<String> = nurbs
                        .inner_points()
                        .iter()
                        .map(|[x, y, w]| format!("[{}, {}, {}]", x, y, w))
                        .collect();
                    let knots: Vec<String> =
                        nurbs.inner_knots().iter().map(|k| k.to_string()).collect();
                    let end_weights = match nurbs.end_weights() {
                        [w1, w2] if w1 != 1.0 || w2 != 1.0 => format!(", [{}, {}]", w1, w2),
                        _ => String::new(),
                    };
                    curves.push(format!(
                        "[{}, {}, {}, [{}], [{}]{}]",
                        a,
                        b,
                        nurbs.degree,
                        points.join(", "),
                        knots.join(", "),
                        end_weights
                    ));
                }
                None => (),
            }
        }

        let mut out = String::new();
        write_section(&mut out, "vertices", &vertices);
        write_section(&mut out, "elements", &elements);
        write_section(&mut out, "boundaries", &boundaries);
        if !curves.is_empty() {
            write_section(&mut out, "curves", &curves);
        }

        let refinements = self.refinement_history(&roots);
        if !refinements.is_empty() {
            write_section(&mut out, "refinements", &refinements);
        }

        out
    }

    /// Write the Mesh to a native format file (see [`to_native_string`](Mesh::to_native_string))
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path.as_ref(), self.to_native_string())?;
        info!(
            "saved Mesh to {} with {} active Elems",
            path.as_ref().display(),
            self.num_active_elems()
        );
        Ok(())
    }

    // Refinements in breadth first order, identified by the ids the Elems will have when the list is replayed
    // on a Mesh that only contains the roots
    fn refinement_history(&self, roots: &[usize]) -> Vec<String> {
        let mut queue: VecDeque<(usize, usize)> = roots
            .iter()
            .enumerate()
            .map(|(new_id, elem_id)| (*elem_id, new_id))
            .collect();
        let mut next_id = roots.len();
        let mut history = Vec::new();

        while let Some((elem_id, new_id)) = queue.pop_front() {
            let elem = &self.elems[elem_id];
            if let (Some(refinement), Some(children)) = (elem.refinement(), elem.child_ids()) {
                history.push(format!("[{}, {}]", new_id, refinement.mode()));
                for child_id in children {
                    queue.push_back((child_id, next_id));
                    next_id += 1;
                }
            }
        }

        history
    }
}

fn marker_literal(marker: &Marker) -> String {
    match marker {
        Marker::Integer(value) => value.to_string(),
        Marker::Name(name) if name.contains('"') => format!("'{}'", name),
        Marker::Name(name) => format!("\"{}\"", name),
    }
}

fn write_section(out: &mut String, name: &str, entries: &[String]) {
    if entries.is_empty() {
        out.push_str(&format!("{} = []\n", name));
        return;
    }

    out.push_str(&format!("{} = [\n", name));
    for entry in entries {
        out.push_str(&format!("    {},\n", entry));
    }
    out.push_str("]\n");
}
