use super::{
    elem::ElemKind,
    h_refinement::HRefError,
    marker::MarkerId,
    space::Point,
    Mesh,
};
use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeMap, VecDeque};
use tracing::info;

impl Mesh {
    /// Split every active quad into two triangles along its `0-2` diagonal
    ///
    /// The active partition becomes the new set of root Elems. The diagonals are flagged so that
    /// [`convert_triangles_to_quads`](Mesh::convert_triangles_to_quads) can restore the original quads.
    pub fn convert_quads_to_triangles(&mut self) -> Result<(), HRefError> {
        let mut partition: Vec<(SmallVec<[usize; 4]>, MarkerId)> = Vec::new();
        let mut diagonals: Vec<[usize; 2]> = Vec::new();

        for elem in self.active_elems() {
            let v = &elem.nodes;
            match elem.kind {
                ElemKind::Triangle => partition.push((v.clone(), elem.marker)),
                ElemKind::Quad => {
                    partition.push((smallvec![v[0], v[1], v[2]], elem.marker));
                    partition.push((smallvec![v[0], v[2], v[3]], elem.marker));
                    diagonals.push([v[0], v[2]]);
                }
            }
        }

        for [a, b] in diagonals {
            let edge_id = self.edge_or_insert(a, b);
            self.edges[edge_id].diagonal = true;
        }

        self.replace_partition(partition);
        info!(
            "converted quads to triangles; {} active Elems",
            self.elems.len()
        );
        Ok(())
    }

    /// Merge pairs of active triangles which share an Edge into quads
    ///
    /// Partners must have the same marker and must form a strictly convex quad. The pairing is a maximum
    /// matching over the admissible merges, seeded with diagonals left by
    /// [`convert_quads_to_triangles`](Mesh::convert_quads_to_triangles) and then with the longest shared Edges.
    /// The pairing is computed before the Mesh is modified; if no pairing covers every triangle,
    /// an [`HRefError::UnpairableTriangle`] is returned and the Mesh is unchanged.
    pub fn convert_triangles_to_quads(&mut self) -> Result<(), HRefError> {
        let triangles: Vec<usize> = self
            .active_elems()
            .filter(|elem| elem.kind == ElemKind::Triangle)
            .map(|elem| elem.id)
            .collect();
        let local_ids: BTreeMap<usize, usize> = triangles
            .iter()
            .enumerate()
            .map(|(local_id, tri_id)| (*tri_id, local_id))
            .collect();

        // active triangles bordering each Edge
        let mut edge_triangles: BTreeMap<usize, SmallVec<[usize; 2]>> = BTreeMap::new();
        for tri_id in triangles.iter() {
            for edge_id in self.elems[*tri_id].edges.iter() {
                edge_triangles.entry(*edge_id).or_default().push(*tri_id);
            }
        }

        let mut candidates: Vec<MergeCandidate> = Vec::new();
        for tri_id in triangles.iter() {
            let elem = &self.elems[*tri_id];
            for side in 0..3 {
                let edge = &self.edges[elem.edges[side]];
                let other = match edge_triangles[&edge.id]
                    .iter()
                    .copied()
                    .find(|other| other > tri_id)
                {
                    Some(other) => other,
                    None => continue,
                };
                if self.elems[other].marker != elem.marker {
                    continue;
                }

                let quad = self.merged_quad(*tri_id, side, other);
                if is_strictly_convex(&quad.map(|node_id| self.nodes[node_id].coords)) {
                    candidates.push(MergeCandidate {
                        tri_id: *tri_id,
                        side,
                        other,
                        diagonal: edge.diagonal,
                        length: edge.length,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.diagonal
                .cmp(&a.diagonal)
                .then(b.length.total_cmp(&a.length))
        });

        let mut matching = Matching::new(triangles.len());
        for candidate in candidates.iter() {
            matching.add_edge(local_ids[&candidate.tri_id], local_ids[&candidate.other]);
        }
        for candidate in candidates.iter() {
            matching.pair_if_free(local_ids[&candidate.tri_id], local_ids[&candidate.other]);
        }
        matching.maximize();

        if let Some(lonely) = (0..triangles.len()).find(|local_id| matching.mate[*local_id].is_none())
        {
            return Err(HRefError::UnpairableTriangle(triangles[lonely]));
        }

        // triangle => (side shared with its partner, partner)
        let merges: BTreeMap<usize, (usize, usize)> = candidates
            .iter()
            .filter(|c| matching.mate[local_ids[&c.tri_id]] == Some(local_ids[&c.other]))
            .map(|c| (c.tri_id, (c.side, c.other)))
            .collect();

        let mut partition: Vec<(SmallVec<[usize; 4]>, MarkerId)> = Vec::new();
        for elem in self.active_elems() {
            match (elem.kind, merges.get(&elem.id)) {
                (ElemKind::Quad, _) => partition.push((elem.nodes.clone(), elem.marker)),
                (ElemKind::Triangle, Some((side, other))) => {
                    let quad = self.merged_quad(elem.id, *side, *other);
                    partition.push((SmallVec::from_slice(&quad), elem.marker));
                }
                _ => (),
            }
        }

        self.replace_partition(partition);
        info!(
            "converted triangles to quads; {} active Elems",
            self.elems.len()
        );
        Ok(())
    }

    // the quad formed by a triangle and the neighbor across its edge `side`, starting at the triangle's first vertex
    fn merged_quad(&self, tri_id: usize, side: usize, other_id: usize) -> [usize; 4] {
        let t = &self.elems[tri_id].nodes;
        let [x, y, z] = [t[side], t[(side + 1) % 3], t[(side + 2) % 3]];
        let q = self.elems[other_id]
            .nodes
            .iter()
            .copied()
            .find(|node| *node != x && *node != y)
            .unwrap_or(x);

        let mut quad = [x, q, y, z];
        let start = quad.iter().position(|node| *node == t[0]).unwrap_or(0);
        quad.rotate_left(start);
        quad
    }

    fn replace_partition(&mut self, partition: Vec<(SmallVec<[usize; 4]>, MarkerId)>) {
        self.elems.clear();
        for (nodes, marker) in partition {
            self.insert_root_elem(nodes, marker);
        }
    }
}

struct MergeCandidate {
    tri_id: usize,
    side: usize,
    other: usize,
    diagonal: bool,
    length: f64,
}

/// Maximum cardinality matching on a general graph (Edmonds' blossom algorithm)
///
/// Vertices are paired through `mate`. Pairs made before [`maximize`](Matching::maximize) are only
/// broken where an augmenting path requires it.
struct Matching {
    adjacent: Vec<Vec<usize>>,
    mate: Vec<Option<usize>>,
    parent: Vec<Option<usize>>,
    base: Vec<usize>,
    used: Vec<bool>,
}

impl Matching {
    fn new(num_vertices: usize) -> Self {
        Self {
            adjacent: vec![Vec::new(); num_vertices],
            mate: vec![None; num_vertices],
            parent: vec![None; num_vertices],
            base: (0..num_vertices).collect(),
            used: vec![false; num_vertices],
        }
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        self.adjacent[a].push(b);
        self.adjacent[b].push(a);
    }

    fn pair_if_free(&mut self, a: usize, b: usize) {
        if self.mate[a].is_none() && self.mate[b].is_none() {
            self.mate[a] = Some(b);
            self.mate[b] = Some(a);
        }
    }

    // a vertex without an augmenting path never gains one later, so a single pass suffices
    fn maximize(&mut self) {
        for root in 0..self.mate.len() {
            if self.mate[root].is_none() {
                if let Some(end) = self.augmenting_path(root) {
                    self.augment(end);
                }
            }
        }
    }

    fn augmenting_path(&mut self, root: usize) -> Option<usize> {
        let n = self.mate.len();
        self.used = vec![false; n];
        self.parent = vec![None; n];
        self.base = (0..n).collect();

        self.used[root] = true;
        let mut queue = VecDeque::from([root]);
        while let Some(v) = queue.pop_front() {
            for idx in 0..self.adjacent[v].len() {
                let to = self.adjacent[v][idx];
                if self.base[v] == self.base[to] || self.mate[v] == Some(to) {
                    continue;
                }

                let closes_odd_cycle =
                    to == root || self.mate[to].map_or(false, |m| self.parent[m].is_some());
                if closes_odd_cycle {
                    let blossom_base = self.common_base(v, to);
                    let mut blossom = vec![false; n];
                    self.mark_path(v, blossom_base, to, &mut blossom);
                    self.mark_path(to, blossom_base, v, &mut blossom);

                    for i in 0..n {
                        if blossom[self.base[i]] {
                            self.base[i] = blossom_base;
                            if !self.used[i] {
                                self.used[i] = true;
                                queue.push_back(i);
                            }
                        }
                    }
                } else if self.parent[to].is_none() {
                    self.parent[to] = Some(v);
                    match self.mate[to] {
                        None => return Some(to),
                        Some(m) => {
                            self.used[m] = true;
                            queue.push_back(m);
                        }
                    }
                }
            }
        }

        None
    }

    // lowest common ancestor of two vertices' blossoms in the alternating tree
    fn common_base(&self, mut a: usize, mut b: usize) -> usize {
        let mut on_path = vec![false; self.mate.len()];
        loop {
            a = self.base[a];
            on_path[a] = true;
            match self.mate[a].and_then(|m| self.parent[m]) {
                Some(next) => a = next,
                None => break,
            }
        }
        loop {
            b = self.base[b];
            if on_path[b] {
                return b;
            }
            match self.mate[b].and_then(|m| self.parent[m]) {
                Some(next) => b = next,
                None => return b,
            }
        }
    }

    fn mark_path(
        &mut self,
        mut v: usize,
        blossom_base: usize,
        mut child: usize,
        blossom: &mut [bool],
    ) {
        while self.base[v] != blossom_base {
            let m = match self.mate[v] {
                Some(m) => m,
                None => break,
            };
            blossom[self.base[v]] = true;
            blossom[self.base[m]] = true;
            self.parent[v] = Some(child);
            child = m;
            match self.parent[m] {
                Some(next) => v = next,
                None => break,
            }
        }
    }

    fn augment(&mut self, end: usize) {
        let mut v = Some(end);
        while let Some(u) = v {
            let pu = match self.parent[u] {
                Some(pu) => pu,
                None => break,
            };
            let next = self.mate[pu];
            self.mate[u] = Some(pu);
            self.mate[pu] = Some(u);
            v = next;
        }
    }
}

fn is_strictly_convex(points: &[Point; 4]) -> bool {
    (0..4).all(|i| Point::turn(&points[i], &points[(i + 1) % 4], &points[(i + 2) % 4]) > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::h_refinement::HRef;
    use crate::mesh::tests::{lshape, square};
    use crate::mesh_file::native::parse_native_str;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    fn active_node_sets(mesh: &Mesh) -> Vec<Vec<usize>> {
        mesh.active_elems().map(|elem| elem.nodes.to_vec()).collect()
    }

    #[test]
    fn quads_to_triangles_and_back() {
        let mut mesh = square();
        let quads = active_node_sets(&mesh);

        mesh.convert_quads_to_triangles().unwrap();
        assert_eq!(mesh.num_active_elems(), 8);
        assert!(mesh
            .active_elems()
            .all(|elem| elem.kind == ElemKind::Triangle));
        assert!(mesh.edge_between(0, 4).unwrap().diagonal);
        assert_relative_eq!(mesh.total_area(), 4.0, epsilon = 1e-12);

        mesh.convert_triangles_to_quads().unwrap();
        assert_eq!(active_node_sets(&mesh), quads);
        assert_eq!(mesh.root_elems(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn conversion_flattens_refinements_and_keeps_curves() {
        let mut mesh = lshape();
        mesh.refine_element(0, HRef::Uniform).unwrap();

        mesh.convert_quads_to_triangles().unwrap();
        assert_eq!(mesh.num_active_elems(), 2 * 4 + 2 + 2);
        assert!(mesh.elems.iter().all(|elem| elem.parent_id().is_none()));
        assert_relative_eq!(mesh.total_area(), 2.0 + FRAC_PI_4, epsilon = 1e-12);
        assert_eq!(mesh.element_marker(1), Some(&"Material_2".into()));
        assert_eq!(mesh.element_marker(2), Some(&"Material_2".into()));
        assert_eq!(mesh.element_marker(11), Some(&"Material_1".into()));
    }

    #[test]
    fn triangles_merge_across_longest_edge() {
        let mut mesh = parse_native_str(
            "vertices = [[0, 0], [2, 0], [2, 1], [0, 1]]
             elements = [[0, 1, 2, 0], [0, 2, 3, 0]]
             boundaries = [[0, 1, 1], [1, 2, 1], [2, 3, 1], [3, 0, 1]]",
        )
        .unwrap();

        mesh.convert_triangles_to_quads().unwrap();
        assert_eq!(active_node_sets(&mesh), vec![vec![0, 1, 2, 3]]);
        assert_relative_eq!(mesh.total_area(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn pairing_backs_out_of_a_greedy_choice() {
        // a strip of four triangles X-Y-Z-W, with Y listed first: merging Y with its longest
        // neighbor Z would strand X and W
        let mut mesh = parse_native_str(
            "vertices = [[0, 0], [2, 0], [4, 0], [1.5, 1], [3.5, 1], [5.5, 1]]
             elements = [[1, 4, 3, 0], [0, 1, 3, 0], [1, 2, 4, 0], [2, 5, 4, 0]]
             boundaries = [[0, 1, 1], [1, 2, 1], [2, 5, 1], [5, 4, 1], [4, 3, 1], [3, 0, 1]]",
        )
        .unwrap();

        mesh.convert_triangles_to_quads().unwrap();
        assert_eq!(mesh.num_active_elems(), 2);
        assert!(mesh.active_elems().all(|elem| elem.kind == ElemKind::Quad));

        let mut node_sets: Vec<Vec<usize>> = active_node_sets(&mesh)
            .into_iter()
            .map(|mut nodes| {
                nodes.sort_unstable();
                nodes
            })
            .collect();
        node_sets.sort();
        assert_eq!(node_sets, vec![vec![0, 1, 3, 4], vec![1, 2, 4, 5]]);
        assert_relative_eq!(mesh.total_area(), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn matching_through_a_blossom() {
        // the 5-cycle 0-1-2-3-4 with 1=2 and 3=4 paired; the free vertex 5 hangs off 1, which is
        // only reachable from 0 along an even path after contracting the cycle
        let mut matching = Matching::new(6);
        for [a, b] in [[0, 1], [1, 2], [2, 3], [3, 4], [4, 0], [1, 5]] {
            matching.add_edge(a, b);
        }
        matching.pair_if_free(1, 2);
        matching.pair_if_free(3, 4);
        matching.maximize();

        assert_eq!(
            matching.mate,
            vec![Some(4), Some(5), Some(3), Some(2), Some(0), Some(1)]
        );
    }

    #[test]
    fn unpairable_triangles() {
        let mut mesh = lshape();
        let before = active_node_sets(&mesh);

        // the two triangles have different markers
        assert_eq!(
            mesh.convert_triangles_to_quads().unwrap_err(),
            HRefError::UnpairableTriangle(1)
        );
        assert_eq!(active_node_sets(&mesh), before);

        let mut lonely = parse_native_str(
            "vertices = [[0, 0], [1, 0], [0, 1]]
             elements = [[0, 1, 2, 0]]
             boundaries = [[0, 1, 1], [1, 2, 1], [2, 0, 1]]",
        )
        .unwrap();
        assert_eq!(
            lonely.convert_triangles_to_quads().unwrap_err(),
            HRefError::UnpairableTriangle(0)
        );
    }
}
