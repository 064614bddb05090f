use super::{
    elem::{Elem, ElemKind},
    h_refinement::{HRef, HRefError},
    Mesh,
};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Upper bound on the number of census/refine rounds performed by [`Mesh::regularize`]
pub const MAX_REGULARIZATION_ROUNDS: usize = 64;

impl Mesh {
    /// Count the hanging nodes on each Edge of an active Elem
    ///
    /// A hanging node is a midpoint created along the Edge (at any depth) which is a vertex of some active Elem.
    pub fn hanging_nodes(&self, elem_id: usize) -> Result<SmallVec<[usize; 4]>, HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;
        Ok(self.count_hanging_nodes(elem, &self.used_nodes()))
    }

    /// The largest number of hanging nodes found on any Edge of any active Elem
    pub fn max_hanging_nodes(&self) -> usize {
        let used = self.used_nodes();
        self.elems
            .par_iter()
            .filter(|elem| elem.is_active())
            .map(|elem| {
                self.count_hanging_nodes(elem, &used)
                    .into_iter()
                    .max()
                    .unwrap_or(0)
            })
            .max()
            .unwrap_or(0)
    }

    fn used_nodes(&self) -> Vec<bool> {
        let mut used = vec![false; self.nodes.len()];
        for elem in self.active_elems() {
            for node_id in elem.nodes.iter() {
                used[*node_id] = true;
            }
        }
        used
    }

    fn count_hanging_nodes(&self, elem: &Elem, used: &[bool]) -> SmallVec<[usize; 4]> {
        elem.edges
            .iter()
            .map(|edge_id| {
                self.edge_midpoints(*edge_id)
                    .into_iter()
                    .filter(|node_id| used[*node_id])
                    .count()
            })
            .collect()
    }

    /// Refine the Mesh until no active Elem has more than `n` hanging nodes on any of its Edges
    ///
    /// Offending Elems are refined uniformly. With `n == 0` the resulting conforming Mesh is flattened:
    /// every active Elem becomes a root Elem with a new id. Full regularization is not supported for
    /// curved Meshes and fails before anything is modified.
    ///
    /// Returns a map from each resulting active Elem id to the id of the Elem it descends from which was active before the pass.
    pub fn regularize(&mut self, n: usize) -> Result<BTreeMap<usize, usize>, HRefError> {
        self.regularize_within(n, MAX_REGULARIZATION_ROUNDS)
            .map(|(ancestry, _)| ancestry)
    }

    /// [`regularize`](Mesh::regularize) with an explicit round limit; also returns the number of refinement rounds
    pub(crate) fn regularize_within(
        &mut self,
        n: usize,
        max_rounds: usize,
    ) -> Result<(BTreeMap<usize, usize>, usize), HRefError> {
        let initially_active: BTreeSet<usize> = self.active_elem_ids().into_iter().collect();

        if n == 0 {
            if let Some(curved) = initially_active
                .iter()
                .find(|elem_id| self.has_curved_edge(&self.elems[**elem_id]))
            {
                return Err(HRefError::CurvedRegularizationUnsupported(*curved));
            }
        }

        let mut num_refinements = 0;
        let mut num_rounds = 0;
        let mut converged = false;
        for round in 0..=max_rounds {
            let used = self.used_nodes();
            let offenders: Vec<(usize, HRef)> = self
                .elems
                .par_iter()
                .filter(|elem| elem.is_active())
                .filter_map(|elem| {
                    let counts = self.count_hanging_nodes(elem, &used);
                    if counts.iter().all(|count| *count <= n) {
                        None
                    } else if n == 0 {
                        Some((elem.id, conforming_refinement(elem, &counts)))
                    } else {
                        Some((elem.id, HRef::Uniform))
                    }
                })
                .collect();

            if offenders.is_empty() {
                converged = true;
                break;
            }
            if round == max_rounds {
                break;
            }

            debug!(
                "regularization round {}: refining {} Elems",
                round,
                offenders.len()
            );
            num_refinements += offenders.len();
            num_rounds += 1;
            for (elem_id, refinement) in offenders {
                self.refine_element(elem_id, refinement)?;
            }
        }

        if !converged {
            return Err(HRefError::RegularizationDiverged { rounds: max_rounds });
        }

        let mut ancestry = BTreeMap::new();
        for elem_id in self.active_elem_ids() {
            let origin = self
                .ancestor_elems(elem_id, true)?
                .into_iter()
                .find(|ancestor| initially_active.contains(ancestor))
                .unwrap_or(elem_id);
            ancestry.insert(elem_id, origin);
        }

        if n == 0 {
            let previous_ids = self.flatten();
            ancestry = previous_ids
                .iter()
                .enumerate()
                .map(|(new_id, old_id)| (new_id, ancestry[old_id]))
                .collect();
        }

        info!(
            "regularized Mesh (n = {}) with {} refinements in {} rounds; {} active Elems",
            n,
            num_refinements,
            num_rounds,
            ancestry.len()
        );

        Ok((ancestry, num_rounds))
    }
}

// Anisotropic children leave whole-length edges behind, so a straight quad that only has hanging nodes
// on one pair of opposite edges is split across those edges. Everything else is split uniformly.
fn conforming_refinement(elem: &Elem, counts: &[usize]) -> HRef {
    if elem.kind == ElemKind::Triangle {
        return HRef::Uniform;
    }

    let hanging_sides: SmallVec<[usize; 4]> = (0..4).filter(|i| counts[*i] > 0).collect();
    if hanging_sides.iter().all(|side| side % 2 == 0) {
        HRef::Vertical
    } else if hanging_sides.iter().all(|side| side % 2 == 1) {
        HRef::Horizontal
    } else {
        HRef::Uniform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::{lshape, square};
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn regularize_zero_makes_conforming_roots() {
        let mut mesh = square();
        mesh.refine_element(0, HRef::Uniform).unwrap();
        assert_eq!(mesh.max_hanging_nodes(), 1);

        let ancestry = mesh.regularize(0).unwrap();

        // element 0's neighbors are split in half towards it, the far corner is untouched
        assert_eq!(mesh.num_active_elems(), 4 + 2 + 2 + 1);
        assert_eq!(mesh.elems.len(), 9);
        assert_eq!(mesh.max_hanging_nodes(), 0);
        assert!(mesh
            .elems
            .iter()
            .all(|elem| elem.is_active() && elem.parent_id().is_none() && elem.level == 0));
        assert_eq!(mesh.root_elems().len(), 9);
        assert_relative_eq!(mesh.total_area(), 4.0, epsilon = 1e-12);

        // element 0 was already refined before the pass, so its children are their own origin
        assert_eq!(ancestry.len(), 9);
        let from_each: Vec<usize> = (0..8)
            .map(|old| ancestry.values().filter(|origin| **origin == old).count())
            .collect();
        assert_eq!(from_each, vec![0, 2, 2, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn regularize_zero_rejects_curved_meshes() {
        let mut mesh = lshape();
        mesh.refine_element(0, HRef::Uniform).unwrap();
        let num_elems = mesh.elems.len();

        assert!(matches!(
            mesh.regularize(0),
            Err(HRefError::CurvedRegularizationUnsupported(_))
        ));
        assert_eq!(mesh.elems.len(), num_elems);
    }

    #[test]
    fn regularize_bounds_hanging_nodes() {
        for n in [1, 2] {
            let mut mesh = lshape();

            // repeatedly refine the child touching the triangles' shared corner
            let mut target = 0;
            for _ in 0..4 {
                let children = mesh.refine_element(target, HRef::Uniform).unwrap();
                target = children[3];
            }
            assert!(mesh.max_hanging_nodes() > n);

            let ancestry = mesh.regularize(n).unwrap();
            assert!(mesh.max_hanging_nodes() <= n);
            assert_eq!(ancestry.len(), mesh.num_active_elems());
            assert!(ancestry.values().all(|origin| mesh.elems[*origin].level <= 4));
            assert_relative_eq!(mesh.total_area(), 2.0 + FRAC_PI_4, epsilon = 1e-12);
        }
    }

    #[test]
    fn regularization_rounds_are_bounded() {
        let deep_chain = || {
            let mut mesh = lshape();
            let mut target = 0;
            for _ in 0..4 {
                let children = mesh.refine_element(target, HRef::Uniform).unwrap();
                target = children[3];
            }
            mesh
        };

        // refining an Elem with 3+ hanging nodes on an Edge leaves a child with 2+ on half of it
        let mut mesh = deep_chain();
        assert!(mesh.max_hanging_nodes() >= 3);
        let (_, rounds) = mesh.regularize_within(1, MAX_REGULARIZATION_ROUNDS).unwrap();
        assert!(rounds >= 2);
        assert!(rounds < MAX_REGULARIZATION_ROUNDS);
        assert!(mesh.max_hanging_nodes() <= 1);

        let mut limited = deep_chain();
        assert_eq!(
            limited.regularize_within(1, 1).unwrap_err(),
            HRefError::RegularizationDiverged { rounds: 1 }
        );
        assert!(limited.max_hanging_nodes() > 1);

        // a conforming Mesh needs no rounds at all
        let mut conforming = lshape();
        assert_eq!(conforming.regularize_within(1, 0).unwrap().1, 0);
    }

    #[test]
    fn regularize_without_hanging_nodes_is_identity() {
        let mut mesh = lshape();
        mesh.refine_all_elements(HRef::Uniform, false).unwrap();
        let active = mesh.active_elem_ids();

        let ancestry = mesh.regularize(1).unwrap();
        assert_eq!(mesh.active_elem_ids(), active);
        assert!(ancestry.iter().all(|(new, old)| new == old));
    }

    #[test]
    fn regularize_zero_after_anisotropic_refinement() {
        let mut mesh = square();
        mesh.refine_element(3, HRef::Horizontal).unwrap();
        mesh.refine_element(0, HRef::Vertical).unwrap();

        mesh.regularize(0).unwrap();
        assert_eq!(mesh.max_hanging_nodes(), 0);
        assert_relative_eq!(mesh.total_area(), 4.0, epsilon = 1e-12);
    }
}
