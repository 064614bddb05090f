use super::{
    elem::{Elem, ElemKind},
    marker::Marker,
    space::Point,
    Mesh,
};
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Description of an h-Refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HRef {
    /// isotropic: 4 children
    Uniform,
    /// anisotropic (quads only): split Edges 1 and 3, producing a bottom and a top child
    Horizontal,
    /// anisotropic (quads only): split Edges 0 and 2, producing a left and a right child
    Vertical,
}

impl HRef {
    /// Interpret the integer refinement modes used in mesh files (0: uniform, 1: horizontal, 2: vertical)
    pub fn from_mode(mode: i64) -> Option<Self> {
        match mode {
            0 => Some(Self::Uniform),
            1 => Some(Self::Horizontal),
            2 => Some(Self::Vertical),
            _ => None,
        }
    }

    pub fn mode(&self) -> i64 {
        match self {
            Self::Uniform => 0,
            Self::Horizontal => 1,
            Self::Vertical => 2,
        }
    }

    pub fn is_anisotropic(&self) -> bool {
        !matches!(self, Self::Uniform)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HRefError {
    #[error("Elem {0} doesn't exist")]
    ElemDoesntExist(usize),
    #[error("Edge {0} doesn't exist")]
    EdgeDoesntExist(usize),
    #[error("Node {0} doesn't exist")]
    NodeDoesntExist(usize),
    #[error("refinement mode {mode} is not valid for Elem {elem_id}")]
    InvalidRefinementMode { elem_id: usize, mode: i64 },
    #[error("Elem {0} is not active; it cannot be h-refined")]
    AlreadyRefined(usize),
    #[error("Edge {0} has already been h-refined")]
    EdgeHasChildren(usize),
    #[error("Elem {0} has no children; it cannot be unrefined")]
    NotAParent(usize),
    #[error("triangle {0} has no valid partner to merge with")]
    UnpairableTriangle(usize),
    #[error("Elem {0} is curved; curved meshes cannot be fully regularized")]
    CurvedRegularizationUnsupported(usize),
    #[error("regularization did not converge within {rounds} rounds")]
    RegularizationDiverged { rounds: usize },
    #[error("boundary marker \"{0}\" is not used in this Mesh")]
    UnknownMarker(Marker),
}

impl Mesh {
    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Check that an [HRef] can be applied to an Elem without modifying the Mesh
    ///
    /// * Only active Elems can be refined
    /// * Triangles only support uniform refinement
    /// * Quads with a curved Edge only support uniform refinement
    pub fn check_h_refinement(&self, elem_id: usize, refinement: HRef) -> Result<(), HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;

        if !elem.is_active() {
            return Err(HRefError::AlreadyRefined(elem_id));
        }

        if refinement.is_anisotropic()
            && (elem.kind == ElemKind::Triangle || self.has_curved_edge(elem))
        {
            return Err(HRefError::InvalidRefinementMode {
                elem_id,
                mode: refinement.mode(),
            });
        }

        Ok(())
    }

    /// h-refine a single active Elem, returning the ids of its new children
    pub fn refine_element(
        &mut self,
        elem_id: usize,
        refinement: HRef,
    ) -> Result<SmallVec<[usize; 4]>, HRefError> {
        self.check_h_refinement(elem_id, refinement)?;

        let kind = self.elems[elem_id].kind;
        let v = self.elems[elem_id].nodes.clone();

        let child_node_sets: SmallVec<[SmallVec<[usize; 4]>; 4]> = match (kind, refinement) {
            (ElemKind::Triangle, _) => {
                let [m0, m1, m2] = [
                    self.split_elem_edge(elem_id, 0)?,
                    self.split_elem_edge(elem_id, 1)?,
                    self.split_elem_edge(elem_id, 2)?,
                ];
                smallvec![
                    smallvec![v[0], m0, m2],
                    smallvec![m0, v[1], m1],
                    smallvec![m2, m1, v[2]],
                    smallvec![m0, m1, m2],
                ]
            }
            (ElemKind::Quad, HRef::Uniform) => {
                let m: SmallVec<[usize; 4]> = (0..4)
                    .map(|i| self.split_elem_edge(elem_id, i))
                    .collect::<Result<_, _>>()?;
                let center = self.insert_node(self.quad_center(&v, &m));
                smallvec![
                    smallvec![v[0], m[0], center, m[3]],
                    smallvec![m[0], v[1], m[1], center],
                    smallvec![center, m[1], v[2], m[2]],
                    smallvec![m[3], center, m[2], v[3]],
                ]
            }
            (ElemKind::Quad, HRef::Horizontal) => {
                let m1 = self.split_elem_edge(elem_id, 1)?;
                let m3 = self.split_elem_edge(elem_id, 3)?;
                smallvec![
                    smallvec![v[0], v[1], m1, m3],
                    smallvec![m3, m1, v[2], v[3]],
                ]
            }
            (ElemKind::Quad, HRef::Vertical) => {
                let m0 = self.split_elem_edge(elem_id, 0)?;
                let m2 = self.split_elem_edge(elem_id, 2)?;
                smallvec![
                    smallvec![v[0], m0, m2, v[3]],
                    smallvec![m0, v[1], v[2], m2],
                ]
            }
        };

        let child_ids: SmallVec<[usize; 4]> = child_node_sets
            .into_iter()
            .map(|nodes| {
                let edges = self.edges_around(&nodes);
                let child_id = self.elems.len();
                let child = self.elems[elem_id].new_child(child_id, nodes, edges);
                self.elems.push(child);
                child_id
            })
            .collect();

        self.elems[elem_id].set_children(refinement, child_ids.clone());
        Ok(child_ids)
    }

    fn split_elem_edge(&mut self, elem_id: usize, edge_index: usize) -> Result<usize, HRefError> {
        let edge_id = self.elems[elem_id].edges[edge_index];
        let (_, midpoint) = self.split_edge(edge_id)?;
        Ok(midpoint)
    }

    // Coons-patch center: matches the bilinear center for straight quads and follows curved edges otherwise
    fn quad_center(&self, vertices: &[usize], midpoints: &[usize]) -> Point {
        let sum = |ids: &[usize]| {
            ids.iter()
                .fold(Point::default(), |acc, id| acc + self.nodes[*id].coords)
        };
        sum(midpoints) / 2.0 - sum(vertices) / 4.0
    }

    /// Apply an [HRef] to every active Elem (triangles are always refined uniformly)
    ///
    /// The active set is captured before refining, so new children are not refined in the same pass.
    /// With `mark_initial`, the refinements are treated as part of the initial Mesh: [`unrefine_one_layer`](Mesh::unrefine_one_layer)
    /// and [`unrefine_all_elements`](Mesh::unrefine_all_elements) never undo them.
    pub fn refine_all_elements(
        &mut self,
        refinement: HRef,
        mark_initial: bool,
    ) -> Result<(), HRefError> {
        let active = self.active_elem_ids();
        let plan: Vec<(usize, HRef)> = active
            .iter()
            .map(|elem_id| match self.elems[*elem_id].kind {
                ElemKind::Triangle => (*elem_id, HRef::Uniform),
                ElemKind::Quad => (*elem_id, refinement),
            })
            .collect();

        for (elem_id, elem_refinement) in plan.iter() {
            self.check_h_refinement(*elem_id, *elem_refinement)?;
        }

        debug!(
            "refining all {} active Elems ({:?})",
            plan.len(),
            refinement
        );
        for (elem_id, elem_refinement) in plan {
            self.refine_element(elem_id, elem_refinement)?;
            self.elems[elem_id].initial = mark_initial;
        }
        Ok(())
    }

    /// Uniformly refine every active Elem touching a Node, `depth` times
    pub fn refine_towards_vertex(&mut self, node_id: usize, depth: usize) -> Result<(), HRefError> {
        if node_id >= self.nodes.len() {
            return Err(HRefError::NodeDoesntExist(node_id));
        }

        for round in 0..depth {
            let targets: Vec<usize> = self
                .active_elems()
                .filter(|elem| elem.nodes.contains(&node_id))
                .map(|elem| elem.id)
                .collect();

            debug!(
                "refining {} Elems towards Node {} (round {})",
                targets.len(),
                node_id,
                round
            );
            for elem_id in targets {
                self.refine_element(elem_id, HRef::Uniform)?;
            }
        }
        Ok(())
    }

    /// Refine every active Elem with an Edge or a vertex on a boundary with the given marker, `depth` times
    ///
    /// When `aniso` is set, straight quads whose marked Edges are all parallel are split towards them
    /// (bottom/top: [HRef::Horizontal], left/right: [HRef::Vertical]). Everything else is refined uniformly.
    pub fn refine_towards_boundary(
        &mut self,
        marker: impl Into<Marker>,
        depth: usize,
        aniso: bool,
    ) -> Result<(), HRefError> {
        let marker = marker.into();
        let marker_id = self
            .boundary_marker_id(&marker)
            .ok_or(HRefError::UnknownMarker(marker.clone()))?;

        for round in 0..depth {
            let marked_edges: BTreeSet<usize> = self
                .edges
                .iter()
                .filter(|edge| edge.marker == Some(marker_id))
                .map(|edge| edge.id)
                .collect();
            let marked_nodes: BTreeSet<usize> = marked_edges
                .iter()
                .flat_map(|edge_id| self.edges[*edge_id].nodes)
                .collect();

            let plan: Vec<(usize, HRef)> = self
                .active_elems()
                .filter_map(|elem| {
                    let marked_sides: SmallVec<[usize; 4]> = (0..elem.num_vertices())
                        .filter(|i| marked_edges.contains(&elem.edges[*i]))
                        .collect();

                    if !marked_sides.is_empty() {
                        let refinement = if aniso && !self.has_curved_edge(elem) {
                            anisotropic_towards(elem, &marked_sides)
                        } else {
                            HRef::Uniform
                        };
                        Some((elem.id, refinement))
                    } else if elem.nodes.iter().any(|node| marked_nodes.contains(node)) {
                        Some((elem.id, HRef::Uniform))
                    } else {
                        None
                    }
                })
                .collect();

            debug!(
                "refining {} Elems towards boundary \"{}\" (round {})",
                plan.len(),
                marker,
                round
            );
            for (elem_id, refinement) in plan {
                self.refine_element(elem_id, refinement)?;
            }
        }
        Ok(())
    }

    /// h-refine Elems according to an external criterion
    ///
    /// For `depth` rounds, the criterion is evaluated (in parallel) for every active Elem. Elems for which
    /// it returns `Some(HRef)` are then refined in id order. Returns the total number of refinements.
    pub fn refine_by_criterion<F>(&mut self, criterion: F, depth: usize) -> Result<usize, HRefError>
    where
        F: Fn(&Mesh, &Elem) -> Option<HRef> + Sync,
    {
        let mut num_refinements = 0;

        for round in 0..depth {
            let mesh: &Mesh = self;
            let plan: Vec<(usize, HRef)> = mesh
                .elems
                .par_iter()
                .filter(|elem| elem.is_active())
                .filter_map(|elem| criterion(mesh, elem).map(|refinement| (elem.id, refinement)))
                .collect();

            if plan.is_empty() {
                break;
            }

            debug!("criterion selected {} Elems (round {})", plan.len(), round);
            for (elem_id, refinement) in plan {
                self.refine_element(elem_id, refinement)?;
                num_refinements += 1;
            }
        }

        Ok(num_refinements)
    }

    // ----------------------------------------------------------------------------------------------------
    // h-unrefinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Retire all of an Elem's descendants and make it active again
    pub fn unrefine_element(&mut self, elem_id: usize) -> Result<(), HRefError> {
        let elem = self
            .elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?;

        if !elem.has_children() {
            return Err(HRefError::NotAParent(elem_id));
        }

        for descendant_id in self.descendant_elems(elem_id, false)? {
            self.elems[descendant_id].retire();
        }
        self.elems[elem_id].reactivate();

        Ok(())
    }

    /// Collapse the Mesh back to its root Elems, or to the initial refinements if any were marked
    pub fn unrefine_all_elements(&mut self) -> Result<(), HRefError> {
        let outermost: Vec<usize> = self
            .elems
            .iter()
            .filter(|elem| elem.has_children() && !elem.initial)
            .filter(|elem| {
                elem.parent_id()
                    .map_or(true, |parent_id| self.elems[parent_id].initial)
            })
            .map(|elem| elem.id)
            .collect();

        debug!("unrefining {} Elems", outermost.len());
        for elem_id in outermost {
            self.unrefine_element(elem_id)?;
        }
        Ok(())
    }

    /// Unrefine every Elem whose children are all active, removing the finest layer of refinement.
    /// Refinements marked as initial are kept. Returns the number of unrefined Elems.
    pub fn unrefine_one_layer(&mut self) -> Result<usize, HRefError> {
        let parents: Vec<usize> = self
            .elems
            .iter()
            .filter(|elem| !elem.initial)
            .filter(|elem| {
                elem.child_ids().map_or(false, |children| {
                    children.iter().all(|child| self.elems[*child].is_active())
                })
            })
            .map(|elem| elem.id)
            .collect();

        for elem_id in parents.iter() {
            self.unrefine_element(*elem_id)?;
        }
        Ok(parents.len())
    }

    /// Produce a copy of this Mesh with every active Elem refined once more, for computing reference solutions
    pub fn reference_mesh(&self) -> Result<Self, HRefError> {
        let mut reference = self.clone();
        reference.refine_all_elements(HRef::Uniform, false)?;
        Ok(reference)
    }
}

fn anisotropic_towards(elem: &Elem, marked_sides: &[usize]) -> HRef {
    if elem.kind == ElemKind::Triangle {
        HRef::Uniform
    } else if marked_sides.iter().all(|side| side % 2 == 0) {
        HRef::Horizontal
    } else if marked_sides.iter().all(|side| side % 2 == 1) {
        HRef::Vertical
    } else {
        HRef::Uniform
    }
}
