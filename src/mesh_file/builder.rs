use crate::mesh::{
    curve::{Curve, CurveError, Nurbs},
    elem::ElemKind,
    marker::Marker,
    space::Point,
    Mesh,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("vertex {0} is defined more than once")]
    DuplicateVertex(usize),
    #[error("vertex {0} is missing; vertex indices must be contiguous starting from 0")]
    VertexGap(usize),
    #[error("vertex {0} was defined after the first element")]
    LateVertex(usize),
    #[error("vertex {0} is not defined")]
    UndefinedVertex(usize),
    #[error("elements must have 3 or 4 vertices (found {0})")]
    VertexCount(usize),
    #[error("vertex {0} is used more than once by the same element")]
    RepeatedVertex(usize),
    #[error("element vertices must be listed in counter-clockwise order and form a convex, non-degenerate shape")]
    NotCounterClockwise,
    #[error("element marker {0} is invalid (element markers must be non-negative integers or names)")]
    InvalidElementMarker(Marker),
    #[error("boundary marker {0} is invalid (boundary markers must be positive integers or names)")]
    InvalidBoundaryMarker(Marker),
    #[error("there is no edge between vertices {} and {} in any element", .0[0], .0[1])]
    MissingEdge([usize; 2]),
    #[error(transparent)]
    Curve(#[from] CurveError),
    #[error("the edge between vertices {} and {} already has a curve", .0[0], .0[1])]
    DuplicateCurve([usize; 2]),
    #[error("a mesh needs at least one element")]
    NoElements,
}

/// Incrementally assembles and validates a [`Mesh`] for the file front ends
///
/// Vertices are added first (in any order, but with contiguous indices), followed by elements and then
/// boundary markers and curves, which must refer to edges of existing elements.
#[derive(Debug)]
pub struct MeshBuilder {
    mesh: Mesh,
    vertices: BTreeMap<usize, Point>,
    sealed: bool,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self {
            mesh: Mesh::blank(),
            vertices: BTreeMap::new(),
            sealed: false,
        }
    }

    /// Define the vertex with a given index
    pub fn add_vertex(&mut self, index: usize, point: Point) -> Result<(), BuildError> {
        if self.sealed {
            return Err(BuildError::LateVertex(index));
        }
        if self.vertices.contains_key(&index) {
            return Err(BuildError::DuplicateVertex(index));
        }
        self.vertices.insert(index, point);
        Ok(())
    }

    /// Define the vertex following the largest index seen so far
    pub fn push_vertex(&mut self, point: Point) -> Result<usize, BuildError> {
        let index = self
            .vertices
            .keys()
            .next_back()
            .map_or(0, |last| last + 1);
        self.add_vertex(index, point)?;
        Ok(index)
    }

    fn seal_vertices(&mut self) -> Result<(), BuildError> {
        if self.sealed {
            return Ok(());
        }

        for (expected, index) in self.vertices.keys().enumerate() {
            if *index != expected {
                return Err(BuildError::VertexGap(expected));
            }
        }
        for point in self.vertices.values() {
            self.mesh.insert_node(*point);
        }

        self.sealed = true;
        Ok(())
    }

    /// Add a root element; returns its id
    pub fn add_element(&mut self, vertices: &[usize], marker: Marker) -> Result<usize, BuildError> {
        self.seal_vertices()?;

        let kind = ElemKind::from_num_vertices(vertices.len())
            .ok_or(BuildError::VertexCount(vertices.len()))?;

        if let Some(undefined) = vertices.iter().find(|v| **v >= self.mesh.nodes.len()) {
            return Err(BuildError::UndefinedVertex(*undefined));
        }
        for (i, v) in vertices.iter().enumerate() {
            if vertices[i + 1..].contains(v) {
                return Err(BuildError::RepeatedVertex(*v));
            }
        }

        let n = kind.num_vertices();
        let points: SmallVec<[Point; 4]> = vertices
            .iter()
            .map(|v| self.mesh.nodes[*v].coords)
            .collect();
        if (0..n).any(|i| Point::turn(&points[i], &points[(i + 1) % n], &points[(i + 2) % n]) <= 0.0)
        {
            return Err(BuildError::NotCounterClockwise);
        }

        if !marker.is_valid_element_marker() {
            return Err(BuildError::InvalidElementMarker(marker));
        }
        let marker_id = self.mesh.element_markers.intern(marker);

        Ok(self
            .mesh
            .insert_root_elem(SmallVec::from_slice(vertices), marker_id))
    }

    /// Attach a boundary marker to the edge between two vertices
    pub fn add_boundary(&mut self, v1: usize, v2: usize, marker: Marker) -> Result<(), BuildError> {
        if !marker.is_valid_boundary_marker() {
            return Err(BuildError::InvalidBoundaryMarker(marker));
        }
        let edge_id = self.edge_id(v1, v2)?;
        let marker_id = self.mesh.boundary_markers.intern(marker);
        self.mesh.edges[edge_id].marker = Some(marker_id);
        Ok(())
    }

    /// Attach a circular arc (angle in degrees) running from `v1` to `v2`
    pub fn add_arc(&mut self, v1: usize, v2: usize, angle: f64) -> Result<(), BuildError> {
        let curve = Curve::arc(angle)?;
        self.add_curve(v1, v2, curve)
    }

    /// Attach a NURBS curve running from `v1` to `v2`
    ///
    /// Only the inner control points and inner knots are given; the end points are the vertices themselves,
    /// weighted by `end_weights`.
    pub fn add_nurbs(
        &mut self,
        v1: usize,
        v2: usize,
        degree: usize,
        inner_points: &[[f64; 3]],
        inner_knots: &[f64],
        end_weights: [f64; 2],
    ) -> Result<(), BuildError> {
        self.edge_id(v1, v2)?;
        let nurbs = Nurbs::from_inner(
            degree,
            &self.mesh.nodes[v1].coords,
            &self.mesh.nodes[v2].coords,
            inner_points,
            inner_knots,
        )?
        .with_end_weights(end_weights)?;
        self.add_curve(v1, v2, Curve::Nurbs(nurbs))
    }

    fn add_curve(&mut self, v1: usize, v2: usize, curve: Curve) -> Result<(), BuildError> {
        let edge_id = self.edge_id(v1, v2)?;
        let edge = &mut self.mesh.edges[edge_id];
        if edge.curve.is_some() {
            return Err(BuildError::DuplicateCurve([v1, v2]));
        }

        edge.curve = Some(if edge.nodes[0] == v1 {
            curve
        } else {
            curve.reversed()
        });
        Ok(())
    }

    fn edge_id(&self, v1: usize, v2: usize) -> Result<usize, BuildError> {
        self.mesh
            .edge_between(v1, v2)
            .map(|edge| edge.id)
            .ok_or(BuildError::MissingEdge([v1, v2]))
    }

    /// Finish the Mesh, flagging every Edge that borders exactly one element as a boundary Edge
    pub fn build(mut self) -> Result<Mesh, BuildError> {
        if self.mesh.elems.is_empty() {
            return Err(BuildError::NoElements);
        }

        let mut num_adjacent = vec![0_usize; self.mesh.edges.len()];
        for elem in self.mesh.elems.iter() {
            for edge_id in elem.edges.iter() {
                num_adjacent[*edge_id] += 1;
            }
        }

        for (edge, count) in self.mesh.edges.iter_mut().zip(num_adjacent) {
            edge.boundary = count == 1;
            if edge.boundary && edge.marker.is_none() {
                warn!(
                    "boundary Edge between Nodes {} and {} has no marker",
                    edge.nodes[0], edge.nodes[1]
                );
            }
        }

        debug!(
            "built Mesh with {} Nodes, {} Edges and {} Elems",
            self.mesh.nodes.len(),
            self.mesh.edges.len(),
            self.mesh.elems.len()
        );

        Ok(self.mesh)
    }
}

impl Default for MeshBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn with_square_vertices() -> MeshBuilder {
        let mut builder = MeshBuilder::new();
        for [x, y] in [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]] {
            builder.push_vertex(Point::new(x, y)).unwrap();
        }
        builder
    }

    #[test]
    fn build_unit_square() {
        let mut builder = MeshBuilder::new();
        // out of order vertex indices are fine as long as they are contiguous
        builder.add_vertex(2, Point::new(1.0, 1.0)).unwrap();
        builder.add_vertex(0, Point::new(0.0, 0.0)).unwrap();
        builder.add_vertex(3, Point::new(0.0, 1.0)).unwrap();
        builder.add_vertex(1, Point::new(1.0, 0.0)).unwrap();

        assert_eq!(builder.add_element(&[0, 1, 2, 3], 0.into()).unwrap(), 0);
        builder.add_boundary(0, 1, "Bottom".into()).unwrap();
        builder.add_boundary(2, 1, 2.into()).unwrap();
        builder.add_arc(2, 3, 90.0).unwrap();

        let mesh = builder.build().unwrap();
        assert_eq!(mesh.nodes[2].coords, Point::new(1.0, 1.0));
        assert!(mesh.edges.iter().all(|edge| edge.boundary));
        assert_eq!(
            mesh.boundary_marker(mesh.edge_between(1, 2).unwrap().id),
            Some(&Marker::Integer(2))
        );
        assert_eq!(mesh.boundary_marker(mesh.edge_between(3, 0).unwrap().id), None);
        assert_eq!(
            mesh.edge_between(3, 2).unwrap().curve_from(2),
            Some(Curve::Arc { angle: 90.0 })
        );
        assert_relative_eq!(
            mesh.total_area(),
            1.0 + std::f64::consts::FRAC_PI_8 - 0.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn shared_edges_are_interior() {
        let mut builder = with_square_vertices();
        builder.add_element(&[0, 1, 2], "a".into()).unwrap();
        builder.add_element(&[0, 2, 3], "b".into()).unwrap();
        let mesh = builder.build().unwrap();

        assert_eq!(mesh.edges.len(), 5);
        assert!(!mesh.edge_between(2, 0).unwrap().boundary);
        assert_eq!(mesh.element_markers.len(), 2);
    }

    #[test]
    fn vertex_errors() {
        let mut builder = with_square_vertices();
        assert_eq!(
            builder.add_vertex(1, Point::new(5.0, 5.0)),
            Err(BuildError::DuplicateVertex(1))
        );
        assert_eq!(builder.vertices[&1], Point::new(1.0, 0.0));

        let mut gappy = MeshBuilder::new();
        gappy.add_vertex(0, Point::new(0.0, 0.0)).unwrap();
        gappy.add_vertex(2, Point::new(1.0, 0.0)).unwrap();
        assert_eq!(
            gappy.add_element(&[0, 1, 2], 1.into()),
            Err(BuildError::VertexGap(1))
        );

        builder.add_element(&[0, 1, 2], 1.into()).unwrap();
        assert_eq!(
            builder.push_vertex(Point::new(2.0, 2.0)),
            Err(BuildError::LateVertex(4))
        );
    }

    #[test]
    fn element_errors() {
        let mut builder = with_square_vertices();
        assert_eq!(
            builder.add_element(&[0, 1], 1.into()),
            Err(BuildError::VertexCount(2))
        );
        assert_eq!(
            builder.add_element(&[0, 1, 7], 1.into()),
            Err(BuildError::UndefinedVertex(7))
        );
        assert_eq!(
            builder.add_element(&[0, 1, 1, 3], 1.into()),
            Err(BuildError::RepeatedVertex(1))
        );
        assert_eq!(
            builder.add_element(&[0, 3, 2, 1], 1.into()),
            Err(BuildError::NotCounterClockwise)
        );
        assert_eq!(
            builder.add_element(&[0, 2, 1], 1.into()),
            Err(BuildError::NotCounterClockwise)
        );
        assert_eq!(
            builder.add_element(&[0, 1, 2, 3], (-1).into()),
            Err(BuildError::InvalidElementMarker(Marker::Integer(-1)))
        );
        assert!(builder.add_element(&[0, 1, 2, 3], 0.into()).is_ok());
    }

    #[test]
    fn boundary_and_curve_errors() {
        let mut builder = with_square_vertices();
        builder.add_element(&[0, 1, 2, 3], 0.into()).unwrap();

        for marker in [0, -1] {
            assert_eq!(
                builder.add_boundary(0, 1, marker.into()),
                Err(BuildError::InvalidBoundaryMarker(Marker::Integer(marker as i64)))
            );
        }
        assert_eq!(
            builder.add_boundary(0, 2, 1.into()),
            Err(BuildError::MissingEdge([0, 2]))
        );
        assert_eq!(
            builder.add_arc(1, 3, 45.0),
            Err(BuildError::MissingEdge([1, 3]))
        );
        assert_eq!(
            builder.add_arc(0, 1, 0.0),
            Err(BuildError::Curve(CurveError::InvalidArcAngle(0.0)))
        );

        builder.add_arc(0, 1, 45.0).unwrap();
        assert_eq!(
            builder.add_arc(1, 0, 30.0),
            Err(BuildError::DuplicateCurve([1, 0]))
        );
        assert_eq!(
            builder.add_nurbs(1, 2, 2, &[[1.5, 0.5, -1.0]], &[], [1.0, 1.0]),
            Err(BuildError::Curve(CurveError::NonPositiveWeight))
        );

        assert_eq!(
            MeshBuilder::new().build().unwrap_err(),
            BuildError::NoElements
        );
    }

    #[test]
    fn nurbs_is_oriented_along_the_edge() {
        let mut builder = with_square_vertices();
        builder.add_element(&[0, 1, 2, 3], 0.into()).unwrap();
        // declared against the edge's direction
        builder
            .add_nurbs(2, 1, 2, &[[1.5, 0.5, 1.0]], &[], [2.0, 1.0])
            .unwrap();
        let mesh = builder.build().unwrap();

        let edge = mesh.edge_between(1, 2).unwrap();
        assert_eq!(edge.nodes, [1, 2]);
        match &edge.curve {
            Some(Curve::Nurbs(nurbs)) => {
                // the end weights follow their vertices
                assert_eq!(nurbs.control_points[0], [1.0, 0.0, 1.0]);
                assert_eq!(nurbs.control_points[2], [1.0, 1.0, 2.0]);
            }
            other => panic!("expected a NURBS curve, found {:?}", other),
        }
        let mid = mesh.edges[edge.id]
            .curve
            .as_ref()
            .unwrap()
            .midpoint(&mesh.nodes[1].coords, &mesh.nodes[2].coords);
        assert_relative_eq!(mid.x, 1.2, epsilon = 1e-12);
        assert_relative_eq!(mid.y, 0.6, epsilon = 1e-12);
    }
}
