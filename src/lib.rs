//! Adaptive 2D Finite Element Mesh Engine
//!
//! A [`Mesh`] describes a 2D domain partitioned into (possibly curved) triangles and quadrilaterals.
//! It is loaded once from a mesh file (see [`mesh_file`]) and then h-refined and derefined in place,
//! either by explicit commands or through a criterion closure supplied by an external adaptivity loop.
//!
//! ```no_run
//! use fem_mesh_2d::{HRef, Mesh};
//!
//! let mut mesh = Mesh::from_file("./test_input/lshape.mesh").unwrap();
//! mesh.refine_element(0, HRef::Uniform).unwrap();
//! mesh.refine_towards_boundary("Outer", 2, false).unwrap();
//! mesh.regularize(1).unwrap();
//!
//! let reference = mesh.reference_mesh().unwrap();
//! assert_eq!(reference.num_active_elems(), 4 * mesh.num_active_elems());
//! ```

/// The geometric and topological structure of a Domain along with its refinement hierarchy
pub mod mesh;
/// Readers and writers for the supported mesh file formats
pub mod mesh_file;

pub use mesh::{
    curve::{Curve, Nurbs},
    edge::Edge,
    elem::{Elem, ElemKind, ElemState},
    h_refinement::{HRef, HRefError},
    marker::{Marker, MarkerId, MarkerTable},
    node::Node,
    space::Point,
    Mesh,
};
pub use mesh_file::{load, ParseError, Position};
