/// Shared validation used by every mesh file front end
pub mod builder;
/// Gmsh 2.2 ASCII (`.msh`) files
pub mod gmsh;
/// The native block-structured mesh format
pub mod native;
/// The variable/expression language used by the native format and by XML attributes
pub mod resolver;
/// Serialization of a Mesh to the native format
pub mod writer;
/// The XML mesh format
pub mod xml;

use crate::mesh::{
    h_refinement::{HRef, HRefError},
    Mesh,
};
use builder::BuildError;
use resolver::ResolveError;

use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// A location in a mesh file (both components start at 1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// The Position of a byte offset within `source`
    pub fn of_offset(source: &str, offset: usize) -> Self {
        let mut end = offset.min(source.len());
        while !source.is_char_boundary(end) {
            end -= 1;
        }
        let before = &source[..end];
        let line = before.matches('\n').count() + 1;
        let column = match before.rfind('\n') {
            Some(newline) => before[newline + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        Self { line, column }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unable to read mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("{pos}: {message}")]
    Syntax { pos: Position, message: String },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{pos}: {source}")]
    Invalid { pos: Position, source: BuildError },
    #[error("{pos}: malformed XML: {message}")]
    Xml { pos: Position, message: String },
    #[error("{pos}: refinement {index} failed: {source}")]
    Refinement {
        pos: Position,
        index: usize,
        source: HRefError,
    },
}

impl ParseError {
    /// Where in the file the error was found (not available for I/O errors)
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Io(_) => None,
            Self::Syntax { pos, .. } | Self::Invalid { pos, .. } | Self::Xml { pos, .. } => {
                Some(*pos)
            }
            Self::Refinement { pos, .. } => Some(*pos),
            Self::Resolve(err) => Some(err.position()),
        }
    }

    pub(crate) fn syntax(pos: Position, message: impl Into<String>) -> Self {
        Self::Syntax {
            pos,
            message: message.into(),
        }
    }
}

/// Attach a file location to a validation failure
pub(crate) trait AtPosition<T> {
    fn at(self, pos: Position) -> Result<T, ParseError>;
}

impl<T> AtPosition<T> for Result<T, BuildError> {
    fn at(self, pos: Position) -> Result<T, ParseError> {
        self.map_err(|source| ParseError::Invalid { pos, source })
    }
}

/// An entry of a mesh file's `refinements` list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefinementEntry {
    pub pos: Position,
    pub elem_id: usize,
    pub mode: i64,
}

/// Replay a list of refinements on a freshly built Mesh in declaration order
pub(crate) fn apply_refinements(
    mesh: &mut Mesh,
    refinements: &[RefinementEntry],
) -> Result<(), ParseError> {
    for (index, entry) in refinements.iter().enumerate() {
        let refinement =
            HRef::from_mode(entry.mode).ok_or(HRefError::InvalidRefinementMode {
                elem_id: entry.elem_id,
                mode: entry.mode,
            });

        refinement
            .and_then(|refinement| mesh.refine_element(entry.elem_id, refinement))
            .map_err(|source| ParseError::Refinement {
                pos: entry.pos,
                index,
                source,
            })?;
    }
    Ok(())
}

/// Load a Mesh from a file
///
/// The format is chosen by extension: `.xml` files are read as XML, `.msh` files as Gmsh 2.2 ASCII,
/// and anything else as the native format.
pub fn load(path: impl AsRef<Path>) -> Result<Mesh, ParseError> {
    let path = path.as_ref();
    let source = read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let mesh = match extension.as_deref() {
        Some("xml") => xml::parse_xml_str(&source)?,
        Some("msh") => gmsh::parse_gmsh_str(&source)?,
        _ => native::parse_native_str(&source)?,
    };

    info!(
        "loaded Mesh from {}: {} Nodes, {} Edges, {} active Elems",
        path.display(),
        mesh.nodes.len(),
        mesh.edges.len(),
        mesh.num_active_elems()
    );

    Ok(mesh)
}
