use super::{
    builder::{BuildError, MeshBuilder},
    AtPosition, ParseError, Position,
};
use crate::mesh::{marker::Marker, space::Point, Mesh};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, warn};

const GMSH_LINE: u32 = 1;
const GMSH_TRIANGLE: u32 = 2;
const GMSH_QUAD: u32 = 3;
const GMSH_POINT: u32 = 15;

/// Parse a Mesh from a Gmsh 2.2 ASCII (`.msh`) file
///
/// Triangles (type 2) and quads (type 3) become elements, and lines (type 1) mark boundary edges. The first tag of
/// each element is its physical group, which is translated to a named marker through `$PhysicalNames`
/// when possible, or an integer marker otherwise. Nodes are renumbered densely in the order they are listed.
pub fn parse_gmsh_str(source: &str) -> Result<Mesh, ParseError> {
    let mut lines = Lines::new(source);
    let mut physical_names: HashMap<(usize, i64), String> = HashMap::new();
    let mut nodes: Vec<(Position, usize, Point)> = Vec::new();
    let mut elements: Vec<GmshElement> = Vec::new();

    while let Some(line) = lines.next_line() {
        match line.text.trim() {
            "$MeshFormat" => {
                let header = lines.expect_line("the mesh format")?;
                let fields = header.fields();
                let version: f64 = header.field(&fields, 0, "a version number")?;
                let file_type: u32 = header.field(&fields, 1, "a file type")?;
                if version.floor() != 2.0 || file_type != 0 {
                    return Err(ParseError::syntax(
                        header.pos(),
                        "only ASCII Gmsh files of version 2 are supported",
                    ));
                }
                lines.expect_end("MeshFormat")?;
            }
            "$PhysicalNames" => {
                for _ in 0..lines.count("the number of physical names")? {
                    let entry = lines.expect_line("a physical name")?;
                    let fields = entry.fields();
                    let dim: usize = entry.field(&fields, 0, "a dimension")?;
                    let tag: i64 = entry.field(&fields, 1, "a physical tag")?;
                    let name = entry.rest_after(&fields, 1).trim().trim_matches('"');
                    physical_names.insert((dim, tag), name.to_string());
                }
                lines.expect_end("PhysicalNames")?;
            }
            "$Nodes" => {
                for _ in 0..lines.count("the number of nodes")? {
                    let entry = lines.expect_line("a node")?;
                    let fields = entry.fields();
                    let tag: usize = entry.field(&fields, 0, "a node tag")?;
                    let x: f64 = entry.field(&fields, 1, "an x coordinate")?;
                    let y: f64 = entry.field(&fields, 2, "a y coordinate")?;
                    nodes.push((entry.pos(), tag, Point::new(x, y)));
                }
                lines.expect_end("Nodes")?;
            }
            "$Elements" => {
                for _ in 0..lines.count("the number of elements")? {
                    elements.push(GmshElement::parse(lines.expect_line("an element")?)?);
                }
                lines.expect_end("Elements")?;
            }
            section if section.starts_with('$') && !section.starts_with("$End") => {
                warn!(
                    "skipping unsupported Gmsh section {} at {}",
                    section,
                    line.pos()
                );
                lines.skip_section(&section[1..])?;
            }
            other => {
                return Err(ParseError::syntax(
                    line.pos(),
                    format!("expected a section header, found \"{}\"", other),
                ))
            }
        }
    }

    let mut builder = MeshBuilder::new();
    let mut dense_ids: HashMap<usize, usize> = HashMap::new();
    for (pos, tag, point) in nodes {
        if dense_ids.contains_key(&tag) {
            return Err(BuildError::DuplicateVertex(tag)).at(pos);
        }
        dense_ids.insert(tag, builder.push_vertex(point).at(pos)?);
    }

    let marker = |dim: usize, tag: i64| match physical_names.get(&(dim, tag)) {
        Some(name) => Marker::Name(name.clone()),
        None => Marker::Integer(tag),
    };

    for element in elements.iter().filter(|e| e.kind != GMSH_LINE) {
        if element.kind == GMSH_POINT {
            continue;
        }
        let vertices = element.dense_nodes(&dense_ids)?;
        let element_marker = element.physical.map_or(Marker::Integer(0), |tag| marker(2, tag));
        builder
            .add_element(&vertices, element_marker)
            .at(element.pos)?;
    }

    for element in elements.iter().filter(|e| e.kind == GMSH_LINE) {
        let vertices = element.dense_nodes(&dense_ids)?;
        match element.physical {
            Some(tag) => builder
                .add_boundary(vertices[0], vertices[1], marker(1, tag))
                .at(element.pos)?,
            None => debug!("skipping untagged Gmsh line at {}", element.pos),
        }
    }

    builder.build().at(lines.end)
}

struct GmshElement {
    pos: Position,
    kind: u32,
    physical: Option<i64>,
    nodes: Vec<usize>,
}

impl GmshElement {
    fn parse(line: Line) -> Result<Self, ParseError> {
        let fields = line.fields();
        let kind: u32 = line.field(&fields, 1, "an element type")?;
        let num_tags: usize = line.field(&fields, 2, "a number of tags")?;

        let num_nodes = match kind {
            GMSH_LINE => 2,
            GMSH_TRIANGLE => 3,
            GMSH_QUAD => 4,
            GMSH_POINT => 1,
            _ => {
                return Err(ParseError::syntax(
                    fields[1].pos,
                    format!("unsupported Gmsh element type {}", kind),
                ))
            }
        };

        let physical = if num_tags > 0 {
            Some(line.field(&fields, 3, "a physical tag")?)
        } else {
            None
        };

        let first_node = num_tags.checked_add(3).ok_or_else(|| {
            ParseError::syntax(fields[2].pos, format!("too many tags ({})", num_tags))
        })?;
        if fields.len() != first_node + num_nodes {
            return Err(ParseError::syntax(
                line.pos(),
                format!(
                    "Gmsh elements of type {} need exactly {} nodes (found {})",
                    kind,
                    num_nodes,
                    fields.len().saturating_sub(first_node)
                ),
            ));
        }

        let nodes = (first_node..fields.len())
            .map(|i| line.field(&fields, i, "a node tag"))
            .collect::<Result<Vec<usize>, _>>()?;

        Ok(Self {
            pos: line.pos(),
            kind,
            physical,
            nodes,
        })
    }

    fn dense_nodes(&self, dense_ids: &HashMap<usize, usize>) -> Result<Vec<usize>, ParseError> {
        self.nodes
            .iter()
            .map(|tag| {
                dense_ids
                    .get(tag)
                    .copied()
                    .ok_or(BuildError::UndefinedVertex(*tag))
            })
            .collect::<Result<Vec<_>, _>>()
            .at(self.pos)
    }
}

struct Field<'s> {
    pos: Position,
    offset: usize,
    text: &'s str,
}

#[derive(Clone, Copy)]
struct Line<'s> {
    number: usize,
    text: &'s str,
}

impl<'s> Line<'s> {
    fn pos(&self) -> Position {
        let indent = self.text.len() - self.text.trim_start().len();
        Position::new(self.number, indent + 1)
    }

    fn fields(&self) -> Vec<Field<'s>> {
        let mut fields = Vec::new();
        let mut start = None;
        let ends = std::iter::once((self.text.len(), ' '));
        for (idx, c) in self.text.char_indices().chain(ends) {
            match (c.is_whitespace(), start) {
                (false, None) => start = Some(idx),
                (true, Some(first)) => {
                    fields.push(Field {
                        pos: Position::new(self.number, first + 1),
                        offset: first,
                        text: &self.text[first..idx],
                    });
                    start = None;
                }
                _ => (),
            }
        }
        fields
    }

    fn field<T: FromStr>(&self, fields: &[Field], index: usize, what: &str) -> Result<T, ParseError> {
        let field = fields.get(index).ok_or_else(|| {
            ParseError::syntax(
                Position::new(self.number, self.text.trim_end().len() + 1),
                format!("expected {}", what),
            )
        })?;
        field.text.parse().map_err(|_| {
            ParseError::syntax(
                field.pos,
                format!("expected {}, found \"{}\"", what, field.text),
            )
        })
    }

    fn rest_after(&self, fields: &[Field], index: usize) -> &'s str {
        match fields.get(index) {
            Some(field) => &self.text[field.offset + field.text.len()..],
            None => "",
        }
    }
}

struct Lines<'s> {
    inner: std::iter::Enumerate<std::str::Lines<'s>>,
    end: Position,
}

impl<'s> Lines<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            inner: source.lines().enumerate(),
            end: Position::of_offset(source, source.len()),
        }
    }

    fn next_line(&mut self) -> Option<Line<'s>> {
        self.inner
            .by_ref()
            .find(|(_, text)| !text.trim().is_empty())
            .map(|(idx, text)| Line {
                number: idx + 1,
                text,
            })
    }

    fn expect_line(&mut self, what: &str) -> Result<Line<'s>, ParseError> {
        let end = self.end;
        self.next_line().ok_or_else(|| {
            ParseError::syntax(end, format!("unexpected end of file; expected {}", what))
        })
    }

    fn count(&mut self, what: &str) -> Result<usize, ParseError> {
        let line = self.expect_line(what)?;
        line.field(&line.fields(), 0, what)
    }

    fn expect_end(&mut self, section: &str) -> Result<(), ParseError> {
        let closing = format!("$End{}", section);
        let line = self.expect_line(&closing)?;
        if line.text.trim() == closing {
            Ok(())
        } else {
            Err(ParseError::syntax(
                line.pos(),
                format!("expected {}, found \"{}\"", closing, line.text.trim()),
            ))
        }
    }

    fn skip_section(&mut self, section: &str) -> Result<(), ParseError> {
        let closing = format!("$End{}", section);
        loop {
            if self.expect_line(&closing)?.text.trim() == closing {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRIANGLES: &str = "$MeshFormat
2.2 0 8
$EndMeshFormat
$PhysicalNames
3
1 1 \"Outer Wall\"
1 2 \"Inlet\"
2 7 \"Fluid\"
$EndPhysicalNames
$Nodes
4
10 0 0 0
20 1 0 0
30 1 1 0
40 0 1 0
$EndNodes
$Elements
8
1 15 2 0 1 10
2 1 2 1 1 10 20
3 1 2 2 2 20 30
4 1 2 1 3 30 40
5 1 0 40 10
6 2 2 7 1 10 20 30
7 2 2 7 1 10 30 40
8 1 2 1 3 10 30
$EndElements
";

    #[test]
    fn physical_names_and_renumbering() {
        let mesh = parse_gmsh_str(TWO_TRIANGLES).unwrap();

        assert_eq!(mesh.nodes.len(), 4);
        assert_eq!(mesh.nodes[2].coords, Point::new(1.0, 1.0));
        assert_eq!(mesh.num_active_elems(), 2);
        assert_eq!(mesh.elems[1].nodes.to_vec(), vec![0, 2, 3]);
        assert_eq!(mesh.element_marker(0), Some(&Marker::from("Fluid")));

        let inlet = mesh.edge_between(1, 2).unwrap();
        assert!(inlet.boundary);
        assert_eq!(mesh.boundary_marker(inlet.id), Some(&Marker::from("Inlet")));

        // untagged lines are skipped
        assert_eq!(mesh.boundary_marker(mesh.edge_between(3, 0).unwrap().id), None);

        // lines may mark interior edges
        let diagonal = mesh.edge_between(0, 2).unwrap();
        assert!(!diagonal.boundary);
        assert_eq!(
            mesh.boundary_marker(diagonal.id),
            Some(&Marker::from("Outer Wall"))
        );
    }

    #[test]
    fn unknown_sections_are_skipped() {
        let source = TWO_TRIANGLES.replace(
            "$Nodes",
            "$Comments\nanything goes here\n$EndComments\n$Nodes",
        );
        assert_eq!(parse_gmsh_str(&source).unwrap().num_active_elems(), 2);
    }

    #[test]
    fn non_positive_physical_tags_on_lines() {
        let source = TWO_TRIANGLES.replace("2 1 2 1 1 10 20", "2 1 2 0 1 10 20");
        match parse_gmsh_str(&source) {
            Err(ParseError::Invalid { pos, source }) => {
                assert_eq!(pos, Position::new(20, 1));
                assert_eq!(source, BuildError::InvalidBoundaryMarker(Marker::Integer(0)));
            }
            other => panic!("expected an invalid marker error, found {:?}", other),
        }
    }

    #[test]
    fn malformed_files() {
        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("2.2 0 8", "4.1 0 8")).unwrap_err();
        assert_eq!(err.position(), Some(Position::new(2, 1)));

        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("6 2 2 7 1", "6 9 2 7 1")).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert_eq!(err.position(), Some(Position::new(24, 3)));

        let huge = format!("6 2 {} 7 1", usize::MAX);
        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("6 2 2 7 1", &huge)).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert_eq!(err.position(), Some(Position::new(24, 5)));

        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("20 1 0 0", "20 1 zero 0")).unwrap_err();
        assert_eq!(err.position(), Some(Position::new(13, 6)));

        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("7 2 2 7 1 10 30 40", "7 2 2 7 1 10 30 50")).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Invalid {
                source: BuildError::UndefinedVertex(50),
                ..
            }
        ));

        let err = parse_gmsh_str(TWO_TRIANGLES.trim_end_matches("$EndElements\n")).unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));

        let err = parse_gmsh_str(&TWO_TRIANGLES.replace("30 1 1 0", "20 1 1 0")).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Invalid {
                source: BuildError::DuplicateVertex(20),
                ..
            }
        ));
    }
}
