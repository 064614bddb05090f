use super::{
    apply_refinements,
    builder::MeshBuilder,
    resolver::{evaluate, Bindings},
    AtPosition, ParseError, Position, RefinementEntry,
};
use crate::mesh::{marker::Marker, space::Point, Mesh};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fmt::Display;
use tracing::{debug, warn};

/// Parse a Mesh from the XML format
///
/// ```text
/// <mesh>
///   <variables> <var name="a" value="1.0"/> </variables>
///   <vertices> <vertex x="0" y="-a" i="0"/> ... </vertices>
///   <elements> <quad v1="0" v2="1" v3="4" v4="3" marker="Material_1"/> <triangle .../> </elements>
///   <edges> <edge v1="0" v2="1" marker="Bottom"/> ... </edges>
///   <curves>
///     <arc v1="4" v2="7" angle="45"/>
///     <NURBS v1="7" v2="6" degree="2"> <inner_point x="a" y="a" weight="0.5"/> <knot value="0.5"/> </NURBS>
///     <NURBS v1="2" v2="3" degree="2" start_weight="0.8" end_weight="1"> ... </NURBS>
///   </curves>
///   <refinements> <refinement element_id="0" refinement_type="0"/> </refinements>
/// </mesh>
/// ```
/// The short tag names `v`, `t`, `q`, `ed` and `ref` are also accepted, and namespace prefixes are ignored.
/// Numeric attributes are expressions over the declared variables. Marker attributes are integers or names.
pub fn parse_xml_str(source: &str) -> Result<Mesh, ParseError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut parser = XmlMeshParser::new();

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|err| {
            xml_error(
                Position::of_offset(source, reader.error_position() as usize),
                err,
            )
        })?;
        let after = reader.buffer_position() as usize;

        match event {
            Event::Start(ref e) => {
                let tag = Tag::read(e, source, before, after)?;
                parser.open(&tag)?;
            }
            Event::Empty(ref e) => {
                let tag = Tag::read(e, source, before, after)?;
                parser.open(&tag)?;
                parser.close(&tag.name)?;
            }
            Event::End(ref e) => {
                parser.close(&String::from_utf8_lossy(e.local_name().as_ref()))?;
            }
            Event::Eof => break,
            _ => (),
        }
    }

    parser.finish(Position::of_offset(source, source.len()))
}

fn xml_error(pos: Position, err: impl Display) -> ParseError {
    ParseError::Xml {
        pos,
        message: err.to_string(),
    }
}

struct Attribute {
    key: String,
    value: String,
    pos: Position,
}

struct Tag {
    name: String,
    pos: Position,
    attributes: Vec<Attribute>,
}

impl Tag {
    fn read(e: &BytesStart, source: &str, before: usize, after: usize) -> Result<Self, ParseError> {
        // skip the whitespace trimmed away in front of the tag
        let start = before + source[before..].len() - source[before..].trim_start().len();
        let raw = source.get(start..after.max(start)).unwrap_or_default();
        let pos = Position::of_offset(source, start);

        let mut attributes = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| xml_error(pos, err))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| xml_error(pos, err))?
                .into_owned();
            let value_pos = value_offset(raw, &key)
                .map_or(pos, |offset| Position::of_offset(source, start + offset));

            attributes.push(Attribute {
                key,
                value,
                pos: value_pos,
            });
        }

        Ok(Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            pos,
            attributes,
        })
    }

    fn has(&self, key: &str) -> bool {
        self.attributes.iter().any(|attr| attr.key == key)
    }

    fn raw(&self, key: &str) -> Result<(&str, Position), ParseError> {
        self.attributes
            .iter()
            .find(|attr| attr.key == key)
            .map(|attr| (attr.value.as_str(), attr.pos))
            .ok_or_else(|| {
                ParseError::syntax(
                    self.pos,
                    format!("<{}> is missing the \"{}\" attribute", self.name, key),
                )
            })
    }

    fn number(&self, key: &str, bindings: &Bindings) -> Result<f64, ParseError> {
        let (text, pos) = self.raw(key)?;
        Ok(evaluate(text, bindings, pos)?.as_number()?)
    }

    fn number_or(&self, key: &str, default: f64, bindings: &Bindings) -> Result<f64, ParseError> {
        if self.has(key) {
            self.number(key, bindings)
        } else {
            Ok(default)
        }
    }

    fn index(&self, key: &str, bindings: &Bindings) -> Result<usize, ParseError> {
        let (text, pos) = self.raw(key)?;
        Ok(evaluate(text, bindings, pos)?.as_index()?)
    }

    fn integer(&self, key: &str, bindings: &Bindings) -> Result<i64, ParseError> {
        let (text, pos) = self.raw(key)?;
        Ok(evaluate(text, bindings, pos)?.as_integer()?)
    }

    fn marker(&self, key: &str) -> Result<Marker, ParseError> {
        let (text, _) = self.raw(key)?;
        Ok(match text.trim().parse::<i64>() {
            Ok(value) => Marker::Integer(value),
            Err(_) => Marker::Name(text.to_string()),
        })
    }
}

// byte offset of an attribute's value (just past the opening quote) within a raw tag
fn value_offset(raw: &str, key: &str) -> Option<usize> {
    raw.match_indices(key).find_map(|(idx, _)| {
        let preceded = raw[..idx]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_whitespace() || c == ':');
        let rest = &raw[idx + key.len()..];
        let after_eq = rest.trim_start().strip_prefix('=')?;
        let value = after_eq.trim_start();
        if !preceded || !value.starts_with(|c| c == '"' || c == '\'') {
            return None;
        }
        Some(raw.len() - value.len() + 1)
    })
}

struct PendingNurbs {
    pos: Position,
    v1: usize,
    v2: usize,
    degree: usize,
    end_weights: [f64; 2],
    inner_points: Vec<[f64; 3]>,
    inner_knots: Vec<f64>,
}

struct XmlMeshParser {
    bindings: Bindings,
    builder: MeshBuilder,
    refinements: Vec<RefinementEntry>,
    nurbs: Option<PendingNurbs>,
}

impl XmlMeshParser {
    fn new() -> Self {
        Self {
            bindings: Bindings::new(),
            builder: MeshBuilder::new(),
            refinements: Vec::new(),
            nurbs: None,
        }
    }

    fn open(&mut self, tag: &Tag) -> Result<(), ParseError> {
        let vars = &self.bindings;
        match tag.name.as_str() {
            "var" => {
                let (name, _) = tag.raw("name")?;
                let (text, pos) = tag.raw("value")?;
                let value = evaluate(text, vars, pos)?;
                self.bindings.define(name.trim(), tag.pos, value)?;
            }
            "vertex" | "v" => {
                let point = Point::new(tag.number("x", vars)?, tag.number("y", vars)?);
                if tag.has("i") {
                    let index = tag.index("i", vars)?;
                    self.builder.add_vertex(index, point).at(tag.pos)?;
                } else {
                    self.builder.push_vertex(point).at(tag.pos)?;
                }
            }
            "triangle" | "t" | "quad" | "q" => {
                let num_vertices = if tag.name.starts_with('t') { 3 } else { 4 };
                let vertices = (1..=num_vertices)
                    .map(|i| tag.index(&format!("v{}", i), vars))
                    .collect::<Result<Vec<_>, _>>()?;
                let marker = tag.marker("marker")?;
                self.builder.add_element(&vertices, marker).at(tag.pos)?;
            }
            "edge" | "ed" => {
                let [v1, v2] = [tag.index("v1", vars)?, tag.index("v2", vars)?];
                let marker = tag.marker("marker")?;
                self.builder.add_boundary(v1, v2, marker).at(tag.pos)?;
            }
            "arc" => {
                let [v1, v2] = [tag.index("v1", vars)?, tag.index("v2", vars)?];
                let angle = tag.number("angle", vars)?;
                self.builder.add_arc(v1, v2, angle).at(tag.pos)?;
            }
            "NURBS" | "nurbs" => {
                if self.nurbs.is_some() {
                    return Err(ParseError::syntax(tag.pos, "NURBS curves cannot be nested"));
                }
                self.nurbs = Some(PendingNurbs {
                    pos: tag.pos,
                    v1: tag.index("v1", vars)?,
                    v2: tag.index("v2", vars)?,
                    degree: tag.index("degree", vars)?,
                    end_weights: [
                        tag.number_or("start_weight", 1.0, vars)?,
                        tag.number_or("end_weight", 1.0, vars)?,
                    ],
                    inner_points: Vec::new(),
                    inner_knots: Vec::new(),
                });
            }
            "inner_point" => {
                let point = [
                    tag.number("x", vars)?,
                    tag.number("y", vars)?,
                    tag.number("weight", vars)?,
                ];
                self.pending_nurbs(tag)?.inner_points.push(point);
            }
            "knot" => {
                let knot = tag.number("value", vars)?;
                self.pending_nurbs(tag)?.inner_knots.push(knot);
            }
            "refinement" | "ref" => {
                let entry = RefinementEntry {
                    pos: tag.pos,
                    elem_id: tag.index("element_id", vars)?,
                    mode: tag.integer("refinement_type", vars)?,
                };
                self.refinements.push(entry);
            }
            "mesh" | "domain" | "variables" | "vertices" | "elements" | "edges" | "curves"
            | "refinements" => (),
            other => warn!("ignoring unknown XML tag <{}> at {}", other, tag.pos),
        }
        Ok(())
    }

    fn pending_nurbs(&mut self, tag: &Tag) -> Result<&mut PendingNurbs, ParseError> {
        self.nurbs.as_mut().ok_or_else(|| {
            ParseError::syntax(
                tag.pos,
                format!("<{}> must be inside a <NURBS> tag", tag.name),
            )
        })
    }

    fn close(&mut self, name: &str) -> Result<(), ParseError> {
        if name == "NURBS" || name == "nurbs" {
            if let Some(nurbs) = self.nurbs.take() {
                self.builder
                    .add_nurbs(
                        nurbs.v1,
                        nurbs.v2,
                        nurbs.degree,
                        &nurbs.inner_points,
                        &nurbs.inner_knots,
                        nurbs.end_weights,
                    )
                    .at(nurbs.pos)?;
            }
        }
        Ok(())
    }

    fn finish(self, end: Position) -> Result<Mesh, ParseError> {
        let mut mesh = self.builder.build().at(end)?;

        debug!("replaying {} refinements", self.refinements.len());
        apply_refinements(&mut mesh, &self.refinements)?;

        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::curve::Curve;
    use crate::mesh_file::{builder::BuildError, resolver::ResolveError};
    use approx::assert_relative_eq;

    const SQUARE_HEAD: &str = "<mesh>\n\
                               <vertices>\n\
                               <v x=\"0\" y=\"0\"/> <v x=\"1\" y=\"0\"/> <v x=\"1\" y=\"1\"/> <v x=\"0\" y=\"1\"/>\n\
                               </vertices>\n\
                               <elements> <q v1=\"0\" v2=\"1\" v3=\"2\" v4=\"3\" marker=\"Air\"/> </elements>\n";

    fn square_with(tail: &str) -> Result<Mesh, ParseError> {
        parse_xml_str(&format!("{}{}</mesh>", SQUARE_HEAD, tail))
    }

    #[test]
    fn variables_aliases_and_namespaces() {
        let mesh = parse_xml_str(
            r#"<?xml version="1.0"?>
<mesh:mesh xmlns:mesh="XMLMesh">
  <variables>
    <var name="a" value="2"/>
    <var name="h" value="a / 2"/>
  </variables>
  <vertices>
    <vertex x="0" y="0" i="0"/>
    <vertex x="a" y="0" i="1"/>
    <vertex x="a" y="a" i="3"/>
    <vertex x="h" y="a + h" i="2"/>
  </vertices>
  <elements>
    <mesh:t v1="0" v2="1" v3="3" marker="1"/>
    <triangle v1="0" v2="3" v3="2" marker="Glass"/>
  </elements>
  <edges>
    <ed v1="0" v2="1" marker="Bottom"/>
    <edge v1="1" v2="3" marker="2"/>
  </edges>
</mesh:mesh>"#,
        )
        .unwrap();

        assert_eq!(mesh.nodes[2].coords, Point::new(1.0, 3.0));
        assert_eq!(mesh.num_active_elems(), 2);
        assert_eq!(mesh.element_marker(0), Some(&Marker::Integer(1)));
        assert_eq!(mesh.element_marker(1), Some(&Marker::from("Glass")));
        assert_eq!(
            mesh.boundary_marker(mesh.edge_between(1, 3).unwrap().id),
            Some(&Marker::Integer(2))
        );
        assert!(!mesh.edge_between(0, 3).unwrap().boundary);
    }

    #[test]
    fn curves_and_refinements() {
        let mesh = square_with(
            "<curves>\n\
             <arc v1=\"1\" v2=\"2\" angle=\"90\"/>\n\
             <NURBS v1=\"3\" v2=\"2\" degree=\"2\">\n\
             <inner_point x=\"0.5\" y=\"1.5\" weight=\"1\"/>\n\
             </NURBS>\n\
             </curves>\n\
             <refinements> <ref element_id=\"0\" refinement_type=\"0\"/> </refinements>\n",
        )
        .unwrap();

        assert_eq!(
            mesh.edge_between(1, 2).unwrap().curve,
            Some(Curve::Arc { angle: 90.0 })
        );
        // the top edge runs from 2 to 3, so the NURBS is stored reversed
        match &mesh.edge_between(2, 3).unwrap().curve {
            Some(Curve::Nurbs(nurbs)) => assert_eq!(nurbs.control_points[0], [1.0, 1.0, 1.0]),
            other => panic!("expected a NURBS curve, found {:?}", other),
        }

        // only the child in the bottom left corner has no curved edge
        assert_eq!(mesh.num_active_elems(), 4);
        assert_eq!(
            mesh.active_elems()
                .filter(|elem| mesh.elem_is_curved(elem.id).unwrap())
                .count(),
            3
        );

        // square + circular segment on the right + parabolic cap on top
        let segment = std::f64::consts::FRAC_PI_8 - 0.25;
        let cap = 2.0 / 3.0 * 0.25;
        assert_relative_eq!(mesh.total_area(), 1.0 + segment + cap, epsilon = 1e-6);
    }

    #[test]
    fn nurbs_end_weights() {
        let mesh = square_with(
            "<curves>\n\
             <nurbs v1=\"3\" v2=\"2\" degree=\"2\" start_weight=\"2\">\n\
             <inner_point x=\"0.5\" y=\"1.5\" weight=\"1\"/>\n\
             </nurbs>\n\
             </curves>\n",
        )
        .unwrap();

        // stored from vertex 2 to vertex 3, so the weight of vertex 3 comes last
        match &mesh.edge_between(2, 3).unwrap().curve {
            Some(Curve::Nurbs(nurbs)) => assert_eq!(nurbs.end_weights(), [1.0, 2.0]),
            other => panic!("expected a NURBS curve, found {:?}", other),
        }
    }

    #[test]
    fn errors_point_into_attributes() {
        match square_with("<edges> <edge v1=\"0\" v2=\"1\" marker=\"0\"/> </edges>\n") {
            Err(ParseError::Invalid { pos, source }) => {
                assert_eq!(pos, Position::new(6, 9));
                assert_eq!(source, BuildError::InvalidBoundaryMarker(Marker::Integer(0)));
            }
            other => panic!("expected an invalid marker error, found {:?}", other),
        }

        match square_with("<edges> <edge v1=\"0\" v2=\"1 + b\" marker=\"1\"/> </edges>\n") {
            Err(ParseError::Resolve(ResolveError::Name { pos, name })) => {
                assert_eq!(pos, Position::new(6, 30));
                assert_eq!(name, "b");
            }
            other => panic!("expected a name error, found {:?}", other),
        }

        let err = square_with("<edges> <edge v1=\"0\" marker=\"1\"/> </edges>\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
        assert_eq!(err.position(), Some(Position::new(6, 9)));

        let err = square_with("<knot value=\"0.5\"/>\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));

        let err = parse_xml_str("<mesh><vertices></mesh>").unwrap_err();
        assert!(matches!(err, ParseError::Xml { .. }));

        let err = parse_xml_str("<mesh></mesh>").unwrap_err();
        assert!(matches!(
            err,
            ParseError::Invalid {
                source: BuildError::NoElements,
                ..
            }
        ));
    }

    #[test]
    fn attribute_value_offsets() {
        let raw = "<edge v1=\"0\" v2 = '12' mv2=\"3\"/>";
        assert_eq!(value_offset(raw, "v1"), Some(10));
        assert_eq!(value_offset(raw, "v2"), Some(19));
        assert_eq!(value_offset(raw, "marker"), None);
    }
}
