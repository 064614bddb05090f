use super::{
    apply_refinements,
    builder::MeshBuilder,
    resolver::{resolve, Bindings, Value},
    AtPosition, ParseError, RefinementEntry,
};
use crate::mesh::{space::Point, Mesh};
use tracing::debug;

/// Parse a Mesh from the native format
///
/// The file is a list of bindings (see [`resolve`]). The mandatory sections are:
/// ```text
/// vertices = [[x, y], ...]                   # vertex N is the Nth entry
/// elements = [[v1, v2, v3, marker], [v1, v2, v3, v4, marker], ...]
/// boundaries = [[v1, v2, marker], ...]
/// ```
/// and the optional sections are:
/// ```text
/// curves = [[v1, v2, angle], [v1, v2, degree, [[x, y, weight], ...], [knot, ...], [w1, w2]], ...]
/// refinements = [[element_id, mode], ...]    # mode 0: uniform, 1: horizontal, 2: vertical
/// ```
/// The knots and the end point weights (`w1`, `w2`) of a NURBS curve may be omitted; end weights default to 1.
/// Any other binding is treated as a helper variable.
pub fn parse_native_str(source: &str) -> Result<Mesh, ParseError> {
    let bindings = resolve(source)?;
    let mut builder = MeshBuilder::new();

    for vertex in section(&bindings, "vertices")?.as_list()? {
        let [x, y] = fixed_entry::<2>(vertex, "vertex entries must be [x, y]")?;
        builder
            .push_vertex(Point::new(x.as_number()?, y.as_number()?))
            .at(vertex.pos)?;
    }

    for element in section(&bindings, "elements")?.as_list()? {
        let (marker, vertices) = element.as_list()?.split_last().ok_or_else(|| {
            ParseError::syntax(element.pos, "element entries must be [v1, v2, v3, (v4,) marker]")
        })?;
        let vertices = vertices
            .iter()
            .map(|v| v.as_index())
            .collect::<Result<Vec<_>, _>>()?;
        builder
            .add_element(&vertices, marker.as_marker()?)
            .at(element.pos)?;
    }

    for boundary in section(&bindings, "boundaries")?.as_list()? {
        let [v1, v2, marker] =
            fixed_entry::<3>(boundary, "boundary entries must be [v1, v2, marker]")?;
        builder
            .add_boundary(v1.as_index()?, v2.as_index()?, marker.as_marker()?)
            .at(boundary.pos)?;
    }

    if let Some(curves) = bindings.get("curves") {
        for curve in curves.as_list()? {
            parse_curve(&mut builder, curve)?;
        }
    }

    let mut mesh = builder.build().at(bindings.end())?;

    if let Some(refinements) = bindings.get("refinements") {
        let entries = refinements
            .as_list()?
            .iter()
            .map(|entry| -> Result<RefinementEntry, ParseError> {
                let [elem_id, mode] = fixed_entry::<2>(
                    entry,
                    "refinement entries must be [element_id, refinement_type]",
                )?;
                Ok(RefinementEntry {
                    pos: entry.pos,
                    elem_id: elem_id.as_index()?,
                    mode: mode.as_integer()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!("replaying {} refinements", entries.len());
        apply_refinements(&mut mesh, &entries)?;
    }

    Ok(mesh)
}

fn section<'b>(bindings: &'b Bindings, name: &str) -> Result<&'b Value, ParseError> {
    bindings.get(name).ok_or_else(|| {
        ParseError::syntax(
            bindings.end(),
            format!("missing mandatory section \"{}\"", name),
        )
    })
}

fn fixed_entry<'v, const N: usize>(
    value: &'v Value,
    message: &str,
) -> Result<&'v [Value; N], ParseError> {
    value
        .as_list()?
        .try_into()
        .map_err(|_| ParseError::syntax(value.pos, message))
}

fn parse_curve(builder: &mut MeshBuilder, curve: &Value) -> Result<(), ParseError> {
    match curve.as_list()? {
        [v1, v2, angle] => builder
            .add_arc(v1.as_index()?, v2.as_index()?, angle.as_number()?)
            .at(curve.pos),
        [v1, v2, degree, points, rest @ ..] if rest.len() <= 2 => {
            let inner_points = points
                .as_list()?
                .iter()
                .map(|point| -> Result<[f64; 3], ParseError> {
                    let [x, y, w] =
                        fixed_entry::<3>(point, "NURBS control points must be [x, y, weight]")?;
                    Ok([x.as_number()?, y.as_number()?, w.as_number()?])
                })
                .collect::<Result<Vec<_>, _>>()?;

            let inner_knots = match rest.first() {
                Some(knots) => knots
                    .as_list()?
                    .iter()
                    .map(|knot| knot.as_number())
                    .collect::<Result<Vec<_>, _>>()?,
                None => Vec::new(),
            };

            let end_weights = match rest.get(1) {
                Some(weights) => {
                    let [start, end] =
                        fixed_entry::<2>(weights, "NURBS end weights must be [start, end]")?;
                    [start.as_number()?, end.as_number()?]
                }
                None => [1.0, 1.0],
            };

            builder
                .add_nurbs(
                    v1.as_index()?,
                    v2.as_index()?,
                    degree.as_index()?,
                    &inner_points,
                    &inner_knots,
                    end_weights,
                )
                .at(curve.pos)
        }
        _ => Err(ParseError::syntax(
            curve.pos,
            "curve entries must be [v1, v2, angle] or [v1, v2, degree, [control points], ([knots]), ([end weights])]",
        )),
    }
}
