use super::space::Point;
use nalgebra::Vector3;
use thiserror::Error;

/// Number of chords used to integrate along a NURBS curve when computing areas
pub const NURBS_AREA_SAMPLES: usize = 1024;

/// Curvature attached to an [`Edge`](super::edge::Edge)
///
/// A curve always runs from the first to the second vertex of the edge it is attached to.
/// Elements that traverse the edge the other way use [`Curve::reversed`].
#[derive(Clone, Debug, PartialEq)]
pub enum Curve {
    /// Circular arc with a central angle in degrees.
    ///
    /// Positive angles sweep counter-clockwise around the arc's centre, so the arc bulges to the
    /// right of the chord when walking from the first vertex to the second.
    Arc { angle: f64 },
    /// General rational B-spline
    Nurbs(Nurbs),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CurveError {
    #[error("arc angle must be non-zero and strictly between -360 and 360 degrees (found {0})")]
    InvalidArcAngle(f64),
    #[error("NURBS degree must be at least 1")]
    DegreeTooLow,
    #[error("NURBS of degree {degree} needs at least {} control points (found {found})", degree + 1)]
    TooFewControlPoints { degree: usize, found: usize },
    #[error("NURBS knot vector should have {expected} entries (found {found})")]
    KnotCount { expected: usize, found: usize },
    #[error("NURBS knots must be non-decreasing and lie within [0, 1]")]
    InvalidKnots,
    #[error("NURBS weights must be positive")]
    NonPositiveWeight,
}

impl Curve {
    /// Construct a circular arc, validating its angle
    pub fn arc(angle: f64) -> Result<Self, CurveError> {
        if angle == 0.0 || !angle.is_finite() || angle.abs() >= 360.0 {
            Err(CurveError::InvalidArcAngle(angle))
        } else {
            Ok(Self::Arc { angle })
        }
    }

    /// Point on the curve at parameter `t` in `[0, 1]` where `a` and `b` are the curve's end points
    pub fn point_at(&self, a: &Point, b: &Point, t: f64) -> Point {
        match self {
            Self::Arc { angle } => ArcGeometry::new(a, b, *angle).point_at(t),
            Self::Nurbs(nurbs) => nurbs.point_at(t),
        }
    }

    /// Point on the curve halfway through its parameter range
    pub fn midpoint(&self, a: &Point, b: &Point) -> Point {
        self.point_at(a, b, 0.5)
    }

    /// Subdivide the curve at its parametric midpoint.
    ///
    /// Arcs are halved. NURBS are split by knot insertion, and both halves are re-parameterized over `[0, 1]`.
    pub fn split(&self) -> (Self, Self) {
        match self {
            Self::Arc { angle } => (
                Self::Arc { angle: angle / 2.0 },
                Self::Arc { angle: angle / 2.0 },
            ),
            Self::Nurbs(nurbs) => {
                let (first, second) = nurbs.split();
                (Self::Nurbs(first), Self::Nurbs(second))
            }
        }
    }

    /// The same geometric curve traversed in the opposite direction
    pub fn reversed(&self) -> Self {
        match self {
            Self::Arc { angle } => Self::Arc { angle: -angle },
            Self::Nurbs(nurbs) => Self::Nurbs(nurbs.reversed()),
        }
    }

    /// Line integral `½∫(x dy - y dx)` along the curve from `a` to `b`
    ///
    /// Summed over the edges of a closed counter-clockwise loop, these terms yield the enclosed area.
    pub fn area_term(&self, a: &Point, b: &Point) -> f64 {
        match self {
            Self::Arc { angle } => ArcGeometry::new(a, b, *angle).area_term(),
            Self::Nurbs(nurbs) => nurbs.area_term(),
        }
    }
}

/// Line integral `½∫(x dy - y dx)` along the straight segment from `a` to `b`
pub fn straight_area_term(a: &Point, b: &Point) -> f64 {
    a.cross(b) / 2.0
}

struct ArcGeometry {
    center: Point,
    radius: f64,
    start: f64,
    sweep: f64,
}

impl ArcGeometry {
    fn new(a: &Point, b: &Point, angle: f64) -> Self {
        let sweep = angle.to_radians();
        let chord = *b - *a;
        let chord_length = chord.x.hypot(chord.y);
        let half_sweep = sweep.abs() / 2.0;

        let radius = chord_length / (2.0 * half_sweep.sin());
        let center_offset = radius * half_sweep.cos() * sweep.signum();
        let left_normal = Point::new(-chord.y, chord.x) / chord_length;
        let center = Point::between(a, b) + left_normal * center_offset;

        Self {
            center,
            radius,
            start: (a.y - center.y).atan2(a.x - center.x),
            sweep,
        }
    }

    fn point_at(&self, t: f64) -> Point {
        let phi = self.start + t * self.sweep;
        Point::new(
            self.center.x + self.radius * phi.cos(),
            self.center.y + self.radius * phi.sin(),
        )
    }

    fn area_term(&self) -> f64 {
        let [phi_0, phi_1] = [self.start, self.start + self.sweep];
        let r = self.radius;
        0.5 * (r * (self.center.x * (phi_1.sin() - phi_0.sin())
            - self.center.y * (phi_1.cos() - phi_0.cos()))
            + r * r * self.sweep)
    }
}

/// Non-Uniform Rational B-Spline
///
/// `control_points` hold `[x, y, weight]` and include both end points of the curve.
/// `knots` is the full clamped knot vector.
#[derive(Clone, Debug, PartialEq)]
pub struct Nurbs {
    pub degree: usize,
    pub control_points: Vec<[f64; 3]>,
    pub knots: Vec<f64>,
}

impl Nurbs {
    /// Construct a NURBS curve from its full control polygon and knot vector
    pub fn new(
        degree: usize,
        control_points: Vec<[f64; 3]>,
        knots: Vec<f64>,
    ) -> Result<Self, CurveError> {
        if degree == 0 {
            return Err(CurveError::DegreeTooLow);
        }
        if control_points.len() < degree + 1 {
            return Err(CurveError::TooFewControlPoints {
                degree,
                found: control_points.len(),
            });
        }
        if knots.len() != control_points.len() + degree + 1 {
            return Err(CurveError::KnotCount {
                expected: control_points.len() + degree + 1,
                found: knots.len(),
            });
        }
        if knots.windows(2).any(|pair| pair[1] < pair[0])
            || knots.iter().any(|k| !(0.0..=1.0).contains(k))
            || knots[degree] >= knots[knots.len() - degree - 1]
        {
            return Err(CurveError::InvalidKnots);
        }
        if control_points.iter().any(|[_, _, w]| *w <= 0.0) {
            return Err(CurveError::NonPositiveWeight);
        }

        Ok(Self {
            degree,
            control_points,
            knots,
        })
    }

    /// Construct a clamped NURBS curve between two vertices from its inner control points and inner knots
    ///
    /// The end points get unit weights, and `degree + 1` copies of 0 and 1 are added to either end of the knot vector.
    pub fn from_inner(
        degree: usize,
        start: &Point,
        end: &Point,
        inner_points: &[[f64; 3]],
        inner_knots: &[f64],
    ) -> Result<Self, CurveError> {
        let mut control_points = Vec::with_capacity(inner_points.len() + 2);
        control_points.push([start.x, start.y, 1.0]);
        control_points.extend_from_slice(inner_points);
        control_points.push([end.x, end.y, 1.0]);

        let mut knots = vec![0.0; degree + 1];
        knots.extend_from_slice(inner_knots);
        knots.extend(std::iter::repeat(1.0).take(degree + 1));

        Self::new(degree, control_points, knots)
    }

    /// Replace the weights of the two end points
    ///
    /// Halves of a split rational curve generally have non-unit end weights; these are needed to reproduce them exactly.
    pub fn with_end_weights(mut self, [start, end]: [f64; 2]) -> Result<Self, CurveError> {
        if start <= 0.0 || end <= 0.0 || !start.is_finite() || !end.is_finite() {
            return Err(CurveError::NonPositiveWeight);
        }
        let last = self.control_points.len() - 1;
        self.control_points[0][2] = start;
        self.control_points[last][2] = end;
        Ok(self)
    }

    /// Weights of the first and last control points
    pub fn end_weights(&self) -> [f64; 2] {
        let last = self.control_points.len() - 1;
        [self.control_points[0][2], self.control_points[last][2]]
    }

    /// Control points strictly between the two end points
    pub fn inner_points(&self) -> &[[f64; 3]] {
        &self.control_points[1..self.control_points.len() - 1]
    }

    /// Knots strictly between the clamped ends of the knot vector
    pub fn inner_knots(&self) -> &[f64] {
        &self.knots[self.degree + 1..self.knots.len() - self.degree - 1]
    }

    fn domain(&self) -> [f64; 2] {
        [
            self.knots[self.degree],
            self.knots[self.knots.len() - self.degree - 1],
        ]
    }

    fn homogeneous(&self) -> Vec<Vector3<f64>> {
        self.control_points
            .iter()
            .map(|[x, y, w]| Vector3::new(x * w, y * w, *w))
            .collect()
    }

    fn from_homogeneous(degree: usize, points: &[Vector3<f64>], knots: Vec<f64>) -> Self {
        Self {
            degree,
            control_points: points.iter().map(|p| [p.x / p.z, p.y / p.z, p.z]).collect(),
            knots,
        }
    }

    // index k such that knots[k] <= t < knots[k + 1], clamped to the last non-empty span
    fn find_span(&self, t: f64) -> usize {
        let last = self.control_points.len() - 1;
        if t >= self.knots[last + 1] {
            return last;
        }
        (self.degree..=last)
            .rev()
            .find(|k| self.knots[*k] <= t)
            .unwrap_or(self.degree)
    }

    /// Evaluate the curve at parameter `t` in `[0, 1]` (relative to its domain) using de Boor's algorithm
    pub fn point_at(&self, t: f64) -> Point {
        let [start, end] = self.domain();
        let u = start + t.clamp(0.0, 1.0) * (end - start);

        let p = self.degree;
        let k = self.find_span(u);
        let weighted = self.homogeneous();

        let mut d: Vec<Vector3<f64>> = (0..=p).map(|j| weighted[j + k - p]).collect();
        for r in 1..=p {
            for j in (r..=p).rev() {
                let left = self.knots[j + k - p];
                let right = self.knots[j + 1 + k - r];
                let alpha = if right > left {
                    (u - left) / (right - left)
                } else {
                    0.0
                };
                d[j] = d[j - 1] * (1.0 - alpha) + d[j] * alpha;
            }
        }

        Point::new(d[p].x / d[p].z, d[p].y / d[p].z)
    }

    // Boehm's algorithm: insert `u` into the knot vector once without changing the curve
    fn insert_knot(&self, u: f64) -> Self {
        let p = self.degree;
        let k = self.find_span(u);
        let weighted = self.homogeneous();

        let mut inserted = Vec::with_capacity(weighted.len() + 1);
        for i in 0..=weighted.len() {
            if i + p <= k {
                inserted.push(weighted[i]);
            } else if i <= k {
                let alpha = (u - self.knots[i]) / (self.knots[i + p] - self.knots[i]);
                inserted.push(weighted[i - 1] * (1.0 - alpha) + weighted[i] * alpha);
            } else {
                inserted.push(weighted[i - 1]);
            }
        }

        let mut knots = self.knots.clone();
        knots.insert(k + 1, u);

        Self::from_homogeneous(p, &inserted, knots)
    }

    /// Split the curve at the middle of its domain
    pub fn split(&self) -> (Self, Self) {
        let [start, end] = self.domain();
        let u = (start + end) / 2.0;
        let p = self.degree;

        let multiplicity = self.knots.iter().filter(|k| **k == u).count();
        let mut refined = self.clone();
        for _ in multiplicity..p {
            refined = refined.insert_knot(u);
        }

        let num_below = refined.knots.iter().filter(|k| **k < u).count();
        let num_above = refined.knots.iter().filter(|k| **k > u).count();

        let mut first_knots = refined.knots[..num_below].to_vec();
        first_knots.extend(std::iter::repeat(u).take(p + 1));
        let mut second_knots = vec![u; p + 1];
        second_knots.extend_from_slice(&refined.knots[refined.knots.len() - num_above..]);

        let num_points = refined.control_points.len();
        let first = Self {
            degree: p,
            control_points: refined.control_points[..num_below].to_vec(),
            knots: normalized(first_knots),
        };
        let second = Self {
            degree: p,
            control_points: refined.control_points[num_points - num_above..].to_vec(),
            knots: normalized(second_knots),
        };

        (first, second)
    }

    /// The same curve traversed from its last control point to its first
    pub fn reversed(&self) -> Self {
        let [lo, hi] = [self.knots[0], self.knots[self.knots.len() - 1]];
        Self {
            degree: self.degree,
            control_points: self.control_points.iter().rev().copied().collect(),
            knots: self.knots.iter().rev().map(|k| lo + hi - k).collect(),
        }
    }

    fn area_term(&self) -> f64 {
        let samples: Vec<Point> = (0..=NURBS_AREA_SAMPLES)
            .map(|i| self.point_at(i as f64 / NURBS_AREA_SAMPLES as f64))
            .collect();

        samples
            .windows(2)
            .map(|pair| straight_area_term(&pair[0], &pair[1]))
            .sum()
    }
}

fn normalized(knots: Vec<f64>) -> Vec<f64> {
    let [lo, hi] = [knots[0], knots[knots.len() - 1]];
    knots.iter().map(|k| (k - lo) / (hi - lo)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4};

    fn quarter_circle_nurbs() -> Nurbs {
        Nurbs::from_inner(
            2,
            &Point::new(1.0, 0.0),
            &Point::new(0.0, 1.0),
            &[[1.0, 1.0, FRAC_1_SQRT_2]],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn arc_midpoint_on_circle() {
        let [a, b] = [Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        let mid = Curve::arc(90.0).unwrap().midpoint(&a, &b);
        assert_relative_eq!(mid.x, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(mid.y, FRAC_1_SQRT_2, epsilon = 1e-12);

        // negative angles bulge to the other side of the chord
        let mid_neg = Curve::arc(-90.0).unwrap().midpoint(&a, &b);
        assert_relative_eq!(mid_neg.x, 1.0 - FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(mid_neg.y, 1.0 - FRAC_1_SQRT_2, epsilon = 1e-12);
    }

    #[test]
    fn arc_area_terms() {
        let [a, b] = [Point::new(1.0, 0.0), Point::new(0.0, 1.0)];
        let arc = Curve::arc(90.0).unwrap();

        // the two straight radii through the origin contribute nothing
        assert_relative_eq!(arc.area_term(&a, &b), FRAC_PI_4, epsilon = 1e-12);
        assert_relative_eq!(
            arc.reversed().area_term(&b, &a),
            -FRAC_PI_4,
            epsilon = 1e-12
        );

        let mid = arc.midpoint(&a, &b);
        let (first, second) = arc.split();
        assert_eq!(first, Curve::Arc { angle: 45.0 });
        assert_relative_eq!(
            first.area_term(&a, &mid) + second.area_term(&mid, &b),
            FRAC_PI_4,
            epsilon = 1e-12
        );
    }

    #[test]
    fn invalid_arcs() {
        assert_eq!(Curve::arc(0.0), Err(CurveError::InvalidArcAngle(0.0)));
        assert!(Curve::arc(360.0).is_err());
        assert!(Curve::arc(-359.0).is_ok());
    }

    #[test]
    fn nurbs_quarter_circle_matches_arc() {
        let nurbs = quarter_circle_nurbs();
        let mid = nurbs.point_at(0.5);
        assert_relative_eq!(mid.x, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(mid.y, FRAC_1_SQRT_2, epsilon = 1e-12);

        let end = nurbs.point_at(1.0);
        assert_relative_eq!(end.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(end.y, 1.0, epsilon = 1e-12);

        assert_relative_eq!(nurbs.area_term(), FRAC_PI_4, epsilon = 1e-5);
    }

    #[test]
    fn nurbs_split_preserves_geometry() {
        let nurbs = quarter_circle_nurbs();
        let (first, second) = nurbs.split();

        assert_eq!(first.knots, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(second.knots, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);

        let mid = nurbs.point_at(0.5);
        for (p, q) in [
            (first.point_at(1.0), mid),
            (second.point_at(0.0), mid),
            (first.point_at(0.5), nurbs.point_at(0.25)),
            (second.point_at(0.5), nurbs.point_at(0.75)),
        ] {
            assert_relative_eq!(p.x, q.x, epsilon = 1e-12);
            assert_relative_eq!(p.y, q.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn nurbs_with_inner_knots_splits_at_existing_knot() {
        let nurbs = Nurbs::from_inner(
            2,
            &Point::new(0.0, 0.0),
            &Point::new(3.0, 0.0),
            &[[1.0, 1.0, 1.0], [2.0, 1.0, 2.0]],
            &[0.5],
        )
        .unwrap();

        let (first, second) = nurbs.split();
        // the point at the split parameter ends one half and starts the other
        assert_eq!(first.control_points.len() + second.control_points.len(), 6);
        for t in [0.1, 0.3, 0.45] {
            let p = first.point_at(t * 2.0);
            let q = nurbs.point_at(t);
            assert_relative_eq!(p.x, q.x, epsilon = 1e-12);
            assert_relative_eq!(p.y, q.y, epsilon = 1e-12);
        }
    }

    #[test]
    fn split_halves_keep_their_end_weights() {
        let (first, second) = quarter_circle_nurbs().split();
        let [_, first_end] = first.end_weights();
        assert!((first_end - 1.0).abs() > 1e-3);

        // rebuilding a half from its inner data only reproduces it with the end weights restored
        let [a, b] = [first.point_at(0.0), first.point_at(1.0)];
        let rebuilt = Nurbs::from_inner(2, &a, &b, first.inner_points(), first.inner_knots()).unwrap();
        assert!(rebuilt.point_at(0.5).dist(&first.point_at(0.5)) > 1e-6);

        let restored = rebuilt.with_end_weights(first.end_weights()).unwrap();
        for t in [0.2, 0.5, 0.9] {
            assert_relative_eq!(restored.point_at(t).x, first.point_at(t).x, epsilon = 1e-12);
            assert_relative_eq!(restored.point_at(t).y, first.point_at(t).y, epsilon = 1e-12);
        }
        assert_eq!(second.end_weights()[1], 1.0);

        assert_eq!(
            quarter_circle_nurbs().with_end_weights([0.0, 1.0]),
            Err(CurveError::NonPositiveWeight)
        );
    }

    #[test]
    fn nurbs_reversal() {
        let nurbs = quarter_circle_nurbs();
        let reversed = nurbs.reversed();
        let p = reversed.point_at(0.25);
        let q = nurbs.point_at(0.75);
        assert_relative_eq!(p.x, q.x, epsilon = 1e-12);
        assert_relative_eq!(p.y, q.y, epsilon = 1e-12);
        assert_relative_eq!(reversed.area_term(), -nurbs.area_term(), epsilon = 1e-12);
    }

    #[test]
    fn invalid_nurbs() {
        let [a, b] = [Point::new(0.0, 0.0), Point::new(1.0, 0.0)];
        assert_eq!(
            Nurbs::from_inner(0, &a, &b, &[], &[]),
            Err(CurveError::DegreeTooLow)
        );
        assert_eq!(
            Nurbs::from_inner(2, &a, &b, &[[0.5, 0.5, 1.0]], &[0.5]),
            Err(CurveError::KnotCount {
                expected: 6,
                found: 7
            })
        );
        assert_eq!(
            Nurbs::from_inner(2, &a, &b, &[[0.5, 0.5, -1.0]], &[]),
            Err(CurveError::NonPositiveWeight)
        );
    }
}
