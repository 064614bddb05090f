use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Div, Mul, Sub};

#[cfg(feature = "json_export")]
use json::{object, JsonValue};

/// Points closer together than this (in either coordinate) are considered to be at the same location
pub const POINT_UNIQUENESS_ACCURACY: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
/// Point in 2D Space
pub struct Point {
    pub x: f64,
    pub y: f64,
    x_cmp: FloatRep,
    y_cmp: FloatRep,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            x_cmp: FloatRep::from(x),
            y_cmp: FloatRep::from(y),
        }
    }

    pub fn from([x, y]: [f64; 2]) -> Self {
        Self::new(x, y)
    }

    /// The point halfway between `a` and `b`
    pub fn between(a: &Self, b: &Self) -> Self {
        Self::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
    }

    pub fn dist(&self, other: &Self) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// z-component of the cross product `self × other` (treating both as vectors from the origin)
    pub fn cross(&self, other: &Self) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Signed turn at `b` when walking `a -> b -> c`. Positive for a left (counter-clockwise) turn.
    pub fn turn(a: &Self, b: &Self, c: &Self) -> f64 {
        (*b - *a).cross(&(*c - *b))
    }

    pub fn as_array(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Point {
    type Output = Self;

    fn mul(self, coefficient: f64) -> Self {
        Self::new(self.x * coefficient, self.y * coefficient)
    }
}

impl Div<f64> for Point {
    type Output = Self;

    fn div(self, divis: f64) -> Self {
        Self::new(self.x / divis, self.y / divis)
    }
}

impl Hash for Point {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.x_cmp.hash(state);
        self.y_cmp.hash(state);
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.x_cmp.eq(&other.x_cmp) && self.y_cmp.eq(&other.y_cmp)
    }
}

impl Eq for Point {}

impl Ord for Point {
    fn cmp(&self, other: &Self) -> Ordering {
        self.x_cmp
            .cmp(&other.x_cmp)
            .then_with(|| self.y_cmp.cmp(&other.y_cmp))
    }
}

impl PartialOrd for Point {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(feature = "json_export")]
impl From<Point> for JsonValue {
    fn from(point: Point) -> Self {
        object! {
            "x": point.x,
            "y": point.y,
        }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(x: {:.10}, y: {:.10})", self.x, self.y)
    }
}

#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
struct FloatRep {
    sign: bool,
    bits: u64,
}

impl FloatRep {
    pub fn from(value: f64) -> Self {
        let integer_part = value.abs().trunc();
        let fractional_rounded =
            (value.abs().fract() / POINT_UNIQUENESS_ACCURACY).round() * POINT_UNIQUENESS_ACCURACY;
        let total_rounded = integer_part + fractional_rounded;

        Self {
            // -0.0 and 0.0 must compare equal
            sign: value.is_sign_positive() || total_rounded == 0.0,
            bits: total_rounded.to_bits(),
        }
    }
}

impl Ord for FloatRep {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.sign, other.sign) {
            (true, true) => self.bits.cmp(&other.bits),
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, false) => self.bits.cmp(&other.bits).reverse(),
        }
    }
}

impl PartialOrd for FloatRep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
