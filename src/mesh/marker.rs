use std::collections::HashMap;
use std::fmt;

/// The name of a material region or boundary condition
///
/// Mesh files may name markers with either integers or strings. Both kinds are interned by a
/// [`MarkerTable`] so the rest of the mesh only deals with dense [`MarkerId`]s.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Marker {
    Integer(i64),
    Name(String),
}

impl Marker {
    /// Markers on boundary edges must be positive integers or names
    pub fn is_valid_boundary_marker(&self) -> bool {
        match self {
            Self::Integer(value) => *value > 0,
            Self::Name(_) => true,
        }
    }

    /// Markers on elements must be non-negative integers or names
    pub fn is_valid_element_marker(&self) -> bool {
        match self {
            Self::Integer(value) => *value >= 0,
            Self::Name(_) => true,
        }
    }
}

impl From<i64> for Marker {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Marker {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<&str> for Marker {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Marker {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Dense internal id of an interned [`Marker`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub usize);

/// Injective mapping between [`Marker`]s and [`MarkerId`]s
///
/// Ids are handed out in the order markers are first seen.
#[derive(Clone, Debug, Default)]
pub struct MarkerTable {
    markers: Vec<Marker>,
    ids: HashMap<Marker, MarkerId>,
}

impl MarkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id of `marker`, allocating a new one if it hasn't been seen before
    pub fn intern(&mut self, marker: Marker) -> MarkerId {
        if let Some(id) = self.ids.get(&marker) {
            return *id;
        }

        let id = MarkerId(self.markers.len());
        self.markers.push(marker.clone());
        self.ids.insert(marker, id);
        id
    }

    pub fn id_of(&self, marker: &Marker) -> Option<MarkerId> {
        self.ids.get(marker).copied()
    }

    /// Look up the marker behind an id. Returns `None` for ids that were not handed out by this table.
    pub fn marker(&self, id: MarkerId) -> Option<&Marker> {
        self.markers.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Iterate over all `(id, marker)` pairs in id order
    pub fn iter(&self) -> impl Iterator<Item = (MarkerId, &Marker)> + '_ {
        self.markers
            .iter()
            .enumerate()
            .map(|(idx, marker)| (MarkerId(idx), marker))
    }
}
