use crate::frame::CoordinateFrame;
use geo::{MultiPolygon, Point};

/// Ordered key/value payload carried through the join untouched.
pub type Attributes = Vec<(String, String)>;

/// An areal unit of analysis, e.g. a census tract keyed by GEOID.
#[derive(Debug, Clone)]
pub struct ReferenceUnit {
    pub id: String,
    pub boundary: MultiPolygon<f64>,
    pub attributes: Attributes,
}

/// A reference unit after normalization. The centroid is derived from the
/// boundary once and the two are only ever produced together.
#[derive(Debug, Clone)]
pub struct NormalizedUnit {
    id: String,
    boundary: MultiPolygon<f64>,
    centroid: Point<f64>,
    attributes: Attributes,
}

impl NormalizedUnit {
    pub(crate) fn new(
        id: String,
        boundary: MultiPolygon<f64>,
        centroid: Point<f64>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id,
            boundary,
            centroid,
            attributes,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn boundary(&self) -> &MultiPolygon<f64> {
        &self.boundary
    }

    pub fn centroid(&self) -> Point<f64> {
        self.centroid
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A point of interest. `id` is the stable identifier used for tie-breaks.
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    pub id: String,
    pub location: Point<f64>,
    pub attributes: Attributes,
}

/// Records that all share one coordinate frame.
#[derive(Debug, Clone)]
pub struct Layer<T> {
    pub frame: CoordinateFrame,
    pub records: Vec<T>,
}

impl<T> Layer<T> {
    pub fn new(frame: CoordinateFrame, records: Vec<T>) -> Self {
        Self { frame, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One joined row: a unit plus the facility nearest to its centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub unit_id: String,
    pub unit_attributes: Attributes,
    pub centroid: Point<f64>,
    pub facility_id: String,
    pub facility_location: Point<f64>,
    pub facility_attributes: Attributes,
    /// In the units of the shared projected frame.
    pub distance: f64,
}
