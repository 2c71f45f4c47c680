//! Planar vector geometry values.
//!
//! The serialized form follows GeoJSON: `{"type": "Polygon", "coordinates": [...]}`
//! with coordinates written as `[x, y]` pairs and polygons as a list of rings
//! whose first ring is the exterior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A planar coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Coord {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Coord> for [f64; 2] {
    fn from(coord: Coord) -> Self {
        [coord.x, coord.y]
    }
}

impl From<(f64, f64)> for Coord {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// An ordered vertex sequence; also used for polygon rings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineString(pub Vec<Coord>);

impl LineString {
    pub fn new(coords: Vec<Coord>) -> Self {
        Self(coords)
    }

    pub fn coords(&self) -> &[Coord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<Coord> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Coord> {
        self.0.last().copied()
    }

    /// Consecutive vertex pairs.
    pub fn segments(&self) -> impl Iterator<Item = (Coord, Coord)> + '_ {
        self.0.windows(2).map(|pair| (pair[0], pair[1]))
    }
}

impl<T: Into<Coord>> FromIterator<T> for LineString {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// A polygon with one exterior ring and zero or more holes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<LineString>", into = "Vec<LineString>")]
pub struct Polygon {
    pub exterior: LineString,
    pub interiors: Vec<LineString>,
}

impl Polygon {
    pub fn new(exterior: LineString, interiors: Vec<LineString>) -> Self {
        Self {
            exterior,
            interiors,
        }
    }

    /// Exterior followed by interiors.
    pub fn rings(&self) -> impl Iterator<Item = &LineString> {
        std::iter::once(&self.exterior).chain(self.interiors.iter())
    }
}

impl From<Vec<LineString>> for Polygon {
    fn from(mut rings: Vec<LineString>) -> Self {
        if rings.is_empty() {
            return Self::default();
        }
        let exterior = rings.remove(0);
        Self {
            exterior,
            interiors: rings,
        }
    }
}

impl From<Polygon> for Vec<LineString> {
    fn from(polygon: Polygon) -> Self {
        let mut rings = Vec::with_capacity(1 + polygon.interiors.len());
        rings.push(polygon.exterior);
        rings.extend(polygon.interiors);
        rings
    }
}

/// Feature geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coord),
    MultiPoint(Vec<Coord>),
    LineString(LineString),
    MultiLineString(Vec<LineString>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Self::Point(_) | Self::MultiPoint(_) => GeometryType::Point,
            Self::LineString(_) | Self::MultiLineString(_) => GeometryType::Line,
            Self::Polygon(_) | Self::MultiPolygon(_) => GeometryType::Polygon,
        }
    }

    pub fn points(&self) -> Vec<Coord> {
        match self {
            Self::Point(point) => vec![*point],
            Self::MultiPoint(points) => points.clone(),
            _ => Vec::new(),
        }
    }

    pub fn lines(&self) -> Vec<&LineString> {
        match self {
            Self::LineString(line) => vec![line],
            Self::MultiLineString(lines) => lines.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn polygons(&self) -> Vec<&Polygon> {
        match self {
            Self::Polygon(polygon) => vec![polygon],
            Self::MultiPolygon(polygons) => polygons.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Every vertex of every part, in storage order.
    pub fn vertices(&self) -> Vec<Coord> {
        match self {
            Self::Point(point) => vec![*point],
            Self::MultiPoint(points) => points.clone(),
            Self::LineString(line) => line.0.clone(),
            Self::MultiLineString(lines) => lines.iter().flat_map(|l| l.0.iter().copied()).collect(),
            Self::Polygon(polygon) => polygon.rings().flat_map(|r| r.0.iter().copied()).collect(),
            Self::MultiPolygon(polygons) => polygons
                .iter()
                .flat_map(|p| p.rings().flat_map(|r| r.0.iter().copied()))
                .collect(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices().len()
    }
}

/// Geometry family of a layer or feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Point,
    Line,
    Polygon,
}

impl GeometryType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Line => "line",
            Self::Polygon => "polygon",
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GeometryType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "point" | "multipoint" | "점" => Ok(Self::Point),
            "line" | "linestring" | "multilinestring" | "선" => Ok(Self::Line),
            "polygon" | "multipolygon" | "면" => Ok(Self::Polygon),
            _ => Err(ModelError::UnknownGeometryType(s.to_string())),
        }
    }
}
