//! Embedded geometry fields in installation records
//!
//! `Geo Point` is `"lat, lon"` text; `Geo Shape` is a GeoJSON Polygon or
//! MultiPolygon. Both are parsed into structured columns instead of being
//! carried as opaque strings.

use arrow::array::{ArrayRef, FixedSizeListBuilder, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field};
use serde::Deserialize;
use std::sync::Arc;

/// Kind of a parsed shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    /// Single polygon (outer ring plus holes)
    Polygon,
    /// Several polygons; rings flattened in order
    MultiPolygon,
}

impl GeometryKind {
    /// GeoJSON type name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "Polygon",
            Self::MultiPolygon => "MultiPolygon",
        }
    }
}

/// A parsed installation footprint: rings of `[lon, lat]` vertices
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// Source geometry type
    pub kind: GeometryKind,
    /// Rings in document order
    pub rings: Vec<Vec<[f64; 2]>>,
}

impl Geometry {
    /// Total vertex count across rings
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.rings.iter().map(Vec::len).sum()
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

fn ring(points: Vec<Vec<f64>>) -> Option<Vec<[f64; 2]>> {
    points
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Some([*x, *y]),
            _ => None,
        })
        .collect()
}

/// Parse `"lat, lon"`; `None` unless both parts are finite numbers
#[must_use]
pub fn parse_geo_point(value: &str) -> Option<(f64, f64)> {
    let (lat, lon) = value.split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lon = lon.trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((lat, lon))
}

/// Parse a GeoJSON Polygon / MultiPolygon; `None` for anything else
#[must_use]
pub fn parse_geo_shape(value: &str) -> Option<Geometry> {
    match serde_json::from_str::<GeoJson>(value).ok()? {
        GeoJson::Polygon { coordinates } => Some(Geometry {
            kind: GeometryKind::Polygon,
            rings: coordinates.into_iter().map(ring).collect::<Option<_>>()?,
        }),
        GeoJson::MultiPolygon { coordinates } => Some(Geometry {
            kind: GeometryKind::MultiPolygon,
            rings: coordinates
                .into_iter()
                .flatten()
                .map(ring)
                .collect::<Option<_>>()?,
        }),
    }
}

/// Arrow type of the `shape_rings` column: `List<List<FixedSizeList<Float64, 2>>>`
#[must_use]
pub fn rings_data_type() -> DataType {
    let point = DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float64, true)), 2);
    let ring = DataType::List(Arc::new(Field::new("item", point, true)));
    DataType::List(Arc::new(Field::new("item", ring, true)))
}

/// Column builder for `shape_rings`
pub struct RingsBuilder {
    inner: ListBuilder<ListBuilder<FixedSizeListBuilder<Float64Builder>>>,
}

impl RingsBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: ListBuilder::new(ListBuilder::new(FixedSizeListBuilder::new(
                Float64Builder::new(),
                2,
            ))),
        }
    }

    /// Append one row (null when `geometry` is `None`)
    pub fn append(&mut self, geometry: Option<&Geometry>) {
        let Some(geometry) = geometry else {
            self.inner.append_null();
            return;
        };
        let rings = self.inner.values();
        for ring in &geometry.rings {
            let points = rings.values();
            for [x, y] in ring {
                points.values().append_value(*x);
                points.values().append_value(*y);
                points.append(true);
            }
            rings.append(true);
        }
        self.inner.append(true);
    }

    /// Finish into an array
    pub fn finish(&mut self) -> ArrayRef {
        Arc::new(self.inner.finish())
    }
}

impl Default for RingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
