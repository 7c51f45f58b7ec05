//! Vector data structures
//!
//! - [`Feature`]: multi-polygon geometry + attributes + run-scoped identity
//! - [`FeatureCollection`]: ordered collection of features
//! - [`AttributeValue`]: opaque property values carried through unchanged

use geo_types::{LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Attribute value types
///
/// Untagged so that arbitrary JSON property values round-trip as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// Property bag of a feature, ordered by key
pub type Properties = BTreeMap<String, AttributeValue>;

/// Identity of a feature within one run.
///
/// Assigned in input order at load time; merge results always receive an id
/// greater than every id handed out before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureId(pub u64);

impl FeatureId {
    pub fn next(self) -> FeatureId {
        FeatureId(self.0 + 1)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a feature during a merge run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureStatus {
    /// Present in the store and the spatial index
    #[default]
    Active,
    /// Consumed as an input of a successful union
    Merged,
    /// Permanently excluded: no partner, or the union failed
    Orphan,
}

/// A region with multi-polygon geometry and attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Run-scoped identity, `None` until a store assigns one
    pub id: Option<FeatureId>,
    /// Feature geometry (lon/lat degrees)
    pub geometry: MultiPolygon<f64>,
    /// Feature attributes
    pub properties: Properties,
}

impl Feature {
    /// Create a new feature with geometry and no attributes
    pub fn new(geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Self {
            id: None,
            geometry: geometry.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_id(mut self, id: FeatureId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set an attribute
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Get an attribute
    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }

    /// Human-readable label: `name`, then `name_en`, then `fallback`.
    pub fn label(&self, fallback: impl fmt::Display) -> String {
        label_of(&self.properties, fallback)
    }
}

/// Label rule shared by features and stored records.
pub fn label_of(properties: &Properties, fallback: impl fmt::Display) -> String {
    ["name", "name_en"]
        .iter()
        .filter_map(|key| properties.get(*key).and_then(AttributeValue::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Collection of features
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self { features: Vec::new() }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Check every feature for structurally sound lon/lat polygon geometry.
    ///
    /// Rejects empty geometries, rings with fewer than four positions,
    /// non-finite coordinates and coordinates outside the lon/lat domain. The first offending feature is reported by index.
    pub fn validate(&self) -> Result<()> {
        for (index, feature) in self.features.iter().enumerate() {
            validate_geometry(&feature.geometry).map_err(|reason| Error::geometry(index, reason))?;
        }
        Ok(())
    }
}

fn validate_geometry(geometry: &MultiPolygon<f64>) -> std::result::Result<(), String> {
    if geometry.0.is_empty() {
        return Err("geometry has no polygons".into());
    }
    for (p, polygon) in geometry.0.iter().enumerate() {
        validate_polygon(polygon).map_err(|reason| format!("polygon {p}: {reason}"))?;
    }
    Ok(())
}

fn validate_polygon(polygon: &Polygon<f64>) -> std::result::Result<(), String> {
    validate_ring(polygon.exterior()).map_err(|reason| format!("exterior ring {reason}"))?;
    for (i, ring) in polygon.interiors().iter().enumerate() {
        validate_ring(ring).map_err(|reason| format!("interior ring {i} {reason}"))?;
    }
    Ok(())
}

fn validate_ring(ring: &LineString<f64>) -> std::result::Result<(), String> {
    let coords = &ring.0;
    if coords.len() < 4 {
        return Err(format!("has {} positions, need at least 4", coords.len()));
    }
    for c in coords {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(format!("has non-finite coordinate ({}, {})", c.x, c.y));
        }
        if !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y) {
            return Err(format!("has coordinate ({}, {}) outside lon/lat range", c.x, c.y));
        }
    }
    Ok(())
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::polygon;

    fn unit_square() -> Polygon<f64> {
        polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0), (x: 0.0, y: 0.0)]
    }

    #[test]
    fn test_polygon_becomes_multipolygon() {
        let f = Feature::new(unit_square());
        assert_eq!(f.geometry.0.len(), 1);
        assert!(f.id.is_none());
    }

    #[test]
    fn test_label_fallbacks() {
        let mut f = Feature::new(unit_square());
        assert_eq!(f.label(7), "7");

        f.set_property("name_en", "Bavaria");
        assert_eq!(f.label(7), "Bavaria");

        f.set_property("name", "Bayern");
        assert_eq!(f.label(7), "Bayern");
    }

    #[test]
    fn test_label_ignores_non_string_name() {
        let mut f = Feature::new(unit_square());
        f.set_property("name", 42i64);
        assert_eq!(f.label("x"), "x");
    }

    #[test]
    fn test_validate_accepts_square() {
        let fc: FeatureCollection = vec![Feature::new(unit_square())].into_iter().collect();
        assert!(fc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_short_ring() {
        let sliver = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 0.0)];
        let fc: FeatureCollection = vec![Feature::new(unit_square()), Feature::new(sliver)]
            .into_iter()
            .collect();

        match fc.validate() {
            Err(Error::InvalidGeometry { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected InvalidGeometry, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let far = polygon![(x: 200.0, y: 0.0), (x: 201.0, y: 0.0), (x: 201.0, y: 1.0), (x: 200.0, y: 0.0)];
        let fc: FeatureCollection = vec![Feature::new(far)].into_iter().collect();
        assert!(matches!(fc.validate(), Err(Error::InvalidGeometry { index: 0, .. })));
    }

    #[test]
    fn test_validate_rejects_empty_geometry() {
        let fc: FeatureCollection = vec![Feature::new(MultiPolygon::<f64>(vec![]))].into_iter().collect();
        assert!(fc.validate().is_err());
    }

    #[test]
    fn test_feature_id_ordering() {
        assert!(FeatureId(3) < FeatureId(4));
        assert_eq!(FeatureId(3).next(), FeatureId(4));
        assert_eq!(FeatureId(9).to_string(), "#9");
    }
}
