//! Id-keyed store of the currently active features
//!
//! Each stored feature caches its area and bounding box; geometry never
//! changes once stored, so both stay valid for the feature's lifetime.
//! A min-heap keyed on (area, id) answers "smallest active feature" without
//! rescanning the store. Entries for features that have since been taken
//! out are discarded lazily when they surface.

use geo::MultiPolygon;
use sliver_core::vector::label_of;
use sliver_core::{Error, Feature, FeatureCollection, FeatureId, Properties, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use super::measurements::area_km2;
use super::spatial::{bounding_box, BoundingBox};

/// An active feature plus its cached measurements
#[derive(Debug, Clone)]
pub struct StoredFeature {
    pub id: FeatureId,
    pub geometry: MultiPolygon<f64>,
    pub properties: Properties,
    pub area_km2: f64,
    pub bbox: BoundingBox,
}

impl StoredFeature {
    fn measure(id: FeatureId, geometry: MultiPolygon<f64>, properties: Properties) -> Option<Self> {
        let bbox = bounding_box(&geometry)?;
        let area_km2 = area_km2(&geometry);
        Some(Self { id, geometry, properties, area_km2, bbox })
    }

    /// `name`, then `name_en`, then the id
    pub fn label(&self) -> String {
        label_of(&self.properties, self.id)
    }

    pub fn into_feature(self) -> Feature {
        Feature::new(self.geometry)
            .with_properties(self.properties)
            .with_id(self.id)
    }
}

/// Heap entry, ordered so that `BinaryHeap` (max-heap) pops the smallest
/// area first and the lowest id among equal areas.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    area: f64,
    id: FeatureId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .area
            .total_cmp(&self.area)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The set of active features, keyed by id
#[derive(Debug, Default)]
pub struct FeatureStore {
    active: BTreeMap<FeatureId, StoredFeature>,
    queue: BinaryHeap<Candidate>,
    next_id: FeatureId,
}

impl FeatureStore {
    /// Validate `collection` and load it, assigning ids `0..n` in input order.
    ///
    /// Ids already present on the input features are not reused.
    pub fn from_collection(collection: FeatureCollection) -> Result<Self> {
        collection.validate()?;

        let mut store = Self::default();
        for (index, feature) in collection.into_iter().enumerate() {
            store
                .insert(feature.geometry, feature.properties)
                .ok_or_else(|| Error::InvalidGeometry {
                    index,
                    reason: "geometry has no extent".into(),
                })?;
        }
        Ok(store)
    }

    /// Store the output of a merge under a fresh id.
    pub fn insert_merged(&mut self, geometry: MultiPolygon<f64>, properties: Properties) -> Result<FeatureId> {
        self.insert(geometry, properties)
            .ok_or_else(|| Error::Algorithm("merged geometry has no extent".into()))
    }

    fn insert(&mut self, geometry: MultiPolygon<f64>, properties: Properties) -> Option<FeatureId> {
        let id = self.next_id;
        let stored = StoredFeature::measure(id, geometry, properties)?;
        self.next_id = id.next();
        self.queue.push(Candidate { area: stored.area_km2, id });
        self.active.insert(id, stored);
        Some(id)
    }

    /// Remove a feature from the active set.
    pub fn take(&mut self, id: FeatureId) -> Option<StoredFeature> {
        self.active.remove(&id)
    }

    pub fn get(&self, id: FeatureId) -> Option<&StoredFeature> {
        self.active.get(&id)
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.active.contains_key(&id)
    }

    /// Smallest active feature with area strictly below `threshold_km2`.
    ///
    /// Equal areas resolve to the lowest id.
    pub fn smallest_below(&mut self, threshold_km2: f64) -> Option<FeatureId> {
        while let Some(top) = self.queue.peek() {
            if !self.active.contains_key(&top.id) {
                self.queue.pop();
                continue;
            }
            return (top.area < threshold_km2).then_some(top.id);
        }
        None
    }

    /// Active features in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &StoredFeature> {
        self.active.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.active.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Id the next stored feature will receive
    pub fn next_id(&self) -> FeatureId {
        self.next_id
    }

    /// Active features in ascending id order, ids attached
    pub fn into_collection(self) -> FeatureCollection {
        self.active.into_values().map(StoredFeature::into_feature).collect()
    }
}
