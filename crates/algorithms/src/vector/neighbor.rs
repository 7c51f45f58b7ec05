//! Merge-partner resolution
//!
//! A feature's partner is the smallest active feature whose geometry
//! touches or overlaps it. Features with no such partner (islands) fall
//! back to the active feature with the nearest centroid, measured along
//! the great circle.

use geo::Intersects;
use sliver_core::{FeatureCollection, FeatureId};
use std::cmp::Ordering;

use super::index::SpatialIndex;
use super::spatial::{bounding_box, centroid, great_circle_km};
use super::store::{FeatureStore, StoredFeature};

/// How a partner was found
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contact {
    /// Geometries touch or overlap
    Touching,
    /// No touching feature; closest centroid instead
    Nearest { distance_km: f64 },
}

/// A chosen merge partner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: FeatureId,
    pub contact: Contact,
}

/// Picks merge partners from the active store, using the index to prune
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborResolver;

impl NeighborResolver {
    /// Partner for `id`, or `None` when no other active feature exists.
    pub fn resolve(&self, store: &FeatureStore, index: &SpatialIndex, id: FeatureId) -> Option<Neighbor> {
        let feature = store.get(id)?;
        self.touching(store, index, feature)
            .or_else(|| self.nearest(store, feature))
    }

    /// Smallest intersecting feature; equal areas go to the lowest id.
    fn touching(&self, store: &FeatureStore, index: &SpatialIndex, feature: &StoredFeature) -> Option<Neighbor> {
        index
            .search(&feature.bbox)
            .into_iter()
            .filter(|candidate| *candidate != feature.id)
            .filter_map(|candidate| {
                let stored = store.get(candidate);
                debug_assert!(stored.is_some(), "index returned inactive feature {candidate}");
                stored
            })
            .filter(|candidate| candidate.geometry.intersects(&feature.geometry))
            .min_by(|a, b| by_area_then_id(a, b))
            .map(|chosen| Neighbor {
                id: chosen.id,
                contact: Contact::Touching,
            })
    }

    /// Closest centroid over every other active feature; ties go to the lowest id.
    fn nearest(&self, store: &FeatureStore, feature: &StoredFeature) -> Option<Neighbor> {
        let origin = centroid(&feature.geometry)?;
        store
            .iter()
            .filter(|candidate| candidate.id != feature.id)
            .filter_map(|candidate| {
                centroid(&candidate.geometry).map(|c| (great_circle_km(origin, c), candidate.id))
            })
            .min_by(|(da, ia), (db, ib)| da.total_cmp(db).then_with(|| ia.cmp(ib)))
            .map(|(distance_km, id)| Neighbor {
                id,
                contact: Contact::Nearest { distance_km },
            })
    }
}

fn by_area_then_id(a: &StoredFeature, b: &StoredFeature) -> Ordering {
    a.area_km2.total_cmp(&b.area_km2).then_with(|| a.id.cmp(&b.id))
}

/// Features that touch one feature of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyEntry {
    /// Position of the feature in the collection
    pub index: usize,
    /// `name`, then `name_en`, then the position
    pub label: String,
    /// Positions of the touching features, ascending
    pub neighbors: Vec<usize>,
}

/// For each feature, list every other feature whose geometry intersects it.
pub fn adjacency(collection: &FeatureCollection) -> Vec<AdjacencyEntry> {
    let boxes: Vec<_> = collection.iter().map(|f| bounding_box(&f.geometry)).collect();
    let index = SpatialIndex::bulk_load(
        boxes
            .iter()
            .enumerate()
            .filter_map(|(i, bbox)| bbox.map(|b| (FeatureId(i as u64), b))),
    );

    collection
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let neighbors = boxes[i]
                .map(|bbox| {
                    index
                        .search(&bbox)
                        .into_iter()
                        .map(|FeatureId(j)| j as usize)
                        .filter(|&j| j != i)
                        .filter(|&j| collection.features[j].geometry.intersects(&feature.geometry))
                        .collect()
                })
                .unwrap_or_default();
            AdjacencyEntry {
                index: i,
                label: feature.label(i),
                neighbors,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};
    use sliver_core::Feature;

    fn rect(x0: f64, y0: f64, w: f64, h: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x0 + w, y: y0), (x: x0 + w, y: y0 + h), (x: x0, y: y0 + h), (x: x0, y: y0)]
    }

    fn setup(polys: Vec<Polygon<f64>>) -> (FeatureStore, SpatialIndex) {
        let fc: FeatureCollection = polys.into_iter().map(Feature::new).collect();
        let store = FeatureStore::from_collection(fc).unwrap();
        let index = SpatialIndex::bulk_load(store.iter().map(|f| (f.id, f.bbox)));
        (store, index)
    }

    #[test]
    fn test_prefers_smallest_touching() {
        // 0: tiny centre, 1: big left neighbour, 2: small right neighbour
        let (store, index) = setup(vec![
            rect(1.0, 0.0, 0.2, 0.5),
            rect(0.0, 0.0, 1.0, 0.5),
            rect(1.2, 0.0, 0.4, 0.5),
        ]);
        let n = NeighborResolver.resolve(&store, &index, FeatureId(0)).unwrap();
        assert_eq!(n, Neighbor { id: FeatureId(2), contact: Contact::Touching });
    }

    #[test]
    fn test_equal_area_touching_tie_goes_to_lowest_id() {
        // 1 and 2 are identical copies touching 0, so their areas are equal
        let (store, index) = setup(vec![
            rect(1.0, 0.0, 0.2, 0.5),
            rect(1.2, 0.0, 0.4, 0.5),
            rect(1.2, 0.0, 0.4, 0.5),
        ]);
        assert_eq!(store.get(FeatureId(1)).unwrap().area_km2, store.get(FeatureId(2)).unwrap().area_km2);

        let n = NeighborResolver.resolve(&store, &index, FeatureId(0)).unwrap();
        assert_eq!(n, Neighbor { id: FeatureId(1), contact: Contact::Touching });
    }

    #[test]
    fn test_bbox_overlap_alone_is_not_contact() {
        // L-shaped arrangement: 1's bbox covers 0's bbox corner but the shapes are apart
        let l_shape = polygon![
            (x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 0.2), (x: 0.2, y: 0.2),
            (x: 0.2, y: 2.0), (x: 0.0, y: 2.0), (x: 0.0, y: 0.0),
        ];
        let (store, index) = setup(vec![rect(1.0, 1.0, 0.3, 0.3), l_shape]);
        let n = NeighborResolver.resolve(&store, &index, FeatureId(0)).unwrap();
        assert_eq!(n.id, FeatureId(1));
        assert!(matches!(n.contact, Contact::Nearest { .. }));
    }

    #[test]
    fn test_island_falls_back_to_nearest_centroid() {
        let (store, index) = setup(vec![
            rect(10.0, 0.0, 0.2, 0.2),
            rect(0.0, 0.0, 1.0, 1.0),
            rect(12.0, 0.0, 0.5, 0.5),
        ]);
        let n = NeighborResolver.resolve(&store, &index, FeatureId(0)).unwrap();
        assert_eq!(n.id, FeatureId(2));
        match n.contact {
            Contact::Nearest { distance_km } => assert!(distance_km > 200.0 && distance_km < 300.0),
            other => panic!("expected nearest, got {:?}", other),
        }
    }

    #[test]
    fn test_equidistant_tie_goes_to_lowest_id() {
        // 1 and 2 are identical copies, so their centroid distances are equal
        let (store, index) = setup(vec![
            rect(0.0, 0.0, 0.2, 0.2),
            rect(5.0, 0.0, 0.2, 0.2),
            rect(5.0, 0.0, 0.2, 0.2),
        ]);
        let n = NeighborResolver.resolve(&store, &index, FeatureId(0)).unwrap();
        assert_eq!(n.id, FeatureId(1));
    }

    #[test]
    fn test_lonely_feature_has_no_partner() {
        let (store, index) = setup(vec![rect(0.0, 0.0, 0.1, 0.1)]);
        assert!(NeighborResolver.resolve(&store, &index, FeatureId(0)).is_none());
    }

    #[test]
    fn test_adjacency() {
        let fc: FeatureCollection = vec![
            Feature::new(rect(0.0, 0.0, 1.0, 1.0)),
            Feature::new(rect(1.0, 0.0, 1.0, 1.0)),
            Feature::new(rect(5.0, 0.0, 1.0, 1.0)),
        ]
        .into_iter()
        .collect();

        let adj = adjacency(&fc);
        assert_eq!(adj[0].neighbors, vec![1]);
        assert_eq!(adj[1].neighbors, vec![0]);
        assert!(adj[2].neighbors.is_empty());
        assert_eq!(adj[2].label, "2");
    }
}
