//! R-tree index over the bounding boxes of active features
//!
//! Answers "which features might touch this box" so that exact geometric
//! tests only run on a handful of candidates. Results are a superset: the
//! caller must still apply an exact intersection test.

use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use sliver_core::FeatureId;
use std::collections::BTreeMap;

use super::spatial::BoundingBox;

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, FeatureId>;

fn entry(id: FeatureId, bbox: &BoundingBox) -> IndexedBox {
    GeomWithData::new(Rectangle::from_corners(bbox.min_corner(), bbox.max_corner()), id)
}

/// Bounding-box index keyed by feature id
pub struct SpatialIndex {
    tree: RTree<IndexedBox>,
    /// Box each id was inserted with; `RTree::remove` needs the exact entry
    boxes: BTreeMap<FeatureId, BoundingBox>,
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex").field("len", &self.len()).finish()
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            boxes: BTreeMap::new(),
        }
    }

    /// Build an index in one pass (STR bulk loading).
    ///
    /// A repeated id keeps its last box.
    pub fn bulk_load(entries: impl IntoIterator<Item = (FeatureId, BoundingBox)>) -> Self {
        let boxes: BTreeMap<FeatureId, BoundingBox> = entries.into_iter().collect();
        let tree = RTree::bulk_load(boxes.iter().map(|(id, bbox)| entry(*id, bbox)).collect());
        Self { tree, boxes }
    }

    /// Insert the box for `id`, replacing any box previously stored for it.
    pub fn insert(&mut self, id: FeatureId, bbox: BoundingBox) {
        self.remove(id);
        self.tree.insert(entry(id, &bbox));
        self.boxes.insert(id, bbox);
    }

    /// Remove the box for `id`. Returns `false` if it was not indexed.
    pub fn remove(&mut self, id: FeatureId) -> bool {
        match self.boxes.remove(&id) {
            Some(bbox) => {
                let removed = self.tree.remove(&entry(id, &bbox));
                debug_assert!(removed.is_some(), "index entry for {id} missing from tree");
                true
            }
            None => false,
        }
    }

    /// Ids whose box intersects (or touches) `bbox`, ascending.
    pub fn search(&self, bbox: &BoundingBox) -> Vec<FeatureId> {
        let envelope = AABB::from_corners(bbox.min_corner(), bbox.max_corner());
        let mut ids: Vec<FeatureId> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|e| e.data)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, id: FeatureId) -> bool {
        self.boxes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Indexed ids, ascending
    pub fn ids(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.boxes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> SpatialIndex {
        // 3 x 1 row of unit boxes sharing edges, plus one far away
        SpatialIndex::bulk_load(vec![
            (FeatureId(0), BoundingBox::new(0.0, 0.0, 1.0, 1.0)),
            (FeatureId(1), BoundingBox::new(1.0, 0.0, 2.0, 1.0)),
            (FeatureId(2), BoundingBox::new(2.0, 0.0, 3.0, 1.0)),
            (FeatureId(9), BoundingBox::new(50.0, 50.0, 51.0, 51.0)),
        ])
    }

    #[test]
    fn test_search_includes_touching_boxes() {
        let index = grid();
        let hits = index.search(&BoundingBox::new(1.0, 0.0, 2.0, 1.0));
        assert_eq!(hits, vec![FeatureId(0), FeatureId(1), FeatureId(2)]);
    }

    #[test]
    fn test_search_far_box() {
        let index = grid();
        assert_eq!(
            index.search(&BoundingBox::new(49.5, 49.5, 50.5, 50.5)),
            vec![FeatureId(9)]
        );
        assert!(index.search(&BoundingBox::new(10.0, 10.0, 11.0, 11.0)).is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut index = grid();
        assert!(index.remove(FeatureId(1)));
        assert!(!index.remove(FeatureId(1)));
        assert!(!index.remove(FeatureId(42)));
        assert_eq!(index.len(), 3);
        assert!(!index.contains(FeatureId(1)));
        assert_eq!(
            index.search(&BoundingBox::new(1.0, 0.0, 2.0, 1.0)),
            vec![FeatureId(0), FeatureId(2)]
        );
    }

    #[test]
    fn test_insert_replaces_existing_box() {
        let mut index = grid();
        index.insert(FeatureId(0), BoundingBox::new(100.0, 0.0, 101.0, 1.0));

        assert_eq!(index.len(), 4);
        assert!(!index.search(&BoundingBox::new(0.0, 0.0, 0.5, 0.5)).contains(&FeatureId(0)));
        assert_eq!(
            index.search(&BoundingBox::new(100.2, 0.2, 100.4, 0.4)),
            vec![FeatureId(0)]
        );
    }

    #[test]
    fn test_incremental_matches_bulk() {
        let mut index = SpatialIndex::new();
        assert!(index.is_empty());
        for (i, x) in [0.0, 1.0, 2.0].iter().enumerate() {
            index.insert(FeatureId(i as u64), BoundingBox::new(*x, 0.0, x + 1.0, 1.0));
        }
        index.insert(FeatureId(9), BoundingBox::new(50.0, 50.0, 51.0, 51.0));

        let bulk = grid();
        let query = BoundingBox::new(-10.0, -10.0, 100.0, 100.0);
        assert_eq!(index.search(&query), bulk.search(&query));
        assert_eq!(index.ids().collect::<Vec<_>>(), bulk.ids().collect::<Vec<_>>());
    }
}
