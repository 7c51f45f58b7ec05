//! Vector algorithms for polygon simplification
//!
//! Small-polygon merging and the pieces it is built from:
//! - Measurements: geodesic area in km²
//! - Spatial: bounding boxes, centroids, great-circle distance
//! - Index: R-tree over the bounding boxes of active features
//! - Store: active features with a smallest-area-first queue
//! - Neighbor: merge-partner resolution and adjacency listing
//! - Union: polygon union with a snapped fallback
//! - Merge: the iterative merge loop

mod index;
mod measurements;
mod merge;
mod neighbor;
mod spatial;
mod store;
mod union;

pub use index::SpatialIndex;
pub use measurements::{annotate_area, area_km2, DEFAULT_AREA_KEY, M2_PER_KM2};
pub use merge::{
    merge_small, MergeLoop, MergeOutput, MergeParams, MergeRecord, MergeReport, MergeSmall,
    MergeState, OrphanReason, OrphanRecord, DEFAULT_THRESHOLD_KM2,
};
pub use neighbor::{adjacency, AdjacencyEntry, Contact, Neighbor, NeighborResolver};
pub use spatial::{bounding_box, centroid, great_circle_km, BoundingBox, EARTH_RADIUS_KM};
pub use store::{FeatureStore, StoredFeature};
pub use union::{
    find_defect, ExactUnion, GeometryUnion, Merged, SnappedUnion, UnionAlgorithm, UnionError,
    UnionFailure, DEFAULT_SNAP_GRID,
};
