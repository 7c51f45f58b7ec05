//! # Sliver Algorithms
//!
//! Polygon-simplification algorithms for sliver.
//!
//! ## Available Algorithm Categories
//!
//! - **vector**: Geodesic area, spatial index, neighbour resolution,
//!   polygon union and iterative small-polygon merging

pub mod vector;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::vector::{
        adjacency, annotate_area, area_km2, merge_small, GeometryUnion, MergeLoop, MergeOutput,
        MergeParams, MergeReport, MergeSmall, MergeState, NeighborResolver, SpatialIndex,
    };
    pub use sliver_core::prelude::*;
}
