//! Iterative small-polygon merging
//!
//! Repeatedly takes the smallest active feature below the area threshold,
//! finds it a partner, unions the two and replaces them with the result,
//! until every remaining feature reaches the threshold. A merged feature
//! that is still too small becomes a candidate again, so merges cascade.
//!
//! Each iteration shrinks the active set by exactly one feature (two
//! inputs replaced by one output, or one orphan dropped), so a run over
//! `n` features ends after at most `n` iterations.
//!
//! The store and the spatial index always hold the same ids; this is
//! checked after every iteration in debug builds.

use sliver_core::{Algorithm, Error, Feature, FeatureCollection, FeatureId, FeatureStatus, Result};
use tracing::{debug, info, warn};

use super::index::SpatialIndex;
use super::neighbor::{Contact, Neighbor, NeighborResolver};
use super::store::{FeatureStore, StoredFeature};
use super::union::{GeometryUnion, UnionFailure, DEFAULT_SNAP_GRID};

/// Historical default minimum area, km²
pub const DEFAULT_THRESHOLD_KM2: f64 = 3000.0;

/// Parameters for small-polygon merging
#[derive(Debug, Clone)]
pub struct MergeParams {
    /// Features with a smaller area (km²) are merged into a neighbour
    pub threshold_km2: f64,
    /// Snapping grid (degrees) used by the fallback union
    pub snap_grid: f64,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            threshold_km2: DEFAULT_THRESHOLD_KM2,
            snap_grid: DEFAULT_SNAP_GRID,
        }
    }
}

impl MergeParams {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold_km2.is_finite() || self.threshold_km2 < 0.0 {
            return Err(Error::InvalidParameter {
                name: "threshold_km2",
                value: self.threshold_km2.to_string(),
                reason: "must be a finite, non-negative area".into(),
            });
        }
        if !self.snap_grid.is_finite() || self.snap_grid <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "snap_grid",
                value: self.snap_grid.to_string(),
                reason: "must be finite and positive".into(),
            });
        }
        Ok(())
    }
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Running,
    Terminated,
}

/// Why a feature was dropped without being merged
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OrphanReason {
    #[error("no other active feature")]
    NoNeighbor,

    #[error("union with {neighbor} failed: {failure}")]
    UnionFailed {
        neighbor: FeatureId,
        failure: UnionFailure,
    },
}

/// One successful merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeRecord {
    pub small: FeatureId,
    pub small_km2: f64,
    pub neighbor: FeatureId,
    pub neighbor_km2: f64,
    pub merged: FeatureId,
    pub merged_km2: f64,
    pub contact: Contact,
    /// Union algorithm that produced the geometry
    pub algorithm: &'static str,
}

/// A feature excluded from the output, kept for auditing
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanRecord {
    pub id: FeatureId,
    pub area_km2: f64,
    pub reason: OrphanReason,
    pub feature: Feature,
}

/// What happened during a run
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub threshold_km2: f64,
    pub initial_count: usize,
    pub iterations: usize,
    pub merges: Vec<MergeRecord>,
    pub orphans: Vec<OrphanRecord>,
}

impl MergeReport {
    pub fn orphan_ids(&self) -> Vec<FeatureId> {
        self.orphans.iter().map(|o| o.id).collect()
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// Active features at termination, ascending id
    pub features: FeatureCollection,
    pub report: MergeReport,
}

/// The merge loop; owns the feature store and its spatial index
#[derive(Debug)]
pub struct MergeLoop {
    store: FeatureStore,
    index: SpatialIndex,
    resolver: NeighborResolver,
    union: GeometryUnion,
    state: MergeState,
    report: MergeReport,
}

impl MergeLoop {
    /// Validate input and parameters, then build the store and index.
    ///
    /// Nothing is mutated if validation fails.
    pub fn new(collection: FeatureCollection, params: MergeParams) -> Result<Self> {
        params.validate()?;
        let initial_count = collection.len();
        let store = FeatureStore::from_collection(collection)?;
        let index = SpatialIndex::bulk_load(store.iter().map(|f| (f.id, f.bbox)));

        debug!(features = initial_count, threshold_km2 = params.threshold_km2, "merge loop ready");

        Ok(Self {
            store,
            index,
            resolver: NeighborResolver,
            union: GeometryUnion::with_snap_grid(params.snap_grid),
            state: MergeState::Running,
            report: MergeReport {
                threshold_km2: params.threshold_km2,
                initial_count,
                iterations: 0,
                merges: Vec::new(),
                orphans: Vec::new(),
            },
        })
    }

    /// Replace the union strategy.
    pub fn with_union(mut self, union: GeometryUnion) -> Self {
        self.union = union;
        self
    }

    pub fn state(&self) -> MergeState {
        self.state
    }

    pub fn store(&self) -> &FeatureStore {
        &self.store
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn report(&self) -> &MergeReport {
        &self.report
    }

    /// Lifecycle state of `id`, or `None` if no feature ever had it.
    pub fn status(&self, id: FeatureId) -> Option<FeatureStatus> {
        if self.store.contains(id) {
            Some(FeatureStatus::Active)
        } else if self.report.orphans.iter().any(|o| o.id == id) {
            Some(FeatureStatus::Orphan)
        } else if id < self.store.next_id() {
            Some(FeatureStatus::Merged)
        } else {
            None
        }
    }

    /// Run one iteration: select, resolve, union, commit.
    pub fn step(&mut self) -> Result<MergeState> {
        if self.state == MergeState::Terminated {
            return Ok(MergeState::Terminated);
        }

        let Some(small_id) = self.store.smallest_below(self.report.threshold_km2) else {
            self.state = MergeState::Terminated;
            info!(
                "{} regions remain, threshold {} km² ({} merges, {} orphans)",
                self.store.len(),
                self.report.threshold_km2,
                self.report.merges.len(),
                self.report.orphans.len()
            );
            return Ok(MergeState::Terminated);
        };

        self.report.iterations += 1;
        if self.report.iterations > self.report.initial_count {
            return Err(Error::Algorithm(format!(
                "merge loop exceeded {} iterations",
                self.report.initial_count
            )));
        }
        debug!(iteration = self.report.iterations, id = %small_id, "selected");

        match self.resolver.resolve(&self.store, &self.index, small_id) {
            None => self.orphan(small_id, OrphanReason::NoNeighbor)?,
            Some(neighbor) => self.merge_pair(small_id, neighbor)?,
        }

        self.check_sync();
        Ok(MergeState::Running)
    }

    /// Iterate until no feature below the threshold remains.
    pub fn run(mut self) -> Result<MergeOutput> {
        while self.step()? == MergeState::Running {}
        Ok(MergeOutput {
            features: self.store.into_collection(),
            report: self.report,
        })
    }

    fn merge_pair(&mut self, small_id: FeatureId, neighbor: Neighbor) -> Result<()> {
        let outcome = {
            let small = self.active(small_id)?;
            let partner = self.active(neighbor.id)?;
            self.union
                .merge_measured(&small.geometry, small.area_km2, &partner.geometry, partner.area_km2)
        };

        let merged = match outcome {
            Ok(merged) => merged,
            Err(failure) => {
                return self.orphan(
                    small_id,
                    OrphanReason::UnionFailed {
                        neighbor: neighbor.id,
                        failure,
                    },
                )
            }
        };

        if let Some(primary) = &merged.primary_error {
            warn!(
                small = %small_id,
                neighbor = %neighbor.id,
                error = %primary,
                "primary union failed, used {} union",
                merged.algorithm
            );
        }

        let small = self.take(small_id)?;
        let partner = self.take(neighbor.id)?;

        // the partner's attributes carry over; the small feature's are dropped
        let merged_id = self.store.insert_merged(merged.geometry, partner.properties.clone())?;
        let merged_bbox = self.active(merged_id)?.bbox;
        self.index.insert(merged_id, merged_bbox);

        info!(
            "merge {}: '{}' ({:.1} km²) -> '{}' ({:.1} km²) = {} ({:.1} km²)",
            self.report.merges.len() + 1,
            small.label(),
            small.area_km2,
            partner.label(),
            partner.area_km2,
            merged_id,
            merged.area_km2
        );

        self.report.merges.push(MergeRecord {
            small: small_id,
            small_km2: small.area_km2,
            neighbor: neighbor.id,
            neighbor_km2: partner.area_km2,
            merged: merged_id,
            merged_km2: merged.area_km2,
            contact: neighbor.contact,
            algorithm: merged.algorithm,
        });
        Ok(())
    }

    fn orphan(&mut self, id: FeatureId, reason: OrphanReason) -> Result<()> {
        let stored = self.take(id)?;
        warn!(id = %id, area_km2 = stored.area_km2, reason = %reason, "skipping '{}'", stored.label());
        self.report.orphans.push(OrphanRecord {
            id,
            area_km2: stored.area_km2,
            reason,
            feature: stored.into_feature(),
        });
        Ok(())
    }

    /// Deactivate `id` in both the store and the index.
    fn take(&mut self, id: FeatureId) -> Result<StoredFeature> {
        let stored = self
            .store
            .take(id)
            .ok_or_else(|| Error::Algorithm(format!("feature {id} is not active")))?;
        self.index.remove(id);
        Ok(stored)
    }

    fn active(&self, id: FeatureId) -> Result<&StoredFeature> {
        self.store
            .get(id)
            .ok_or_else(|| Error::Algorithm(format!("feature {id} is not active")))
    }

    fn check_sync(&self) {
        debug_assert!(
            self.store.ids().eq(self.index.ids()),
            "feature store and spatial index hold different ids"
        );
    }
}

/// Small-polygon merge algorithm
#[derive(Debug, Clone, Default)]
pub struct MergeSmall;

impl Algorithm for MergeSmall {
    type Input = FeatureCollection;
    type Output = MergeOutput;
    type Params = MergeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "MergeSmall"
    }

    fn description(&self) -> &'static str {
        "Merge every polygon below an area threshold into a neighbouring polygon, smallest first"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        merge_small(input, params)
    }
}

/// Merge sub-threshold features into neighbours until none remain.
///
/// # Arguments
/// * `collection` - Input features (lon/lat polygons)
/// * `params` - Threshold and fallback-union settings
///
/// # Returns
/// The remaining features and a report of merges and orphans
pub fn merge_small(collection: FeatureCollection, params: MergeParams) -> Result<MergeOutput> {
    MergeLoop::new(collection, params)?.run()
}
