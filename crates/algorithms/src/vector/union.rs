//! Polygon union with a tolerant fallback
//!
//! [`GeometryUnion::merge`] first runs an exact polygon-clipping union on
//! the geometries as given. If that fails (degenerate input, a panic inside
//! the clipping engine, or an implausible result) the inputs are snapped to
//! a fine grid, cleaned of repeated vertices and zero-width spikes, and
//! unioned again one polygon at a time. If that fails too, the caller gets
//! a [`UnionFailure`] carrying both reasons and must not invent a geometry.
//!
//! Results are always multi-polygons.

use geo::{Area, BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

use super::measurements::area_km2;

/// Default snapping grid for the fallback algorithm, in degrees (~0.1 mm)
pub const DEFAULT_SNAP_GRID: f64 = 1e-9;

/// Relative slack allowed when checking that a union did not lose area
const AREA_RELATIVE_TOLERANCE: f64 = 1e-6;
/// Absolute slack (km²) for the same check
const AREA_ABSOLUTE_TOLERANCE: f64 = 1e-6;

/// Why one union algorithm rejected a pair of geometries
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnionError {
    #[error("degenerate input: {0}")]
    Degenerate(String),

    #[error("clipping engine panicked: {0}")]
    Panicked(String),

    #[error("union produced an empty geometry")]
    EmptyResult,

    #[error("union produced non-finite coordinates")]
    NonFinite,

    #[error("union lost area: {actual:.3} km² < {expected_min:.3} km²")]
    AreaLoss { expected_min: f64, actual: f64 },
}

/// Both algorithms failed for the same pair
#[derive(Error, Debug, Clone, PartialEq)]
#[error("primary union failed ({primary}); fallback failed ({fallback})")]
pub struct UnionFailure {
    pub primary: UnionError,
    pub fallback: UnionError,
}

/// A successful union
#[derive(Debug, Clone)]
pub struct Merged {
    pub geometry: MultiPolygon<f64>,
    pub area_km2: f64,
    /// Name of the algorithm that produced `geometry`
    pub algorithm: &'static str,
    /// Set when the primary algorithm failed and the fallback was used
    pub primary_error: Option<UnionError>,
}

/// A polygon union strategy
pub trait UnionAlgorithm {
    fn name(&self) -> &'static str;

    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, UnionError>;
}

/// Exact coordinate-level union.
///
/// Input is screened with [`find_defect`] before the clipping engine runs,
/// and anything it reports is refused as [`UnionError::Degenerate`]. Spikes
/// and repeated vertices are therefore rejected by that check, not by the
/// engine, which may well accept them. Engine panics become
/// [`UnionError::Panicked`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactUnion;

impl UnionAlgorithm for ExactUnion {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, UnionError> {
        if let Some(defect) = find_defect(a).or_else(|| find_defect(b)) {
            return Err(UnionError::Degenerate(defect));
        }
        guarded(|| a.union(b))
    }
}

/// Grid-snapped union of cleaned polygons, folded one polygon at a time.
#[derive(Debug, Clone, Copy)]
pub struct SnappedUnion {
    /// Grid spacing in coordinate units (degrees)
    pub grid: f64,
}

impl Default for SnappedUnion {
    fn default() -> Self {
        Self { grid: DEFAULT_SNAP_GRID }
    }
}

impl UnionAlgorithm for SnappedUnion {
    fn name(&self) -> &'static str {
        "snapped"
    }

    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, UnionError> {
        let parts: Vec<Polygon<f64>> = a
            .0
            .iter()
            .chain(b.0.iter())
            .filter_map(|p| clean_polygon(p, self.grid))
            .collect();

        if parts.is_empty() {
            return Err(UnionError::Degenerate("nothing left after cleaning".into()));
        }

        let mut acc = MultiPolygon(Vec::new());
        for part in parts {
            let next = MultiPolygon(vec![part]);
            acc = guarded(|| acc.union(&next))?;
        }
        Ok(acc)
    }
}

/// Primary algorithm with a single fallback
pub struct GeometryUnion {
    primary: Box<dyn UnionAlgorithm>,
    fallback: Box<dyn UnionAlgorithm>,
}

impl fmt::Debug for GeometryUnion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryUnion")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl Default for GeometryUnion {
    fn default() -> Self {
        Self::with_snap_grid(DEFAULT_SNAP_GRID)
    }
}

impl GeometryUnion {
    pub fn new(primary: Box<dyn UnionAlgorithm>, fallback: Box<dyn UnionAlgorithm>) -> Self {
        Self { primary, fallback }
    }

    /// [`ExactUnion`] backed by [`SnappedUnion`] on the given grid
    pub fn with_snap_grid(grid: f64) -> Self {
        Self::new(Box::new(ExactUnion), Box::new(SnappedUnion { grid }))
    }

    /// Union two geometries.
    pub fn merge(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<Merged, UnionFailure> {
        self.merge_measured(a, area_km2(a), b, area_km2(b))
    }

    /// Same as [`merge`](Self::merge) with the input areas already known.
    pub fn merge_measured(
        &self,
        a: &MultiPolygon<f64>,
        a_km2: f64,
        b: &MultiPolygon<f64>,
        b_km2: f64,
    ) -> Result<Merged, UnionFailure> {
        let floor = a_km2.max(b_km2);

        let primary = match attempt(self.primary.as_ref(), a, b, floor) {
            Ok((geometry, area)) => {
                return Ok(Merged {
                    geometry,
                    area_km2: area,
                    algorithm: self.primary.name(),
                    primary_error: None,
                })
            }
            Err(e) => e,
        };

        match attempt(self.fallback.as_ref(), a, b, floor) {
            Ok((geometry, area)) => Ok(Merged {
                geometry,
                area_km2: area,
                algorithm: self.fallback.name(),
                primary_error: Some(primary),
            }),
            Err(fallback) => Err(UnionFailure { primary, fallback }),
        }
    }
}

/// Run one algorithm and check that its output is usable.
fn attempt(
    algorithm: &dyn UnionAlgorithm,
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
    floor_km2: f64,
) -> Result<(MultiPolygon<f64>, f64), UnionError> {
    let result = algorithm.union(a, b)?;

    if result.0.is_empty() {
        return Err(UnionError::EmptyResult);
    }
    if !all_coords(&result).all(|c| c.x.is_finite() && c.y.is_finite()) {
        return Err(UnionError::NonFinite);
    }

    let area = area_km2(&result);
    let expected_min = floor_km2 * (1.0 - AREA_RELATIVE_TOLERANCE) - AREA_ABSOLUTE_TOLERANCE;
    if area < expected_min {
        return Err(UnionError::AreaLoss { expected_min, actual: area });
    }
    Ok((result, area))
}

fn guarded<F>(op: F) -> Result<MultiPolygon<f64>, UnionError>
where
    F: FnOnce() -> MultiPolygon<f64>,
{
    catch_unwind(AssertUnwindSafe(op)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        UnionError::Panicked(msg)
    })
}

fn all_coords(geom: &MultiPolygon<f64>) -> impl Iterator<Item = &Coord<f64>> {
    geom.0.iter().flat_map(|p| {
        std::iter::once(p.exterior())
            .chain(p.interiors().iter())
            .flat_map(|ring| ring.0.iter())
    })
}

/// First structural defect found in `geom`, if any.
///
/// Looks for non-finite coordinates, rings with fewer than four positions,
/// repeated consecutive vertices and zero-width spikes (a vertex where the
/// boundary doubles back on itself). Linear in the number of vertices;
/// self-intersections between distant edges are not detected.
pub fn find_defect(geom: &MultiPolygon<f64>) -> Option<String> {
    geom.0.iter().enumerate().find_map(|(p, polygon)| {
        std::iter::once(polygon.exterior())
            .chain(polygon.interiors().iter())
            .enumerate()
            .find_map(|(r, ring)| ring_defect(ring).map(|d| format!("polygon {p} ring {r}: {d}")))
    })
}

fn ring_defect(ring: &LineString<f64>) -> Option<String> {
    let coords = &ring.0;
    if coords.len() < 4 {
        return Some(format!("{} positions", coords.len()));
    }
    if let Some(c) = coords.iter().find(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Some(format!("non-finite coordinate ({}, {})", c.x, c.y));
    }
    if let Some(w) = coords.windows(2).position(|w| w[0] == w[1]) {
        return Some(format!("repeated vertex at position {w}"));
    }

    // Open ring: the closing position repeats the first
    let open = &coords[..coords.len() - 1];
    let n = open.len();
    (0..n).find_map(|i| {
        let prev = open[(i + n - 1) % n];
        let next = open[(i + 1) % n];
        is_spike(prev, open[i], next).then(|| format!("spike at position {i}"))
    })
}

/// `cur` is a spike when the boundary arrives and leaves along the same line
/// in opposite directions.
fn is_spike(prev: Coord<f64>, cur: Coord<f64>, next: Coord<f64>) -> bool {
    if prev == next {
        return true;
    }
    let (ax, ay) = (cur.x - prev.x, cur.y - prev.y);
    let (bx, by) = (next.x - cur.x, next.y - cur.y);
    let cross = ax * by - ay * bx;
    let dot = ax * bx + ay * by;
    cross == 0.0 && dot < 0.0
}

fn snap(c: Coord<f64>, grid: f64) -> Coord<f64> {
    Coord {
        x: (c.x / grid).round() * grid,
        y: (c.y / grid).round() * grid,
    }
}

/// Snap, drop repeated vertices and spikes. `None` if the ring collapses.
fn clean_ring(ring: &LineString<f64>, grid: f64) -> Option<LineString<f64>> {
    let mut pts: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring.0.iter().filter(|c| c.x.is_finite() && c.y.is_finite()) {
        let s = snap(*c, grid);
        if pts.last() != Some(&s) {
            pts.push(s);
        }
    }
    while pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }

    // Removing a spike can expose a new one next to it, so sweep until stable
    loop {
        let n = pts.len();
        if n < 3 {
            return None;
        }
        let spike = (0..n).find(|&i| is_spike(pts[(i + n - 1) % n], pts[i], pts[(i + 1) % n]));
        match spike {
            Some(i) => {
                pts.remove(i);
                // the neighbours of a removed spike may now coincide
                pts.dedup();
                while pts.len() > 1 && pts.first() == pts.last() {
                    pts.pop();
                }
            }
            None => break,
        }
    }

    pts.push(pts[0]);
    let cleaned = LineString::new(pts);
    (Polygon::new(cleaned.clone(), vec![]).unsigned_area() > 0.0).then_some(cleaned)
}

fn clean_polygon(polygon: &Polygon<f64>, grid: f64) -> Option<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior(), grid)?;
    let interiors = polygon
        .interiors()
        .iter()
        .filter_map(|ring| clean_ring(ring, grid))
        .collect();
    Some(Polygon::new(exterior, interiors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::polygon;

    fn square(x0: f64, y0: f64, side: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ]])
    }

    /// Left square with a zero-width spike poking into its right neighbour
    fn spiked() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 0.5, y: 0.0),
            (x: 0.5, y: 0.25),
            (x: 0.7, y: 0.25),
            (x: 0.5, y: 0.25),
            (x: 0.5, y: 0.5),
            (x: 0.0, y: 0.5),
            (x: 0.0, y: 0.0),
        ]])
    }

    struct AlwaysFails;

    impl UnionAlgorithm for AlwaysFails {
        fn name(&self) -> &'static str {
            "always-fails"
        }

        fn union(&self, _: &MultiPolygon<f64>, _: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, UnionError> {
            Err(UnionError::Degenerate("refused".into()))
        }
    }

    struct Panics;

    impl UnionAlgorithm for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn union(&self, _: &MultiPolygon<f64>, _: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, UnionError> {
            guarded(|| panic!("boom"))
        }
    }

    #[test]
    fn test_adjacent_squares_merge_exactly() {
        let a = square(0.0, 0.0, 0.5);
        let b = square(0.5, 0.0, 0.5);
        let merged = GeometryUnion::default().merge(&a, &b).unwrap();

        assert_eq!(merged.algorithm, "exact");
        assert!(merged.primary_error.is_none());
        assert_eq!(merged.geometry.0.len(), 1);
        assert_relative_eq!(merged.area_km2, area_km2(&a) + area_km2(&b), max_relative = 1e-6);
    }

    #[test]
    fn test_disjoint_squares_stay_separate_parts() {
        let a = square(0.0, 0.0, 0.5);
        let b = square(3.0, 0.0, 0.5);
        let merged = GeometryUnion::default().merge(&a, &b).unwrap();
        assert_eq!(merged.geometry.0.len(), 2);
    }

    #[test]
    fn test_overlap_counts_once() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(0.5, 0.0, 1.0);
        let merged = GeometryUnion::default().merge(&a, &b).unwrap();
        assert!(merged.area_km2 >= area_km2(&a));
        assert_relative_eq!(merged.area_km2, area_km2(&a) * 1.5, max_relative = 0.01);
    }

    #[test]
    fn test_exact_refuses_spike() {
        let err = ExactUnion.union(&spiked(), &square(0.5, 0.0, 0.5)).unwrap_err();
        assert!(matches!(err, UnionError::Degenerate(_)));
    }

    #[test]
    fn test_spike_falls_back_to_snapped() {
        let a = spiked();
        let b = square(0.5, 0.0, 0.5);
        let merged = GeometryUnion::default().merge(&a, &b).unwrap();

        assert_eq!(merged.algorithm, "snapped");
        assert!(matches!(merged.primary_error, Some(UnionError::Degenerate(_))));
        assert_eq!(merged.geometry.0.len(), 1);
        assert!(find_defect(&merged.geometry).is_none());
    }

    #[test]
    fn test_both_fail() {
        let union = GeometryUnion::new(Box::new(AlwaysFails), Box::new(Panics));
        let failure = union.merge(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0)).unwrap_err();

        assert!(matches!(failure.primary, UnionError::Degenerate(_)));
        assert_eq!(failure.fallback, UnionError::Panicked("boom".into()));
    }

    #[test]
    fn test_panic_in_primary_uses_fallback() {
        let union = GeometryUnion::new(Box::new(Panics), Box::new(SnappedUnion::default()));
        let merged = union.merge(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0)).unwrap();
        assert_eq!(merged.algorithm, "snapped");
        assert!(matches!(merged.primary_error, Some(UnionError::Panicked(_))));
    }

    #[test]
    fn test_find_defect() {
        assert!(find_defect(&square(0.0, 0.0, 1.0)).is_none());
        assert!(find_defect(&spiked()).unwrap().contains("spike"));

        let repeated = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        )]);
        assert!(find_defect(&repeated).unwrap().contains("repeated"));
    }

    #[test]
    fn test_clean_ring_collapses_sliver() {
        let flat = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]);
        assert!(clean_ring(&flat, DEFAULT_SNAP_GRID).is_none());
    }

    #[test]
    fn test_clean_ring_snaps_near_duplicates() {
        let ring = LineString::from(vec![
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0 + 1e-12, 1e-12),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ]);
        let cleaned = clean_ring(&ring, DEFAULT_SNAP_GRID).unwrap();
        assert_eq!(cleaned.0.len(), 5);
        assert!(ring_defect(&cleaned).is_none());
    }
}
