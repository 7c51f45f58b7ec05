//! Geometric measurements: geodesic area

use geo::{GeodesicArea, MultiPolygon};
use sliver_core::FeatureCollection;

/// Square metres per square kilometre
pub const M2_PER_KM2: f64 = 1.0e6;

/// Property key written by [`annotate_area`] when no other key is given
pub const DEFAULT_AREA_KEY: &str = "area_km";

/// Calculate the area of a lon/lat multi-polygon in km².
///
/// Uses the geodesic area on the WGS84 ellipsoid, so results are
/// independent of any map projection and stable across calls.
pub fn area_km2(geom: &MultiPolygon<f64>) -> f64 {
    geom.geodesic_area_unsigned() / M2_PER_KM2
}

/// Write each feature's area (km²) into its properties under `key`.
pub fn annotate_area(collection: &mut FeatureCollection, key: &str) {
    for feature in collection.features.iter_mut() {
        let km2 = area_km2(&feature.geometry);
        feature.set_property(key, km2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, Polygon};
    use sliver_core::{AttributeValue, Feature};

    fn degree_square(lon: f64, lat: f64) -> Polygon<f64> {
        polygon![
            (x: lon, y: lat),
            (x: lon + 1.0, y: lat),
            (x: lon + 1.0, y: lat + 1.0),
            (x: lon, y: lat + 1.0),
            (x: lon, y: lat),
        ]
    }

    #[test]
    fn test_area_equatorial_degree_square() {
        // 111.32 km along the equator, 110.57 km along the meridian
        let a = area_km2(&MultiPolygon(vec![degree_square(0.0, 0.0)]));
        assert_relative_eq!(a, 12_308.0, max_relative = 0.01);
    }

    #[test]
    fn test_area_shrinks_towards_pole() {
        let equator = area_km2(&MultiPolygon(vec![degree_square(10.0, 0.0)]));
        let north = area_km2(&MultiPolygon(vec![degree_square(10.0, 60.0)]));
        assert!(north < equator * 0.55);
        assert!(north > equator * 0.45);
    }

    #[test]
    fn test_area_is_additive_over_parts() {
        let a = area_km2(&MultiPolygon(vec![degree_square(0.0, 0.0)]));
        let b = area_km2(&MultiPolygon(vec![degree_square(5.0, 0.0)]));
        let both = area_km2(&MultiPolygon(vec![degree_square(0.0, 0.0), degree_square(5.0, 0.0)]));
        assert_relative_eq!(both, a + b, max_relative = 1e-9);
    }

    #[test]
    fn test_area_with_hole() {
        let outer = degree_square(0.0, 0.0);
        let holed = Polygon::new(
            outer.exterior().clone(),
            vec![polygon![
                (x: 0.25, y: 0.25),
                (x: 0.25, y: 0.75),
                (x: 0.75, y: 0.75),
                (x: 0.75, y: 0.25),
                (x: 0.25, y: 0.25),
            ]
            .exterior()
            .clone()],
        );
        let full = area_km2(&MultiPolygon(vec![outer]));
        let with_hole = area_km2(&MultiPolygon(vec![holed]));
        assert_relative_eq!(with_hole, full * 0.75, max_relative = 0.01);
    }

    #[test]
    fn test_annotate_area() {
        let mut fc: FeatureCollection = vec![Feature::new(degree_square(0.0, 0.0))].into_iter().collect();
        annotate_area(&mut fc, DEFAULT_AREA_KEY);

        match fc.features[0].get_property(DEFAULT_AREA_KEY) {
            Some(AttributeValue::Float(v)) => assert_relative_eq!(*v, 12_308.0, max_relative = 0.01),
            other => panic!("expected float area, got {:?}", other),
        }
    }
}
