//! Spatial primitives: bounding box, centroid, great-circle distance

use geo::{BoundingRect, Centroid as GeoCentroid, MultiPolygon, Point};

/// Mean Earth radius (IUGG) in kilometres
pub const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Smallest box covering both `self` and `other`
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn min_corner(&self) -> [f64; 2] {
        [self.min_x, self.min_y]
    }

    pub fn max_corner(&self) -> [f64; 2] {
        [self.max_x, self.max_y]
    }
}

/// Compute the bounding box of a multi-polygon, `None` when it is empty
pub fn bounding_box(geom: &MultiPolygon<f64>) -> Option<BoundingBox> {
    geom.bounding_rect()
        .map(|rect| BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
}

/// Compute the area-weighted centroid of a multi-polygon
pub fn centroid(geom: &MultiPolygon<f64>) -> Option<Point<f64>> {
    geom.centroid()
}

/// Great-circle (haversine) distance in km between two lon/lat points.
pub fn great_circle_km(a: Point<f64>, b: Point<f64>) -> f64 {
    let lat1 = a.y().to_radians();
    let lat2 = b.y().to_radians();
    let delta_lat = (b.y() - a.y()).to_radians();
    let delta_lng = (b.x() - a.x()).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}
