//! Great-circle distance and bounding-box prefiltering

use crate::domain::types::GeoPoint;

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (approximately constant)
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Haversine distance between two points in meters
#[inline]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Axis-aligned lat/lng box enclosing a circle, used to skip the trig
/// for points that are obviously out of range
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
    /// Box spans the whole longitude range (near poles or huge radius)
    full_lon: bool,
}

impl BoundingBox {
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let d_lat = radius_m / METERS_PER_DEG_LAT;
        let cos_lat = center.latitude.to_radians().cos();
        let (d_lon, full_lon) = if cos_lat < 1e-6 {
            (180.0, true)
        } else {
            let d = radius_m / (METERS_PER_DEG_LAT * cos_lat);
            (d, d >= 180.0)
        };

        Self {
            min_lat: center.latitude - d_lat,
            max_lat: center.latitude + d_lat,
            min_lon: center.longitude - d_lon,
            max_lon: center.longitude + d_lon,
            full_lon,
        }
    }

    /// Cheap containment check; a `true` still needs the haversine check
    pub fn may_contain(&self, p: GeoPoint) -> bool {
        if p.latitude < self.min_lat || p.latitude > self.max_lat {
            return false;
        }
        if self.full_lon {
            return true;
        }
        // Handle boxes that wrap the antimeridian
        let lon = p.longitude;
        if self.min_lon < -180.0 {
            lon >= self.min_lon + 360.0 || lon <= self.max_lon
        } else if self.max_lon > 180.0 {
            lon >= self.min_lon || lon <= self.max_lon - 360.0
        } else {
            lon >= self.min_lon && lon <= self.max_lon
        }
    }
}

/// Distance from `origin` to `p` if it lies within `radius_m`
#[inline]
pub fn within(origin: GeoPoint, bbox: &BoundingBox, p: GeoPoint, radius_m: f64) -> Option<f64> {
    if !bbox.may_contain(p) {
        return None;
    }
    let d = haversine_m(origin, p);
    (d <= radius_m).then_some(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint { latitude: lat, longitude: lon }
    }

    #[test]
    fn test_haversine_zero() {
        assert_eq!(haversine_m(pt(40.0, -75.0), pt(40.0, -75.0)), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_m(pt(0.0, 0.0), pt(1.0, 0.0));
        // 2 * pi * R / 360
        assert!((d - 111_194.9).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = pt(38.8977, -77.0365);
        let b = pt(38.8895, -77.0353);
        assert!((haversine_m(a, b) - haversine_m(b, a)).abs() < 1e-9);
        // ~ 915 m between these two DC landmarks
        assert!((haversine_m(a, b) - 915.0).abs() < 15.0);
    }

    #[test]
    fn test_bbox_filters_far_points() {
        let origin = pt(38.9, -77.0);
        let bbox = BoundingBox::around(origin, 1_000.0);
        assert!(bbox.may_contain(pt(38.905, -77.005)));
        assert!(!bbox.may_contain(pt(39.0, -77.0)));
        assert!(!bbox.may_contain(pt(38.9, -76.9)));
    }

    #[test]
    fn test_bbox_wraps_antimeridian() {
        let origin = pt(0.0, 179.999);
        let bbox = BoundingBox::around(origin, 1_000.0);
        assert!(bbox.may_contain(pt(0.0, -179.999)));
        assert!(!bbox.may_contain(pt(0.0, 0.0)));
    }

    #[test]
    fn test_within_radius() {
        let origin = pt(38.9, -77.0);
        let bbox = BoundingBox::around(origin, 500.0);
        assert!(within(origin, &bbox, pt(38.901, -77.0), 500.0).is_some());
        assert!(within(origin, &bbox, pt(38.91, -77.0), 500.0).is_none());
    }
}
