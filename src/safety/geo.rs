//!
//! Great-circle distance and radius filtering.
//!

use crate::ODM::models::{GeoPoint, RoutePoint};
use crate::ODM::store::BoundingBox;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Kilometres per degree of latitude
const KM_PER_DEGREE: f64 = 111.32;

/// Haversine distance in km between two lat/lon pairs
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn distance_between(a: &GeoPoint, b: &GeoPoint) -> f64 {
    distance_km(a.lat, a.lon, b.lat, b.lon)
}

pub fn is_within_radius(center_lat: f64, center_lon: f64, point_lat: f64, point_lon: f64, radius_km: f64) -> bool {
    distance_km(center_lat, center_lon, point_lat, point_lon) <= radius_km
}

/// Total length of a route in km, following insertion order
pub fn route_distance(route: &[RoutePoint]) -> f64 {
    route
        .windows(2)
        .map(|pair| distance_km(pair[0].lat, pair[0].lon, pair[1].lat, pair[1].lon))
        .sum()
}

/// A circle around a centre point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl Geofence {
    pub fn new(center: GeoPoint, radius_km: f64) -> Self {
        Geofence { center, radius_km }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        is_within_radius(self.center.lat, self.center.lon, point.lat, point.lon, self.radius_km)
    }

    /// Rectangle that encloses the circle, for narrowing a database query.
    /// Widens to the full longitude range near the poles.
    pub fn bounding_box(&self) -> BoundingBox {
        let d_lat = self.radius_km / KM_PER_DEGREE;
        let min_lat = (self.center.lat - d_lat).max(-90.0);
        let max_lat = (self.center.lat + d_lat).min(90.0);

        let cos_lat = self.center.lat.to_radians().cos();
        let (min_lon, max_lon) = if min_lat <= -89.0 || max_lat >= 89.0 || cos_lat < 1e-6 {
            (-180.0, 180.0)
        } else {
            let d_lon = self.radius_km / (KM_PER_DEGREE * cos_lat);
            if d_lon >= 180.0 || self.center.lon - d_lon < -180.0 || self.center.lon + d_lon > 180.0 {
                // crosses the antimeridian
                (-180.0, 180.0)
            } else {
                (self.center.lon - d_lon, self.center.lon + d_lon)
            }
        };

        BoundingBox { min_lat, max_lat, min_lon, max_lon }
    }

    /// Keeps the items whose location lies inside the fence, preserving order
    pub fn filter<T, F>(&self, items: Vec<T>, location: F) -> Vec<T>
    where
        F: Fn(&T) -> Option<GeoPoint>,
    {
        items
            .into_iter()
            .filter(|item| location(item).map_or(false, |point| self.contains(&point)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const LAGOS_VI: (f64, f64) = (6.5244, 3.3792);
    const IKEJA: (f64, f64) = (6.6018, 3.3515);

    #[test]
    fn test_known_distance_lagos_to_ikeja() {
        let distance = distance_km(LAGOS_VI.0, LAGOS_VI.1, IKEJA.0, IKEJA.1);
        assert!((distance - 9.3).abs() <= 0.5, "got {}", distance);
    }

    #[test]
    fn test_distance_is_symmetric_and_zero_on_self() {
        let points = [LAGOS_VI, IKEJA, (51.5074, -0.1278), (-33.8688, 151.2093), (0.0, 179.9)];
        for a in points.iter() {
            assert_eq!(distance_km(a.0, a.1, a.0, a.1), 0.0);
            for b in points.iter() {
                assert_eq!(distance_km(a.0, a.1, b.0, b.1), distance_km(b.0, b.1, a.0, a.1));
            }
        }
    }

    #[test]
    fn test_radius_boundary_is_inclusive() {
        let distance = distance_km(LAGOS_VI.0, LAGOS_VI.1, IKEJA.0, IKEJA.1);
        assert!(is_within_radius(LAGOS_VI.0, LAGOS_VI.1, IKEJA.0, IKEJA.1, distance));
        assert!(!is_within_radius(LAGOS_VI.0, LAGOS_VI.1, IKEJA.0, IKEJA.1, distance - 1e-9));
    }

    #[test]
    fn test_bounding_box_encloses_fence() {
        let fence = Geofence::new(GeoPoint::new(LAGOS_VI.0, LAGOS_VI.1), 10.0);
        let bbox = fence.bounding_box();
        assert!(bbox.contains(&GeoPoint::new(IKEJA.0, IKEJA.1)));
        // due north, just inside the radius
        let north = GeoPoint::new(LAGOS_VI.0 + 9.9 / KM_PER_DEGREE, LAGOS_VI.1);
        assert!(fence.contains(&north));
        assert!(bbox.contains(&north));
    }

    #[test]
    fn test_bounding_box_near_pole_spans_all_longitudes() {
        let bbox = Geofence::new(GeoPoint::new(89.5, 10.0), 100.0).bounding_box();
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
        assert_eq!(bbox.max_lat, 90.0);
    }

    #[test]
    fn test_filter_keeps_order() {
        let fence = Geofence::new(GeoPoint::new(LAGOS_VI.0, LAGOS_VI.1), 5.0);
        let items = vec![
            ("a", Some(GeoPoint::new(6.5250, 3.3800))),
            ("far", Some(GeoPoint::new(IKEJA.0, IKEJA.1))),
            ("none", None),
            ("b", Some(GeoPoint::new(6.5300, 3.3700))),
        ];
        let kept: Vec<&str> = fence.filter(items, |item| item.1).into_iter().map(|item| item.0).collect();
        assert_eq!(kept, vec!["a", "b"]);
    }

    #[test]
    fn test_route_distance_sums_legs() {
        let now = Utc::now();
        let route = vec![
            RoutePoint { lat: LAGOS_VI.0, lon: LAGOS_VI.1, timestamp: now, speed: None },
            RoutePoint { lat: IKEJA.0, lon: IKEJA.1, timestamp: now, speed: None },
            RoutePoint { lat: LAGOS_VI.0, lon: LAGOS_VI.1, timestamp: now, speed: None },
        ];
        let leg = distance_km(LAGOS_VI.0, LAGOS_VI.1, IKEJA.0, IKEJA.1);
        assert!((route_distance(&route) - 2.0 * leg).abs() < 1e-9);
        assert_eq!(route_distance(&route[..1]), 0.0);
        assert_eq!(route_distance(&[]), 0.0);
    }
}
