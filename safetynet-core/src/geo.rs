//! Great-circle distance.

use crate::types::Coordinates;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points, in meters.
pub fn distance_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// A point `meters` due north of `origin`. Handy for building fixtures.
pub fn offset_north(origin: Coordinates, meters: f64) -> Coordinates {
    let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
    Coordinates::new(origin.latitude + d_lat, origin.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_to_self() {
        let p = Coordinates::new(40.0, -74.0);
        assert_eq!(distance_m(p, p), 0.0);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = distance_m(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn offset_north_roundtrips_through_distance() {
        let origin = Coordinates::new(40.0, -74.0);
        for meters in [50.0, 150.0, 199.0, 250.0] {
            let d = distance_m(origin, offset_north(origin, meters));
            assert!((d - meters).abs() < 0.01, "{meters} m → {d}");
        }
    }

    #[test]
    fn symmetric() {
        let a = Coordinates::new(51.5007, -0.1246);
        let b = Coordinates::new(40.6892, -74.0445);
        assert!((distance_m(a, b) - distance_m(b, a)).abs() < 1e-6);
    }
}
