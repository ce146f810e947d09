//! Great-circle helpers

use crate::geo::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Haversine distance in kilometres
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Seconds needed to cover `km` at `kph`, rounded to whole seconds
pub fn drive_seconds(km: f64, kph: f64) -> i64 {
    if kph <= 0.0 || !km.is_finite() {
        return 0;
    }
    (km / kph * 3600.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moscow_to_saint_petersburg() {
        let msk = GeoPoint::new(55.7558, 37.6173);
        let spb = GeoPoint::new(59.9343, 30.3351);
        let km = haversine_km(msk, spb);
        assert!((630.0..640.0).contains(&km), "{}", km);
        assert!((haversine_km(spb, msk) - km).abs() < 1e-9);
    }

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(56.0, 36.0);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn test_drive_seconds() {
        assert_eq!(drive_seconds(50.0, 40.0), 4500);
        assert_eq!(drive_seconds(60.0, 60.0), 3600);
        assert_eq!(drive_seconds(10.0, 0.0), 0);
    }
}
