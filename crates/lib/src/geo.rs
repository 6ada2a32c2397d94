//! # Store Finder
//!
//! Great-circle distances between the reader and the partner bookstores, used
//! only to order the store list.

use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub name: String,
    pub address: String,
    pub location: Coordinates,
}

/// Haversine distance in kilometres.
pub fn haversine_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Stores paired with their distance from `origin`, nearest first.
pub fn sort_stores_by_distance(stores: &[Store], origin: Coordinates) -> Vec<(Store, f64)> {
    let mut ranked: Vec<(Store, f64)> = stores
        .iter()
        .map(|s| (s.clone(), haversine_km(origin, s.location)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
    ranked
}

/// The partner stores shipped with the app.
pub fn default_stores() -> Vec<Store> {
    [
        ("Powell's City of Books", "1005 W Burnside St, Portland, OR", 45.5231, -122.6814),
        ("The Strand", "828 Broadway, New York, NY", 40.7332, -73.9907),
        ("City Lights Booksellers", "261 Columbus Ave, San Francisco, CA", 37.7976, -122.4066),
        ("Tattered Cover", "2526 E Colfax Ave, Denver, CO", 39.7402, -104.9548),
        ("Elliott Bay Book Company", "1521 10th Ave, Seattle, WA", 47.6148, -122.3193),
        ("Book People", "603 N Lamar Blvd, Austin, TX", 30.2729, -97.7539),
    ]
    .into_iter()
    .map(|(name, address, lat, lon)| Store {
        name: name.to_string(),
        address: address.to_string(),
        location: Coordinates::new(lat, lon),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_points_are_zero_apart() {
        let p = Coordinates::new(51.5074, -0.1278);
        assert_eq!(haversine_km(p, p), 0.0);
    }

    #[test]
    fn test_known_distance() {
        // London to Paris is roughly 344 km.
        let london = Coordinates::new(51.5074, -0.1278);
        let paris = Coordinates::new(48.8566, 2.3522);
        let d = haversine_km(london, paris);
        assert!((d - 343.5).abs() < 2.0, "unexpected distance {d}");
    }

    #[test]
    fn test_sort_nearest_first() {
        let origin = Coordinates::new(40.7128, -74.0060); // Manhattan
        let ranked = sort_stores_by_distance(&default_stores(), origin);
        assert_eq!(ranked[0].0.name, "The Strand");
        assert!(ranked.windows(2).all(|w| w[0].1 <= w[1].1));
    }
}
