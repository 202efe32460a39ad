//! Nearby queries: available houses and active canvassers
//!
//! Linear scan with a bounding-box prefilter, then haversine. Results are
//! sorted nearest first.

use crate::domain::geo::{within, BoundingBox};
use crate::domain::types::{normalize_address, GeoPoint};
use crate::infra::error::{WalkError, WalkResult};
use crate::services::houses::{HouseDirectory, Voter};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Largest radius accepted by any nearby query
pub const MAX_RADIUS_KM: f64 = 50.0;
/// Largest result limit for available houses
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableHouse {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_meters: f64,
    pub voter_count: usize,
    pub voters: Vec<Voter>,
}

/// Radius in km to meters, rejecting nonsense values
pub fn radius_meters(radius_km: f64) -> WalkResult<f64> {
    if !radius_km.is_finite() || radius_km <= 0.0 || radius_km > MAX_RADIUS_KM {
        return Err(WalkError::Validation(format!(
            "radius must be in (0, {MAX_RADIUS_KM}] km, got {radius_km}"
        )));
    }
    Ok(radius_km * 1000.0)
}

/// Items within `radius_m` of `origin`, nearest first
pub fn nearest<T>(
    items: impl IntoIterator<Item = T>,
    origin: GeoPoint,
    radius_m: f64,
    point: impl Fn(&T) -> GeoPoint,
) -> Vec<(T, f64)> {
    let bbox = BoundingBox::around(origin, radius_m);
    let mut hits: Vec<(T, f64)> = items
        .into_iter()
        .filter_map(|item| within(origin, &bbox, point(&item), radius_m).map(|d| (item, d)))
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    hits
}

/// Houses near `origin` whose address is not in `claimed` (normalised keys)
pub fn available_houses(
    directory: &HouseDirectory,
    claimed: &FxHashSet<String>,
    origin: GeoPoint,
    radius_km: f64,
    limit: usize,
) -> WalkResult<Vec<AvailableHouse>> {
    let radius_m = radius_meters(radius_km)?;
    if limit == 0 || limit > MAX_LIMIT {
        return Err(WalkError::Validation(format!("limit must be in 1..={MAX_LIMIT}, got {limit}")));
    }

    let candidates = directory.iter().filter(|h| !claimed.contains(&normalize_address(&h.address)));
    Ok(nearest(candidates, origin, radius_m, |h| h.point())
        .into_iter()
        .take(limit)
        .map(|(h, distance)| AvailableHouse {
            address: h.address.clone(),
            latitude: h.latitude,
            longitude: h.longitude,
            distance_meters: distance,
            voter_count: h.voters.len(),
            voters: h.voters.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::houses::House;

    fn house(address: &str, lat: f64, lon: f64) -> House {
        House { address: address.into(), latitude: lat, longitude: lon, voters: Vec::new() }
    }

    fn directory() -> HouseDirectory {
        HouseDirectory::from_houses(vec![
            house("far", 38.95, -77.0),
            house("near", 38.9001, -77.0),
            house("mid", 38.902, -77.0),
        ])
    }

    #[test]
    fn test_sorted_by_distance_and_filtered() {
        let origin = GeoPoint { latitude: 38.9, longitude: -77.0 };
        let houses = available_houses(&directory(), &FxHashSet::default(), origin, 0.5, 50).unwrap();
        let names: Vec<_> = houses.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(names, vec!["near", "mid"]);
        assert!(houses[0].distance_meters < houses[1].distance_meters);
    }

    #[test]
    fn test_excludes_claimed_addresses() {
        let origin = GeoPoint { latitude: 38.9, longitude: -77.0 };
        let mut claimed = FxHashSet::default();
        claimed.insert("near".to_string());
        let houses = available_houses(&directory(), &claimed, origin, 0.5, 50).unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].address, "mid");
    }

    #[test]
    fn test_limit_applied_after_sort() {
        let origin = GeoPoint { latitude: 38.9, longitude: -77.0 };
        let houses = available_houses(&directory(), &FxHashSet::default(), origin, 10.0, 1).unwrap();
        assert_eq!(houses.len(), 1);
        assert_eq!(houses[0].address, "near");
    }

    #[test]
    fn test_rejects_bad_radius_and_limit() {
        let origin = GeoPoint { latitude: 38.9, longitude: -77.0 };
        let dir = directory();
        let none = FxHashSet::default();
        for radius in [0.0, -1.0, f64::NAN, 51.0] {
            assert!(matches!(available_houses(&dir, &none, origin, radius, 10), Err(WalkError::Validation(_))));
        }
        assert!(matches!(available_houses(&dir, &none, origin, 1.0, 0), Err(WalkError::Validation(_))));
    }

    #[test]
    fn test_nearest_generic() {
        let origin = GeoPoint { latitude: 0.0, longitude: 0.0 };
        let pts = vec![
            GeoPoint { latitude: 0.01, longitude: 0.0 },
            GeoPoint { latitude: 0.001, longitude: 0.0 },
            GeoPoint { latitude: 1.0, longitude: 0.0 },
        ];
        let hits = nearest(pts, origin, 2_000.0, |p| *p);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.latitude, 0.001);
    }
}
