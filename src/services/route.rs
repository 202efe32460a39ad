//! Walking route ordering
//!
//! Nearest-neighbour tour from the start point, improved with 2-opt. The tour
//! is a closed loop back to the start; index 0 of the distance matrix is the
//! start and stays fixed.

use crate::domain::geo::haversine_m;
use crate::domain::types::GeoPoint;
use crate::services::houses::House;
use serde::Serialize;

/// Walking speed used for duration estimates
const WALK_SPEED_KMH: f64 = 5.0;
/// Time spent at each door
const MINUTES_PER_HOUSE: f64 = 2.0;
/// Upper bound on 2-opt sweeps
const MAX_2OPT_PASSES: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHouse {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub order: usize,
    pub distance_from_previous_meters: f64,
    pub voter_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedRoute {
    pub houses: Vec<RouteHouse>,
    /// Includes the leg back to the start
    pub total_distance_meters: f64,
    pub estimated_duration_minutes: f64,
}

fn distance_matrix(points: &[GeoPoint]) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut m = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = haversine_m(points[i], points[j]);
            m[i][j] = d;
            m[j][i] = d;
        }
    }
    m
}

fn nearest_neighbour_tour(dist: &[Vec<f64>]) -> Vec<usize> {
    let n = dist.len();
    let mut visited = vec![false; n];
    let mut tour = Vec::with_capacity(n);
    let mut current = 0;
    visited[0] = true;
    tour.push(0);

    for _ in 1..n {
        let next = (0..n)
            .filter(|&j| !visited[j])
            .min_by(|&a, &b| dist[current][a].total_cmp(&dist[current][b]));
        let Some(next) = next else { break };
        visited[next] = true;
        tour.push(next);
        current = next;
    }
    tour
}

/// Closed-tour length (returns to `tour[0]`)
fn tour_length(dist: &[Vec<f64>], tour: &[usize]) -> f64 {
    let legs: f64 = tour.windows(2).map(|w| dist[w[0]][w[1]]).sum();
    match (tour.first(), tour.last()) {
        (Some(&first), Some(&last)) => legs + dist[last][first],
        _ => 0.0,
    }
}

/// Reverse segments while that shortens the closed tour
fn two_opt(dist: &[Vec<f64>], tour: &mut [usize]) {
    let n = tour.len();
    if n < 4 {
        return;
    }
    for _ in 0..MAX_2OPT_PASSES {
        let mut improved = false;
        for i in 1..n - 1 {
            for k in (i + 1)..n {
                let a = tour[i - 1];
                let b = tour[i];
                let c = tour[k];
                let d = tour[(k + 1) % n];
                let delta = dist[a][c] + dist[b][d] - dist[a][b] - dist[c][d];
                if delta < -1e-9 {
                    tour[i..=k].reverse();
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
}

/// Order `houses` into a short walking loop from `start`
pub fn optimize_route(start: GeoPoint, houses: &[&House]) -> OptimizedRoute {
    if houses.is_empty() {
        return OptimizedRoute::default();
    }

    let points: Vec<GeoPoint> = std::iter::once(start).chain(houses.iter().map(|h| h.point())).collect();
    let dist = distance_matrix(&points);
    let mut tour = nearest_neighbour_tour(&dist);
    two_opt(&dist, &mut tour);

    let route: Vec<RouteHouse> = tour
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let house = houses[w[1] - 1];
            RouteHouse {
                address: house.address.clone(),
                latitude: house.latitude,
                longitude: house.longitude,
                order: i + 1,
                distance_from_previous_meters: dist[w[0]][w[1]],
                voter_count: house.voters.len(),
            }
        })
        .collect();

    let total = tour_length(&dist, &tour);
    let walking_minutes = total / 1000.0 / WALK_SPEED_KMH * 60.0;
    OptimizedRoute {
        estimated_duration_minutes: walking_minutes + route.len() as f64 * MINUTES_PER_HOUSE,
        total_distance_meters: total,
        houses: route,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn house(address: &str, lat: f64, lon: f64) -> House {
        House { address: address.into(), latitude: lat, longitude: lon, voters: Vec::new() }
    }

    #[test]
    fn test_empty_route() {
        let route = optimize_route(GeoPoint { latitude: 0.0, longitude: 0.0 }, &[]);
        assert!(route.houses.is_empty());
        assert_eq!(route.total_distance_meters, 0.0);
        assert_eq!(route.estimated_duration_minutes, 0.0);
    }

    #[test]
    fn test_single_house_round_trip() {
        let h = house("a", 0.01, 0.0);
        let start = GeoPoint { latitude: 0.0, longitude: 0.0 };
        let route = optimize_route(start, &[&h]);
        assert_eq!(route.houses.len(), 1);
        let leg = route.houses[0].distance_from_previous_meters;
        assert!((route.total_distance_meters - 2.0 * leg).abs() < 1e-6);
        let expected = 2.0 * leg / 1000.0 / 5.0 * 60.0 + 2.0;
        assert!((route.estimated_duration_minutes - expected).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_houses_visited_in_order() {
        let start = GeoPoint { latitude: 0.0, longitude: 0.0 };
        let c = house("c", 0.003, 0.0);
        let a = house("a", 0.001, 0.0);
        let b = house("b", 0.002, 0.0);
        let route = optimize_route(start, &[&c, &a, &b]);
        let order: Vec<_> = route.houses.iter().map(|h| h.address.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(route.houses.iter().map(|h| h.order).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_two_opt_removes_crossing() {
        // Square with a deliberately crossed tour 0-2-1-3
        let pts = [
            GeoPoint { latitude: 0.0, longitude: 0.0 },
            GeoPoint { latitude: 0.0, longitude: 0.01 },
            GeoPoint { latitude: 0.01, longitude: 0.01 },
            GeoPoint { latitude: 0.01, longitude: 0.0 },
        ];
        let dist = distance_matrix(&pts);
        let mut tour = vec![0, 2, 1, 3];
        let before = tour_length(&dist, &tour);
        two_opt(&dist, &mut tour);
        assert!(tour_length(&dist, &tour) < before);
        assert_eq!(tour[0], 0);
    }

    #[test]
    fn test_every_house_visited_once() {
        let start = GeoPoint { latitude: 38.9, longitude: -77.0 };
        let houses: Vec<House> = (0..12)
            .map(|i| house(&format!("{i}"), 38.9 + (i % 4) as f64 * 0.001, -77.0 + (i / 4) as f64 * 0.001))
            .collect();
        let refs: Vec<&House> = houses.iter().collect();
        let route = optimize_route(start, &refs);
        let mut seen: Vec<_> = route.houses.iter().map(|h| h.address.clone()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 12);
        let legs: f64 = route.houses.iter().map(|h| h.distance_from_previous_meters).sum();
        assert!(route.total_distance_meters >= legs);
    }
}
