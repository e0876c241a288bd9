//! Region partitioner: density-based clustering of co-located orders so that
//! matching can run independently (and in parallel) per region.
//!
//! Clustering runs on order pickup points with a `max_radius_km`
//! neighbourhood; clusters below `min_points_per_region` and unreachable
//! orders become trailing singleton regions. Every driver joins the region
//! whose pickup centroid is nearest by great-circle distance. No order
//! appears in two regions.

use crate::config::RegionConfig;
use crate::geo::{centroid, GeoPoint};
use crate::snapshots::{DriverSnapshot, OrderSnapshot};

/// An independent matching unit: a subset of orders and the drivers serving
/// them.
#[derive(Debug, Clone)]
pub struct Region {
    pub orders: Vec<OrderSnapshot>,
    pub drivers: Vec<DriverSnapshot>,
    pub centroid: GeoPoint,
}

/// Partition orders and drivers into regions. Input order of `orders` is
/// preserved inside each region (the caller passes them priority-sorted);
/// regions themselves are ordered by their first order.
pub fn partition(
    orders: &[OrderSnapshot],
    drivers: &[DriverSnapshot],
    config: &RegionConfig,
) -> Vec<Region> {
    if orders.is_empty() {
        return Vec::new();
    }

    let clusters = cluster_pickups(orders, config);

    let mut regions: Vec<Region> = clusters
        .into_iter()
        .map(|member_idxs| {
            let members: Vec<OrderSnapshot> =
                member_idxs.iter().map(|&i| orders[i].clone()).collect();
            let pickups: Vec<GeoPoint> = members.iter().map(|o| o.pickup).collect();
            let centroid = centroid(&pickups).expect("cluster is non-empty");
            Region {
                orders: members,
                drivers: Vec::new(),
                centroid,
            }
        })
        .collect();

    // Each driver serves the region with the nearest centroid.
    for driver in drivers {
        let Some(best) = regions
            .iter_mut()
            .min_by(|a, b| {
                let da = driver.position.haversine_km(&a.centroid);
                let db = driver.position.haversine_km(&b.centroid);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
        else {
            break;
        };
        best.drivers.push(driver.clone());
    }

    regions
}

/// Density clustering (DBSCAN without the core/border distinction we don't
/// need): seeds expand through neighbours within `max_radius_km`; sparse
/// points fall out as singletons.
fn cluster_pickups(orders: &[OrderSnapshot], config: &RegionConfig) -> Vec<Vec<usize>> {
    let n = orders.len();
    let eps_km = config.max_radius_km.max(0.0);
    let min_points = config.min_points_per_region.max(1);

    let neighbours = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| {
                j != i && orders[i].pickup.haversine_km(&orders[j].pickup) <= eps_km
            })
            .collect()
    };

    let mut assigned = vec![false; n];
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut singletons: Vec<usize> = Vec::new();

    for seed in 0..n {
        if assigned[seed] {
            continue;
        }
        let seed_neighbours = neighbours(seed);
        // Seed included in the density count.
        if seed_neighbours.len() + 1 < min_points {
            assigned[seed] = true;
            singletons.push(seed);
            continue;
        }

        // Breadth-first expansion through unassigned neighbours.
        let mut members = vec![seed];
        assigned[seed] = true;
        let mut frontier = seed_neighbours;
        while let Some(next) = frontier.pop() {
            if assigned[next] {
                continue;
            }
            assigned[next] = true;
            members.push(next);
            frontier.extend(neighbours(next).into_iter().filter(|&j| !assigned[j]));
        }
        members.sort_unstable();
        clusters.push(members);
    }

    // Trailing singleton regions for sparse orders, in input order.
    clusters.extend(singletons.into_iter().map(|i| vec![i]));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::prelude::Entity;
    use std::collections::HashSet;

    fn order(raw: u32, lat: f64, lng: f64) -> OrderSnapshot {
        OrderSnapshot {
            id: Entity::from_raw(raw),
            pickup: GeoPoint::new(lat, lng).unwrap(),
            dropoff: GeoPoint::new(lat + 0.01, lng).unwrap(),
            effective_priority: 5.0,
            created_at_ms: raw as u64,
            rejected_drivers: HashSet::new(),
        }
    }

    fn driver(raw: u32, lat: f64, lng: f64) -> DriverSnapshot {
        DriverSnapshot {
            id: Entity::from_raw(raw),
            position: GeoPoint::new(lat, lng).unwrap(),
            capacity: 3,
        }
    }

    #[test]
    fn two_cities_make_two_regions() {
        // Berlin cluster and Munich cluster, ~500 km apart.
        let orders = vec![
            order(1, 52.52, 13.41),
            order(2, 52.53, 13.42),
            order(3, 48.14, 11.58),
            order(4, 48.15, 11.59),
        ];
        let drivers = vec![driver(10, 52.50, 13.40), driver(11, 48.13, 11.57)];

        let regions = partition(&orders, &drivers, &RegionConfig::default());
        assert_eq!(regions.len(), 2);

        // Drivers went to their own city.
        let berlin = &regions[0];
        assert_eq!(berlin.orders.len(), 2);
        assert_eq!(berlin.drivers.len(), 1);
        assert_eq!(berlin.drivers[0].id, Entity::from_raw(10));

        let munich = &regions[1];
        assert_eq!(munich.drivers[0].id, Entity::from_raw(11));

        // No order in two regions.
        let mut seen = HashSet::new();
        for region in &regions {
            for o in &region.orders {
                assert!(seen.insert(o.id));
            }
        }
    }

    #[test]
    fn remote_order_becomes_trailing_singleton() {
        let orders = vec![
            order(1, 52.52, 13.41),
            order(2, 52.53, 13.42),
            order(3, 40.71, -74.00), // New York
        ];
        let regions = partition(&orders, &[], &RegionConfig::default());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[1].orders.len(), 1);
        assert_eq!(regions[1].orders[0].id, Entity::from_raw(3));
    }

    #[test]
    fn empty_orders_yield_no_regions() {
        let regions = partition(&[], &[driver(1, 52.5, 13.4)], &RegionConfig::default());
        assert!(regions.is_empty());
    }

    #[test]
    fn min_points_one_keeps_singletons_as_clusters() {
        let config = RegionConfig {
            max_radius_km: 50.0,
            min_points_per_region: 1,
        };
        let orders = vec![order(1, 52.52, 13.41)];
        let regions = partition(&orders, &[], &config);
        assert_eq!(regions.len(), 1);
    }
}
