//! Nearest-leader routing
//!
//! A linear haversine scan over active leaders. Leaders arrive oldest first,
//! so on equal distance the earliest-created leader wins.

use civitas_common::models::Leader;
use civitas_common::{Coordinates, Result};
use sqlx::SqlitePool;

use crate::db::leaders;

/// Routing outcome
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub leader: Leader,
    pub distance_km: f64,
}

/// Pick the closest leader to `point`
///
/// Returns `None` when `leaders` is empty or every leader lies beyond
/// `max_distance_km`.
pub fn nearest_leader<'a>(
    leaders: &'a [Leader],
    point: &Coordinates,
    max_distance_km: Option<f64>,
) -> Option<(&'a Leader, f64)> {
    let mut best: Option<(&Leader, f64)> = None;

    for leader in leaders {
        let location = Coordinates {
            latitude: leader.latitude,
            longitude: leader.longitude,
        };
        let distance = point.distance_km(&location);

        if max_distance_km.is_some_and(|max| distance > max) {
            continue;
        }
        // strict comparison keeps the earlier leader on ties
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((leader, distance));
        }
    }

    best
}

/// Load active leaders and route `point` to the nearest one
pub async fn route_incident(
    pool: &SqlitePool,
    point: &Coordinates,
    max_distance_km: Option<f64>,
) -> Result<Option<RouteMatch>> {
    let candidates = leaders::active_leaders(pool).await?;
    Ok(
        nearest_leader(&candidates, point, max_distance_km).map(|(leader, distance_km)| {
            RouteMatch {
                leader: leader.clone(),
                distance_km,
            }
        }),
    )
}
