//! Pluggable routing providers: trait abstraction for road-network backends.
//!
//! Two implementations:
//!
//! - [`HaversineProvider`]: straight-line distance at a profile free-flow
//!   speed. Zero dependencies, fully deterministic; doubles as the fallback
//!   estimator when the road-network provider fails.
//! - `osrm::OsrmProvider` (feature `osrm`): calls an OSRM HTTP endpoint for
//!   `/route` and `/table`.
//!
//! Providers speak `(lng, lat)` coordinate order; [`crate::geo::GeoPoint`]
//! does the conversion.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::DispatchError;
use crate::geo::GeoPoint;

/// Routing profile tag; part of every distance-cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RoutingProfile {
    #[default]
    Driving,
    Cycling,
    Walking,
}

impl RoutingProfile {
    pub fn tag(&self) -> &'static str {
        match self {
            RoutingProfile::Driving => "driving",
            RoutingProfile::Cycling => "cycling",
            RoutingProfile::Walking => "walking",
        }
    }

    /// Free-flow speed used for straight-line duration estimates.
    pub fn freeflow_kmh(&self) -> f64 {
        match self {
            RoutingProfile::Driving => 40.0,
            RoutingProfile::Cycling => 15.0,
            RoutingProfile::Walking => 5.0,
        }
    }
}

/// Errors from a routing backend. `Timeout` and `Transport` are transient;
/// the rest are deterministic for the given input.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,

    #[error("provider rejected the request: {0}")]
    Rejected(String),

    #[error("no route between the given points")]
    NoRoute,

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Timeout | ProviderError::Transport(_))
    }
}

impl From<ProviderError> for DispatchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => DispatchError::ProviderTimeout,
            ProviderError::Transport(msg) => DispatchError::ProviderRejected(msg),
            other => DispatchError::ProviderRejected(other.to_string()),
        }
    }
}

/// Result of a single-pair route query.
#[derive(Debug, Clone)]
pub struct RouteSummary {
    pub distance_m: f64,
    pub duration_s: f64,
    /// `(lat, lng)` waypoints along the road, when the backend returns them.
    pub geometry: Option<Vec<(f64, f64)>>,
}

/// Result of a matrix query: `values[i][j]`, `None` where the backend could
/// not produce a value.
#[derive(Debug, Clone)]
pub struct MatrixResponse {
    pub distances_m: Vec<Vec<Option<f64>>>,
    pub durations_s: Vec<Vec<Option<f64>>>,
}

/// Trait for routing backends. Implementations must be `Send + Sync`; the
/// oracle is shared across the rayon pool.
pub trait RouteProvider: Send + Sync {
    fn route(
        &self,
        from: GeoPoint,
        to: GeoPoint,
        profile: RoutingProfile,
    ) -> Result<RouteSummary, ProviderError>;

    /// All-pairs matrix over `points`. Backends cap the point count; see
    /// [`crate::config::OracleConfig::max_matrix_points`].
    fn matrix(
        &self,
        points: &[GeoPoint],
        profile: RoutingProfile,
    ) -> Result<MatrixResponse, ProviderError>;
}

/// Straight-line provider: Haversine distance at the profile's free-flow
/// speed. Never fails.
#[derive(Debug, Default)]
pub struct HaversineProvider;

impl HaversineProvider {
    pub fn pair(from: GeoPoint, to: GeoPoint, profile: RoutingProfile) -> (f64, f64) {
        let distance_m = from.haversine_m(&to);
        let duration_s = distance_m / 1000.0 / profile.freeflow_kmh() * 3600.0;
        (distance_m, duration_s)
    }
}

impl RouteProvider for HaversineProvider {
    fn route(
        &self,
        from: GeoPoint,
        to: GeoPoint,
        profile: RoutingProfile,
    ) -> Result<RouteSummary, ProviderError> {
        let (distance_m, duration_s) = Self::pair(from, to, profile);
        Ok(RouteSummary {
            distance_m,
            duration_s,
            geometry: None,
        })
    }

    fn matrix(
        &self,
        points: &[GeoPoint],
        profile: RoutingProfile,
    ) -> Result<MatrixResponse, ProviderError> {
        let n = points.len();
        let mut distances = vec![vec![Some(0.0); n]; n];
        let mut durations = vec![vec![Some(0.0); n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (d, t) = Self::pair(points[i], points[j], profile);
                distances[i][j] = Some(d);
                durations[i][j] = Some(t);
            }
        }
        Ok(MatrixResponse {
            distances_m: distances,
            durations_s: durations,
        })
    }
}

#[cfg(feature = "osrm")]
pub mod osrm {
    //! OSRM HTTP backend (`/route/v1` and `/table/v1`).

    use std::time::Duration;

    use reqwest::blocking::Client;
    use serde::Deserialize;

    use super::{MatrixResponse, ProviderError, RouteProvider, RouteSummary, RoutingProfile};
    use crate::geo::GeoPoint;

    /// Hard cap imposed by the external matrix API.
    pub const MAX_MATRIX_POINTS: usize = 25;

    pub struct OsrmProvider {
        client: Client,
        endpoint: String,
    }

    impl OsrmProvider {
        pub fn new(endpoint: &str, timeout_ms: u64) -> Self {
            let client = Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .expect("failed to build OSRM client");
            Self {
                client,
                endpoint: endpoint.trim_end_matches('/').to_string(),
            }
        }

        fn coord_segment(points: &[GeoPoint]) -> String {
            points
                .iter()
                .map(|p| {
                    let (lng, lat) = p.provider_coord();
                    format!("{lng},{lat}")
                })
                .collect::<Vec<_>>()
                .join(";")
        }

        fn map_transport_error(err: reqwest::Error) -> ProviderError {
            if err.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(err.to_string())
            }
        }
    }

    #[derive(Deserialize)]
    struct OsrmRouteResponse {
        code: String,
        routes: Option<Vec<OsrmRoute>>,
    }

    #[derive(Deserialize)]
    struct OsrmRoute {
        distance: f64, // metres
        duration: f64, // seconds
        geometry: Option<OsrmGeometry>,
    }

    #[derive(Deserialize)]
    struct OsrmGeometry {
        coordinates: Vec<Vec<f64>>, // [lng, lat]
    }

    #[derive(Deserialize)]
    struct OsrmTableResponse {
        code: String,
        distances: Option<Vec<Vec<Option<f64>>>>,
        durations: Option<Vec<Vec<Option<f64>>>>,
    }

    impl RouteProvider for OsrmProvider {
        fn route(
            &self,
            from: GeoPoint,
            to: GeoPoint,
            profile: RoutingProfile,
        ) -> Result<RouteSummary, ProviderError> {
            let url = format!(
                "{}/route/v1/{}/{}?overview=full&geometries=geojson",
                self.endpoint,
                profile.tag(),
                Self::coord_segment(&[from, to]),
            );

            let response = self
                .client
                .get(&url)
                .send()
                .map_err(Self::map_transport_error)?;
            let parsed: OsrmRouteResponse =
                response.json().map_err(Self::map_transport_error)?;

            if parsed.code != "Ok" {
                return Err(ProviderError::Rejected(parsed.code));
            }
            let route = parsed
                .routes
                .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
                .ok_or(ProviderError::NoRoute)?;

            let geometry = route.geometry.map(|g| {
                g.coordinates
                    .iter()
                    .filter(|c| c.len() >= 2)
                    .map(|c| (c[1], c[0])) // OSRM returns [lng, lat]; we store (lat, lng)
                    .collect()
            });

            Ok(RouteSummary {
                distance_m: route.distance,
                duration_s: route.duration,
                geometry,
            })
        }

        fn matrix(
            &self,
            points: &[GeoPoint],
            profile: RoutingProfile,
        ) -> Result<MatrixResponse, ProviderError> {
            if points.len() > MAX_MATRIX_POINTS {
                return Err(ProviderError::Rejected(format!(
                    "matrix limited to {MAX_MATRIX_POINTS} points, got {}",
                    points.len()
                )));
            }

            let url = format!(
                "{}/table/v1/{}/{}?annotations=distance,duration",
                self.endpoint,
                profile.tag(),
                Self::coord_segment(points),
            );

            let response = self
                .client
                .get(&url)
                .send()
                .map_err(Self::map_transport_error)?;
            let parsed: OsrmTableResponse =
                response.json().map_err(Self::map_transport_error)?;

            if parsed.code != "Ok" {
                return Err(ProviderError::Rejected(parsed.code));
            }
            let n = points.len();
            Ok(MatrixResponse {
                distances_m: parsed.distances.unwrap_or_else(|| vec![vec![None; n]; n]),
                durations_s: parsed.durations.unwrap_or_else(|| vec![vec![None; n]; n]),
            })
        }
    }
}
