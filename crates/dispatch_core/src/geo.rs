//! Geographic primitives: validated WGS-84 points, Haversine distances, and
//! the 0.001° grid used for distance-cache keys.
//!
//! Coordinate order conventions:
//!
//! - API payloads carry `{lat, lng}` objects ([`LatLngPayload`]).
//! - Routing providers consume `(lng, lat)` pairs ([`GeoPoint::provider_coord`]).
//!
//! The Haversine implementation mirrors the exact formulation used for all
//! pre-filters and straight-line estimates; it must not be swapped for a
//! different spherical model without revisiting the determinism tests.

use h3o::{CellIndex, Resolution};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Grid quantisation step for distance-cache keys: 0.001° ≈ 100 m.
const GRID_STEP_DEG: f64 = 0.001;

/// A validated WGS-84 coordinate. Construction rejects non-finite and
/// out-of-range values, so every `GeoPoint` in the engine is safe to hand to
/// h3o or a routing provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LatLngPayload", into = "LatLngPayload")]
pub struct GeoPoint {
    lat: f64,
    lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, DispatchError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(DispatchError::InvalidCoordinates(format!(
                "non-finite coordinate ({lat}, {lng})"
            )));
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(DispatchError::CoordinateOutOfRange(format!(
                "({lat}, {lng}) outside WGS-84 bounds"
            )));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// `(lng, lat)` pair in the order routing providers expect.
    pub fn provider_coord(&self) -> (f64, f64) {
        (self.lng, self.lat)
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn haversine_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lon1) = (self.lat.to_radians(), self.lng.to_radians());
        let (lat2, lon2) = (other.lat.to_radians(), other.lng.to_radians());
        let dlat = lat2 - lat1;
        let dlon = lon2 - lon1;
        let sin_dlat = (dlat * 0.5).sin();
        let sin_dlon = (dlon * 0.5).sin();
        let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
        let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
        EARTH_RADIUS_KM * c
    }

    /// Great-circle distance to `other` in metres.
    pub fn haversine_m(&self, other: &GeoPoint) -> f64 {
        self.haversine_km(other) * 1000.0
    }

    /// H3 cell containing this point at the given resolution.
    pub fn to_cell(&self, resolution: Resolution) -> CellIndex {
        h3o::LatLng::new(self.lat, self.lng)
            .expect("GeoPoint is validated at construction")
            .to_cell(resolution)
    }
}

/// Wire shape of a geographic point in API payloads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLngPayload {
    pub lat: f64,
    pub lng: f64,
}

impl TryFrom<LatLngPayload> for GeoPoint {
    type Error = DispatchError;

    fn try_from(value: LatLngPayload) -> Result<Self, Self::Error> {
        GeoPoint::new(value.lat, value.lng)
    }
}

impl From<GeoPoint> for LatLngPayload {
    fn from(point: GeoPoint) -> Self {
        Self {
            lat: point.lat,
            lng: point.lng,
        }
    }
}

/// A 0.001° grid cell (~100 m). Cache keys quantise both endpoints to this
/// grid so that nearby lookups share entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    lat_milli: i32,
    lng_milli: i32,
}

impl GridCell {
    pub fn of(point: GeoPoint) -> Self {
        Self {
            lat_milli: (point.lat / GRID_STEP_DEG).round() as i32,
            lng_milli: (point.lng / GRID_STEP_DEG).round() as i32,
        }
    }

    /// Centre of the grid cell.
    pub fn center(&self) -> GeoPoint {
        GeoPoint {
            lat: self.lat_milli as f64 * GRID_STEP_DEG,
            lng: self.lng_milli as f64 * GRID_STEP_DEG,
        }
    }
}

/// Canonically ordered grid-cell pair: (A, B) and (B, A) map to the same key.
pub fn canonical_cell_pair(a: GeoPoint, b: GeoPoint) -> (GridCell, GridCell) {
    let (ca, cb) = (GridCell::of(a), GridCell::of(b));
    if ca <= cb {
        (ca, cb)
    } else {
        (cb, ca)
    }
}

/// Arithmetic-mean centroid. `None` for an empty slice.
pub fn centroid(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let lat = points.iter().map(|p| p.lat).sum::<f64>() / n;
    let lng = points.iter().map(|p| p.lng).sum::<f64>() / n;
    // Means of valid coordinates stay in range.
    Some(GeoPoint { lat, lng })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_and_non_finite() {
        assert!(matches!(
            GeoPoint::new(91.0, 0.0),
            Err(DispatchError::CoordinateOutOfRange(_))
        ));
        assert!(matches!(
            GeoPoint::new(0.0, 200.0),
            Err(DispatchError::CoordinateOutOfRange(_))
        ));
        assert!(matches!(
            GeoPoint::new(f64::NAN, 0.0),
            Err(DispatchError::InvalidCoordinates(_))
        ));
    }

    #[test]
    fn haversine_known_distance() {
        // Berlin Alexanderplatz -> Brandenburg Gate, roughly 2.8 km.
        let a = GeoPoint::new(52.5219, 13.4132).unwrap();
        let b = GeoPoint::new(52.5163, 13.3777).unwrap();
        let d = a.haversine_km(&b);
        assert!(d > 2.0 && d < 3.5, "got {d}");
        // Symmetric.
        assert!((d - b.haversine_km(&a)).abs() < 1e-12);
    }

    #[test]
    fn cell_pair_is_symmetric() {
        let a = GeoPoint::new(52.52, 13.41).unwrap();
        let b = GeoPoint::new(52.49, 13.37).unwrap();
        assert_eq!(canonical_cell_pair(a, b), canonical_cell_pair(b, a));
    }

    #[test]
    fn nearby_points_share_a_grid_cell() {
        // ~10 m apart, same 0.001° cell after rounding.
        let a = GeoPoint::new(52.520001, 13.410001).unwrap();
        let b = GeoPoint::new(52.520080, 13.410090).unwrap();
        assert_eq!(GridCell::of(a), GridCell::of(b));
    }

    #[test]
    fn payload_round_trip() {
        let p = GeoPoint::new(52.52, 13.41).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"lat\""));
        let back: GeoPoint = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
        assert!(serde_json::from_str::<GeoPoint>("{\"lat\":99.0,\"lng\":0.0}").is_err());
    }

    #[test]
    fn centroid_of_two_points() {
        let a = GeoPoint::new(10.0, 0.0).unwrap();
        let b = GeoPoint::new(20.0, 0.0).unwrap();
        let c = centroid(&[a, b]).unwrap();
        assert!((c.lat() - 15.0).abs() < 1e-9);
        assert!(centroid(&[]).is_none());
    }
}
