//! Driver spatial index: H3 cell → driver mappings for "drivers within R
//! metres of P" queries.
//!
//! Resolution 7 cells (~1.2 km edge) keep the grid-disk small for the radii
//! the matcher uses. The index returns *candidates* from the covering disk;
//! callers refine with the exact Haversine distance against the driver's
//! latest location.

use std::collections::{BTreeSet, HashMap};

use bevy_ecs::prelude::{Entity, Resource};
use h3o::{CellIndex, Resolution};

use crate::geo::GeoPoint;

/// Index resolution; ~1.2 km average hex edge.
pub const INDEX_RESOLUTION: Resolution = Resolution::Seven;

/// Approximate hex edge length at [`INDEX_RESOLUTION`], in km.
const CELL_EDGE_KM: f64 = 1.2;

#[derive(Debug, Default, Resource)]
pub struct DriverSpatialIndex {
    by_cell: HashMap<CellIndex, BTreeSet<Entity>>,
    cell_of: HashMap<Entity, CellIndex>,
}

impl DriverSpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a driver to the cell containing `point`.
    pub fn upsert(&mut self, driver: Entity, point: GeoPoint) {
        let cell = point.to_cell(INDEX_RESOLUTION);
        if let Some(old) = self.cell_of.insert(driver, cell) {
            if old == cell {
                return;
            }
            if let Some(set) = self.by_cell.get_mut(&old) {
                set.remove(&driver);
                if set.is_empty() {
                    self.by_cell.remove(&old);
                }
            }
        }
        self.by_cell.entry(cell).or_default().insert(driver);
    }

    pub fn remove(&mut self, driver: Entity) {
        let Some(cell) = self.cell_of.remove(&driver) else {
            return;
        };
        if let Some(set) = self.by_cell.get_mut(&cell) {
            set.remove(&driver);
            if set.is_empty() {
                self.by_cell.remove(&cell);
            }
        }
    }

    pub fn cell_of(&self, driver: Entity) -> Option<CellIndex> {
        self.cell_of.get(&driver).copied()
    }

    /// Drivers whose indexed cell lies within the disk covering `radius_m`
    /// around `center`. Deterministically ordered by entity id. Callers must
    /// apply the exact distance filter themselves.
    pub fn candidates_within(&self, center: GeoPoint, radius_m: f64) -> Vec<Entity> {
        let k = ((radius_m / 1000.0) / CELL_EDGE_KM).ceil() as u32 + 1;
        let origin = center.to_cell(INDEX_RESOLUTION);
        let mut out = BTreeSet::new();
        for cell in origin.grid_disk::<Vec<_>>(k) {
            if let Some(set) = self.by_cell.get(&cell) {
                out.extend(set.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.cell_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_of.is_empty()
    }
}
