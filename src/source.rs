//! Data sources the engine loads boundary, crosswalk and parcel data from.

use hashbrown::HashMap;
use std::cell::Cell;
use std::path::PathBuf;

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, FeatureSet, Table};
use crate::resolve::ParcelPolygon;

/// Supplies the tables the enrichment engine works on.
///
/// Failures are fatal to the calling `load`/`enrich` and propagate unchanged.
pub trait BoundarySource {
    /// Raw feature table of one boundary type, with an `id` column and
    /// unsuffixed column names. `features` is a projection hint; the store
    /// applies the selection itself.
    fn load_boundary(&self, boundary: BoundaryType, features: &FeatureSet) -> Result<Table>;

    /// Quadkey crosswalk: an `id` quadkey column plus `<type>_id` columns
    fn load_crosswalk(&self) -> Result<Table>;

    /// Parcel polygons, in layer order
    fn load_parcels(&self) -> Result<Vec<ParcelPolygon>>;
}

fn not_found(what: impl Into<PathBuf>) -> EnrichError {
    EnrichError::Io {
        path: what.into(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    }
}

/// Source backed by tables already in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    boundaries: HashMap<BoundaryType, Table>,
    crosswalk: Option<Table>,
    parcels: Vec<ParcelPolygon>,
    boundary_loads: Cell<usize>,
    crosswalk_loads: Cell<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boundary(mut self, boundary: BoundaryType, table: Table) -> Self {
        self.boundaries.insert(boundary, table);
        self
    }

    pub fn with_crosswalk(mut self, table: Table) -> Self {
        self.crosswalk = Some(table);
        self
    }

    pub fn with_parcels(mut self, parcels: Vec<ParcelPolygon>) -> Self {
        self.parcels = parcels;
        self
    }

    /// Number of boundary tables handed out so far
    pub fn boundary_loads(&self) -> usize {
        self.boundary_loads.get()
    }

    /// Number of times the crosswalk was handed out
    pub fn crosswalk_loads(&self) -> usize {
        self.crosswalk_loads.get()
    }
}

impl BoundarySource for MemorySource {
    fn load_boundary(&self, boundary: BoundaryType, _features: &FeatureSet) -> Result<Table> {
        let table = self
            .boundaries
            .get(&boundary)
            .ok_or_else(|| not_found(boundary.name()))?;
        self.boundary_loads.set(self.boundary_loads.get() + 1);
        Ok(table.clone())
    }

    fn load_crosswalk(&self) -> Result<Table> {
        let table = self.crosswalk.as_ref().ok_or_else(|| not_found("crosswalk"))?;
        self.crosswalk_loads.set(self.crosswalk_loads.get() + 1);
        Ok(table.clone())
    }

    fn load_parcels(&self) -> Result<Vec<ParcelPolygon>> {
        Ok(self.parcels.clone())
    }
}
