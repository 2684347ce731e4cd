//! Enrichment engine: load boundary data, then enrich points with it.
//!
//! `load` and `enrich` take `&mut self`; one engine serves one caller at a
//! time. Each enrich call works against a single store snapshot.

use geo::Point;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EnrichError, Result};
use crate::merge::merge_features;
use crate::models::{BoundaryType, DataType, Field, Index, Selection, Table, Value};
use crate::quadkey::{self, DEFAULT_ZOOM, MAX_ZOOM};
use crate::resolve::crosswalk::identifier_keys;
use crate::resolve::{
    intersect_points, join_points, resolve_duplicates, Crosswalk, ParcelIndex, PointColumns,
    RankingRule,
};
use crate::selector::select_boundaries;
use crate::source::BoundarySource;
use crate::store::{BoundaryStore, BoundaryTable, StoreSnapshot};

/// Input column holding identifiers of one boundary type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierColumn {
    pub boundary: BoundaryType,
    pub column: String,
}

/// How to resolve the rows of an enrich call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichRequest {
    pub latitude_column: Option<String>,
    pub longitude_column: Option<String>,
    /// When set, rows are resolved by this identifier column instead of by location
    pub identifier: Option<IdentifierColumn>,
    pub rule: RankingRule,
    /// Quadkey zoom for the crosswalk join, `1..=MAX_ZOOM`
    pub zoom: u8,
    /// Keep each row's quadkey in a `qk` output column (location mode only)
    pub keep_quadkey: bool,
}

/// Output column holding the quadkey when it is kept
pub const QUADKEY_COLUMN: &str = "qk";

impl Default for EnrichRequest {
    fn default() -> Self {
        Self {
            latitude_column: None,
            longitude_column: None,
            identifier: None,
            rule: RankingRule::default(),
            zoom: DEFAULT_ZOOM,
            keep_quadkey: false,
        }
    }
}

impl EnrichRequest {
    /// Resolve by the table's geometry column
    pub fn geometry() -> Self {
        Self::default()
    }

    /// Resolve by latitude/longitude columns (a geometry column still wins)
    pub fn coordinates(latitude: &str, longitude: &str) -> Self {
        Self {
            latitude_column: Some(latitude.to_string()),
            longitude_column: Some(longitude.to_string()),
            ..Self::default()
        }
    }

    /// Resolve by an identifier column, e.g. a raw census block group code
    pub fn identifier(boundary: BoundaryType, column: &str) -> Self {
        Self {
            identifier: Some(IdentifierColumn {
                boundary,
                column: column.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn with_rule(mut self, rule: RankingRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_quadkey_column(mut self) -> Self {
        self.keep_quadkey = true;
        self
    }
}

/// Parcel index together with the parcel table it was built for
struct CachedParcels {
    table: Arc<BoundaryTable>,
    index: Arc<ParcelIndex>,
}

pub struct EnrichEngine<S> {
    source: S,
    store: BoundaryStore,
    crosswalk: Option<Arc<Crosswalk>>,
    parcels: Option<CachedParcels>,
}

impl<S: BoundarySource> EnrichEngine<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            store: BoundaryStore::new(),
            crosswalk: None,
            parcels: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current view of the resident boundary tables
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.store.snapshot()
    }

    /// Load the selected boundaries and features, evicting everything else.
    ///
    /// With no boundaries and no features, every crosswalk-backed boundary is
    /// loaded in full. Repeating a load is a no-op.
    pub fn load<T: AsRef<str>>(&mut self, boundaries: &[T], features: &[T]) -> Result<()> {
        let selection = select_boundaries(boundaries, features);
        info!(
            "Will load boundaries {:?}",
            selection.keys().map(|b| b.name()).collect::<Vec<_>>()
        );
        let source = &self.source;
        let snapshot = self
            .store
            .reconcile(&selection, |b, f| source.load_boundary(b, f))?;
        self.drop_stale_parcels(&snapshot);
        Ok(())
    }

    /// Enrich a table with the features of the resident boundaries.
    ///
    /// The result has the input's rows, index and columns, plus one
    /// `<feature>_<type>` column per boundary feature.
    pub fn enrich(&mut self, points: &Table, request: &EnrichRequest) -> Result<Table> {
        info!("Enriching {} rows", points.len());
        let enriched = match &request.identifier {
            Some(identifier) => self.enrich_by_identifier(points, identifier)?,
            None => self.enrich_by_location(points, request)?,
        };
        debug!("Enriched table has {} columns", enriched.fields().len());
        Ok(enriched)
    }

    /// Enrich bare `(lon, lat)` pairs. The result is indexed `0..n` under
    /// `index_name` and carries the points in a `geometry` column.
    pub fn enrich_points(&mut self, points: &[(f64, f64)], index_name: &str) -> Result<Table> {
        let rows = points
            .iter()
            .map(|&(lon, lat)| vec![Value::Point(Point::new(lon, lat))])
            .collect();
        let table = Table::new(
            vec![Field::new("geometry", DataType::Point)],
            rows,
            Index::range(points.len()).with_name(index_name),
        )
        .with_geometry("geometry");
        self.enrich(&table, &EnrichRequest::geometry())
    }

    fn enrich_by_identifier(
        &mut self,
        points: &Table,
        identifier: &IdentifierColumn,
    ) -> Result<Table> {
        let keys = identifier_keys(points, identifier.boundary, &identifier.column)?;

        let source = &self.source;
        let snapshot = self
            .store
            .ensure(identifier.boundary, |b, f| source.load_boundary(b, f))?;
        let table = snapshot
            .get(identifier.boundary)
            .ok_or(EnrichError::NotLoaded(identifier.boundary))?;

        let selection: Selection = [(identifier.boundary, table.features().clone())]
            .into_iter()
            .collect();
        merge_features(points, &keys, &snapshot, &selection)
    }

    fn enrich_by_location(&mut self, points: &Table, request: &EnrichRequest) -> Result<Table> {
        let columns = PointColumns::for_table(
            points,
            request.latitude_column.as_deref(),
            request.longitude_column.as_deref(),
        )?;
        if request.zoom == 0 || request.zoom > MAX_ZOOM {
            return Err(EnrichError::InvalidZoom {
                zoom: request.zoom,
                max: MAX_ZOOM,
            });
        }
        if request.keep_quadkey && points.has_column(QUADKEY_COLUMN) {
            return Err(EnrichError::ReservedColumn(QUADKEY_COLUMN.to_string()));
        }

        let snapshot = if self.store.snapshot().is_empty() {
            info!("No boundaries loaded, loading defaults");
            let source = &self.source;
            let defaults: Selection = select_boundaries::<&str>(&[], &[]);
            self.store
                .reconcile(&defaults, |b, f| source.load_boundary(b, f))?
        } else {
            self.store.snapshot()
        };
        let selection = snapshot.selection();
        let locations = columns.points(points);
        let expected = points.len();

        let mut keys = if selection.keys().any(|b| b.is_crosswalk_backed()) {
            let crosswalk = self.crosswalk()?;
            let matches = join_points(&locations, &crosswalk, request.zoom);
            let resolved = resolve_duplicates(matches, request.rule);
            if resolved.len() != expected {
                return Err(EnrichError::RowCountMismatch {
                    stage: "crosswalk join",
                    expected,
                    actual: resolved.len(),
                });
            }
            resolved
        } else {
            Table::from_rows(Vec::new(), vec![Vec::new(); expected])
        };

        if selection.contains_key(&BoundaryType::Parcel) {
            let index = self.parcel_index(&snapshot)?;
            let parcel_keys = intersect_points(&locations, &index)?;
            let field = parcel_keys.fields()[0].clone();
            let values = parcel_keys.into_rows().into_iter().flatten().collect();
            keys.push_column(field, values);
        }

        let mut enriched = merge_features(points, &keys, &snapshot, &selection)?;
        if request.keep_quadkey {
            let quadkeys = locations
                .iter()
                .map(|p| {
                    p.and_then(|p| quadkey::from_geo(p.y(), p.x(), request.zoom))
                        .map_or(Value::Null, Value::Text)
                })
                .collect();
            enriched.push_column(Field::new(QUADKEY_COLUMN, DataType::Text), quadkeys);
        }
        Ok(enriched)
    }

    /// Crosswalk, loaded on first use and kept for the engine's lifetime
    fn crosswalk(&mut self) -> Result<Arc<Crosswalk>> {
        if let Some(crosswalk) = &self.crosswalk {
            debug!("Crosswalk data already loaded");
            return Ok(Arc::clone(crosswalk));
        }
        let crosswalk = Arc::new(Crosswalk::from_table(self.source.load_crosswalk()?)?);
        info!("Loaded {} crosswalk rows", crosswalk.len());
        self.crosswalk = Some(Arc::clone(&crosswalk));
        Ok(crosswalk)
    }

    /// Parcel index for the parcel table of `snapshot`, rebuilt when that
    /// table was reloaded
    fn parcel_index(&mut self, snapshot: &StoreSnapshot) -> Result<Arc<ParcelIndex>> {
        let table = snapshot
            .get(BoundaryType::Parcel)
            .ok_or(EnrichError::NotLoaded(BoundaryType::Parcel))?;
        if let Some(cached) = &self.parcels {
            if Arc::ptr_eq(&cached.table, table) {
                return Ok(Arc::clone(&cached.index));
            }
        }
        let index = Arc::new(ParcelIndex::build(self.source.load_parcels()?));
        self.parcels = Some(CachedParcels {
            table: Arc::clone(table),
            index: Arc::clone(&index),
        });
        Ok(index)
    }

    fn drop_stale_parcels(&mut self, snapshot: &StoreSnapshot) {
        let stale = match (&self.parcels, snapshot.get(BoundaryType::Parcel)) {
            (Some(cached), Some(table)) => !Arc::ptr_eq(&cached.table, table),
            (Some(_), None) => true,
            (None, _) => false,
        };
        if stale {
            debug!("Dropping parcel index");
            self.parcels = None;
        }
    }
}
