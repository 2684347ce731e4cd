//! Error type shared by the enrichment engine and its data sources.

use std::path::PathBuf;
use thiserror::Error;

use crate::models::BoundaryType;

pub type Result<T> = std::result::Result<T, EnrichError>;

#[derive(Debug, Error)]
pub enum EnrichError {
    /// A storage location could not be opened or read
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A table file was not valid CSV
    #[error("failed to parse table {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A parquet table could not be opened
    #[error("failed to read parquet table {path}")]
    Parquet {
        path: PathBuf,
        #[source]
        source: parquet::errors::ParquetError,
    },

    /// A parquet column could not be converted
    #[error("failed to decode columns of {path}")]
    Arrow {
        path: PathBuf,
        #[source]
        source: arrow::error::ArrowError,
    },

    /// A geometry cell could not be decoded
    #[error("invalid geometry for {boundary} boundary {id}")]
    Geometry {
        boundary: BoundaryType,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    /// Polygons were requested from a package that stores them in a representation we cannot decode
    #[error("{boundary} polygons are stored as {representation}, which cannot be decoded")]
    UnsupportedGeometry {
        boundary: BoundaryType,
        representation: &'static str,
    },

    /// A loaded table lacks a column it must have
    #[error("table for {table} has no column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A requested feature is not part of the boundary table
    #[error("feature '{feature}' is not available for boundary {boundary}")]
    MissingFeature {
        boundary: BoundaryType,
        feature: String,
    },

    /// The same identifier appears twice in one boundary table
    #[error("boundary {boundary} contains identifier '{id}' more than once")]
    DuplicateBoundaryId { boundary: BoundaryType, id: String },

    /// Resolved rows carry no join key for a selected boundary
    #[error("no '{column}' join key available to merge boundary {boundary}")]
    MissingJoinKey {
        boundary: BoundaryType,
        column: String,
    },

    /// A selected boundary is not resident in the store snapshot
    #[error("boundary {0} is not loaded")]
    NotLoaded(BoundaryType),

    /// A merged column would overwrite an existing output column
    #[error("column '{column}' from boundary {boundary} already exists in the input")]
    ColumnCollision {
        boundary: BoundaryType,
        column: String,
    },

    /// Coordinate lookup without coordinates
    #[error("coordinate enrichment needs a geometry column or both latitude and longitude columns")]
    MissingCoordinates,

    /// Quadkey zoom outside the supported levels
    #[error("zoom level {zoom} is outside 1..={max}")]
    InvalidZoom { zoom: u8, max: u8 },

    /// An output column the engine adds is already present in the input
    #[error("column '{0}' already exists in the input")]
    ReservedColumn(String),

    /// A join changed the number of rows
    #[error("{stage} produced {actual} rows for {expected} input rows")]
    RowCountMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },
}
