//! Local boundary data package: directory layout, tables and parcel polygons.
//!
//! A package directory holds one table per boundary type plus the quadkey
//! crosswalk, as parquet or (optionally gzipped) CSV:
//!
//! ```text
//! <base>/iggy-package[-wkt]-<version>[_<prefix>]/
//!     <prefix>_<type>_<version>[.parquet|.csv|.csv.gz|.gz]
//!     <crosswalk_prefix>_<version>[.parquet|.csv|.csv.gz|.gz]
//! ```
//!
//! Parquet files are recognized by extension or by their magic bytes, so the
//! extensionless files of a published package are read as parquet.

mod columnar;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use flate2::read::GzDecoder;
use geo::{LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, DataType, Field, FeatureSet, Table, Value};
use crate::resolve::ParcelPolygon;
use crate::source::BoundarySource;

pub const DEFAULT_DATA_PREFIX: &str = "unified";

/// Leading part of every package directory name
pub const PACKAGE_DIR_PREFIX: &str = "iggy-package";

/// Representation of the `geometry` column in package tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeomType {
    Json,
    #[default]
    Wkt,
}

impl GeomType {
    pub fn name(&self) -> &'static str {
        match self {
            GeomType::Json => "json",
            GeomType::Wkt => "wkt",
        }
    }
}

impl FromStr for GeomType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(GeomType::Json),
            "wkt" => Ok(GeomType::Wkt),
            other => Err(format!("unknown geometry type '{}'", other)),
        }
    }
}

fn default_data_prefix() -> String {
    DEFAULT_DATA_PREFIX.to_string()
}

/// Where a package lives and how its files are named
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PackageConfig {
    pub base_loc: PathBuf,
    pub version_id: String,
    pub crosswalk_prefix: String,
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
    #[serde(default)]
    pub geom_type: GeomType,
    /// Overrides the derived package directory
    #[serde(default)]
    pub data_loc: Option<PathBuf>,
    /// Overrides the derived crosswalk file
    #[serde(default)]
    pub crosswalk_loc: Option<PathBuf>,
}

impl PackageConfig {
    pub fn new(
        base_loc: impl Into<PathBuf>,
        version_id: impl Into<String>,
        crosswalk_prefix: impl Into<String>,
    ) -> Self {
        Self {
            base_loc: base_loc.into(),
            version_id: version_id.into(),
            crosswalk_prefix: crosswalk_prefix.into(),
            data_prefix: default_data_prefix(),
            geom_type: GeomType::default(),
            data_loc: None,
            crosswalk_loc: None,
        }
    }

    /// Package directory
    pub fn data_loc(&self) -> PathBuf {
        if let Some(loc) = &self.data_loc {
            return loc.clone();
        }
        let mut name = String::from(PACKAGE_DIR_PREFIX);
        if self.geom_type == GeomType::Wkt {
            name.push_str("-wkt");
        }
        name.push('-');
        name.push_str(&self.version_id);
        if self.data_prefix != DEFAULT_DATA_PREFIX {
            name.push('_');
            name.push_str(&self.data_prefix);
        }
        self.base_loc.join(name)
    }

    /// Table of one boundary type, without extension
    pub fn boundary_loc(&self, boundary: BoundaryType) -> PathBuf {
        self.data_loc().join(format!(
            "{}_{}_{}",
            self.data_prefix,
            boundary.name(),
            self.version_id
        ))
    }

    /// Quadkey crosswalk table, without extension
    pub fn crosswalk_loc(&self) -> PathBuf {
        if let Some(loc) = &self.crosswalk_loc {
            return loc.clone();
        }
        self.data_loc()
            .join(format!("{}_{}", self.crosswalk_prefix, self.version_id))
    }
}

/// Boundary source reading a package from the local filesystem
#[derive(Debug, Clone)]
pub struct LocalDataPackage {
    config: PackageConfig,
}

impl LocalDataPackage {
    pub fn new(config: PackageConfig) -> Self {
        info!("Using boundary package at {}", config.data_loc().display());
        Self { config }
    }

    pub fn config(&self) -> &PackageConfig {
        &self.config
    }
}

impl BoundarySource for LocalDataPackage {
    fn load_boundary(&self, boundary: BoundaryType, _features: &FeatureSet) -> Result<Table> {
        let path = resolve_table_path(&self.config.boundary_loc(boundary));
        info!("Loading {} boundary from {}", boundary, path.display());
        read_table(&path)
    }

    fn load_crosswalk(&self) -> Result<Table> {
        let path = resolve_table_path(&self.config.crosswalk_loc());
        info!("Loading crosswalk from {}", path.display());
        read_table(&path)
    }

    fn load_parcels(&self) -> Result<Vec<ParcelPolygon>> {
        let boundary = BoundaryType::Parcel;
        if self.config.geom_type == GeomType::Wkt {
            return Err(EnrichError::UnsupportedGeometry {
                boundary,
                representation: "WKT",
            });
        }

        let path = resolve_table_path(&self.config.boundary_loc(boundary));
        let table = read_table(&path)?;
        let missing = |column: &str| EnrichError::MissingColumn {
            table: path.display().to_string(),
            column: column.to_string(),
        };
        let id_col = table.column_index("id").ok_or_else(|| missing("id"))?;
        let geom_col = table
            .column_index("geometry")
            .ok_or_else(|| missing("geometry"))?;

        let mut parcels = Vec::with_capacity(table.len());
        for row in table.rows() {
            let (Some(id), Value::Text(geometry)) = (row[id_col].as_key(), &row[geom_col]) else {
                continue;
            };
            let geometry = parse_geojson(boundary, &id, geometry)?;
            parcels.push(ParcelPolygon { id, geometry });
        }
        info!("Loaded {} parcel polygons", parcels.len());
        Ok(parcels)
    }
}

/// First existing file among `path` and `path` with a parquet or CSV extension.
/// Falls back to `path` itself so that the read reports it as missing.
pub fn resolve_table_path(path: &Path) -> PathBuf {
    let base = path.as_os_str().to_owned();
    for suffix in ["", ".parquet", ".csv", ".csv.gz", ".gz"] {
        let mut candidate = base.clone();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return candidate;
        }
    }
    path.to_path_buf()
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

/// Identifier and geometry columns are never parsed as numbers, nor are the
/// caller's `text_columns`
fn is_text_column(name: &str, text_columns: &[&str]) -> bool {
    name == "id" || name.ends_with("_id") || name == "geometry" || text_columns.contains(&name)
}

fn parse_bool(cell: &str) -> Option<bool> {
    match cell {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Narrowest type every non-empty cell parses as: bool, int, float, text.
/// Columns without any value are read as floats.
fn infer_type(
    name: &str,
    records: &[StringRecord],
    col: usize,
    text_columns: &[&str],
) -> DataType {
    if is_text_column(name, text_columns) {
        return DataType::Text;
    }
    let (mut bool_ok, mut int_ok, mut float_ok) = (true, true, true);
    let mut seen = false;
    for cell in records.iter().filter_map(|r| r.get(col)).filter(|c| !c.is_empty()) {
        seen = true;
        bool_ok &= parse_bool(cell).is_some();
        int_ok &= cell.parse::<i64>().is_ok();
        float_ok &= cell.parse::<f64>().is_ok();
        if !(bool_ok || int_ok || float_ok) {
            return DataType::Text;
        }
    }
    if !seen {
        DataType::Float
    } else if bool_ok {
        DataType::Bool
    } else if int_ok {
        DataType::Int
    } else {
        DataType::Float
    }
}

fn parse_cell(cell: &str, dtype: DataType) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    let parsed = match dtype {
        DataType::Bool => parse_bool(cell).map(Value::Bool),
        DataType::Int => cell.parse().ok().map(Value::Int),
        DataType::Float => cell.parse().ok().map(Value::Float),
        DataType::Text | DataType::Point => None,
    };
    parsed.unwrap_or_else(|| Value::Text(cell.to_string()))
}

/// Read a parquet or CSV table with a range index
pub fn read_table(path: &Path) -> Result<Table> {
    read_table_with_text(path, &[])
}

/// Read a table, keeping `text_columns` as text whatever their content.
///
/// Used for raw identifier columns, whose codes may carry leading zeros.
pub fn read_table_with_text(path: &Path, text_columns: &[&str]) -> Result<Table> {
    if columnar::is_parquet(path)? {
        return columnar::read_parquet(path, text_columns);
    }
    read_csv(path, text_columns)
}

/// CSV (gzip-compressed when the name ends in `.gz`), one inferred type per column
fn read_csv(path: &Path, text_columns: &[&str]) -> Result<Table> {
    let file = File::open(path).map_err(|source| EnrichError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader: Box<dyn Read> = if is_gzip(path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let csv_err = |source| EnrichError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader.headers().map_err(csv_err)?.clone();
    let records = csv_reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(csv_err)?;

    let fields: Vec<Field> = headers
        .iter()
        .enumerate()
        .map(|(col, name)| Field::new(name, infer_type(name, &records, col, text_columns)))
        .collect();
    let rows = records
        .iter()
        .map(|record| {
            fields
                .iter()
                .enumerate()
                .map(|(col, field)| parse_cell(record.get(col).unwrap_or(""), field.dtype))
                .collect()
        })
        .collect();

    debug!(
        "Read {} rows x {} columns from {}",
        records.len(),
        fields.len(),
        path.display()
    );
    Ok(Table::from_rows(fields, rows))
}

/// Floats always carry a decimal point, so flag columns read back as floats
fn format_cell(value: &Value) -> String {
    match value {
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.1}", f),
        other => other.to_string(),
    }
}

/// Write a table as CSV with the index as the first column
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    let csv_err = |source| EnrichError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = WriterBuilder::new().from_path(path).map_err(csv_err)?;

    let index_name = table.index().name.clone().unwrap_or_default();
    let header = std::iter::once(index_name.as_str()).chain(table.column_names());
    writer.write_record(header).map_err(csv_err)?;

    for (label, row) in table.index().labels.iter().zip(table.rows()) {
        let record = std::iter::once(label.to_string()).chain(row.iter().map(format_cell));
        writer.write_record(record).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| EnrichError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJsonGeometry {
    Polygon {
        coordinates: Vec<Vec<Vec<f64>>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Vec<f64>>>>,
    },
}

fn to_ring(positions: Vec<Vec<f64>>) -> LineString<f64> {
    positions
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(|p| (p[0], p[1]))
        .collect()
}

fn to_polygon(rings: Vec<Vec<Vec<f64>>>) -> Polygon<f64> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.collect())
}

/// Decode a GeoJSON `Polygon` or `MultiPolygon` geometry
fn parse_geojson(boundary: BoundaryType, id: &str, text: &str) -> Result<MultiPolygon<f64>> {
    let geometry: GeoJsonGeometry =
        serde_json::from_str(text).map_err(|source| EnrichError::Geometry {
            boundary,
            id: id.to_string(),
            source,
        })?;
    Ok(match geometry {
        GeoJsonGeometry::Polygon { coordinates } => {
            MultiPolygon::new(vec![to_polygon(coordinates)])
        }
        GeoJsonGeometry::MultiPolygon { coordinates } => {
            MultiPolygon::new(coordinates.into_iter().map(to_polygon).collect())
        }
    })
}
