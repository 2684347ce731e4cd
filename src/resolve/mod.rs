//! Resolution of input rows to boundary identifiers.
//!
//! Points are resolved through the quadkey crosswalk or, for layers without
//! a crosswalk, by polygon intersection. Crosswalk matches may fan out and
//! are collapsed back to one row per input by a ranking rule.

pub mod crosswalk;
pub mod duplicates;
pub mod intersect;

pub use crosswalk::{join_points, Crosswalk};
pub use duplicates::{resolve_duplicates, RankingRule};
pub use intersect::{intersect_points, ParcelIndex, ParcelPolygon};

use geo::Point;

use crate::error::{EnrichError, Result};
use crate::models::Table;

/// Where the location of each input row comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointColumns {
    /// The table's designated geometry column
    Geometry,
    /// Two numeric columns
    LatLon { latitude: String, longitude: String },
}

impl PointColumns {
    /// Pick the point source for a table: its geometry column if it has one,
    /// otherwise both coordinate columns, which must then be given.
    pub fn for_table(
        table: &Table,
        latitude: Option<&str>,
        longitude: Option<&str>,
    ) -> Result<Self> {
        if table.geometry_column().is_some() {
            return Ok(PointColumns::Geometry);
        }
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => {
                for column in [latitude, longitude] {
                    if !table.has_column(column) {
                        return Err(EnrichError::MissingColumn {
                            table: "input".to_string(),
                            column: column.to_string(),
                        });
                    }
                }
                Ok(PointColumns::LatLon {
                    latitude: latitude.to_string(),
                    longitude: longitude.to_string(),
                })
            }
            _ => Err(EnrichError::MissingCoordinates),
        }
    }

    /// Point of every row, `None` where the row has no usable location
    pub fn points(&self, table: &Table) -> Vec<Option<Point<f64>>> {
        match self {
            PointColumns::Geometry => match table.geometry_column() {
                Some(col) => table.rows().iter().map(|r| r[col].as_point()).collect(),
                None => vec![None; table.len()],
            },
            PointColumns::LatLon {
                latitude,
                longitude,
            } => {
                let (Some(lat), Some(lon)) =
                    (table.column_index(latitude), table.column_index(longitude))
                else {
                    return vec![None; table.len()];
                };
                table
                    .rows()
                    .iter()
                    .map(|r| match (r[lat].as_f64(), r[lon].as_f64()) {
                        (Some(y), Some(x)) => Some(Point::new(x, y)),
                        _ => None,
                    })
                    .collect()
            }
        }
    }
}
