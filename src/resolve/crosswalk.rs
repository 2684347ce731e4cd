//! Quadkey crosswalk: precomputed point-to-region lookup.

use geo::Point;
use hashbrown::HashMap;
use tracing::{info, warn};

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, DataType, Field, Index, IndexLabel, Table, Value};
use crate::quadkey;

/// Column of the crosswalk holding the quadkey
pub const KEY_COLUMN: &str = "id";

/// Quadkey → boundary identifiers table.
///
/// A quadkey normally maps to one row, but overlapping source boundaries can
/// map it to several.
#[derive(Debug)]
pub struct Crosswalk {
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
    by_key: HashMap<String, Vec<usize>>,
}

impl Crosswalk {
    /// Index a raw crosswalk table by its quadkey column
    pub fn from_table(raw: Table) -> Result<Self> {
        let key_pos = raw
            .column_index(KEY_COLUMN)
            .ok_or_else(|| EnrichError::MissingColumn {
                table: "crosswalk".to_string(),
                column: KEY_COLUMN.to_string(),
            })?;

        let fields: Vec<Field> = raw
            .fields()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != key_pos)
            .map(|(_, f)| f.clone())
            .collect();

        let mut rows = Vec::with_capacity(raw.len());
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::with_capacity(raw.len());
        for mut row in raw.into_rows() {
            let key = row.remove(key_pos).as_key();
            if let Some(key) = key {
                by_key.entry(key).or_default().push(rows.len());
                rows.push(row);
            }
        }

        info!(
            "Crosswalk indexed {} rows over {} quadkeys",
            rows.len(),
            by_key.len()
        );

        Ok(Self {
            fields,
            rows,
            by_key,
        })
    }

    /// Columns carried by every match (quadkey excluded)
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Boundary types the crosswalk carries a join key for
    pub fn boundaries(&self) -> impl Iterator<Item = BoundaryType> + '_ {
        BoundaryType::all()
            .iter()
            .copied()
            .filter(|b| self.fields.iter().any(|f| f.name == b.key_column()))
    }

    /// Rows stored under a quadkey, in file order
    pub fn lookup(&self, key: &str) -> impl Iterator<Item = &[Value]> {
        self.by_key
            .get(key)
            .map(|rows| rows.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&i| self.rows[i].as_slice())
    }
}

/// Left-join points to the crosswalk on their quadkey at `zoom`.
///
/// The result carries the crosswalk columns only; its index labels are the
/// positions of the input points, repeated where a quadkey has several
/// crosswalk rows. Points without a location or without a crosswalk entry
/// get one all-null row.
pub fn join_points(points: &[Option<Point<f64>>], crosswalk: &Crosswalk, zoom: u8) -> Table {
    let width = crosswalk.fields().len();
    let mut labels = Vec::with_capacity(points.len());
    let mut rows = Vec::with_capacity(points.len());
    let mut unkeyed = 0usize;
    let mut unmatched = 0usize;

    for (i, point) in points.iter().enumerate() {
        let key = point.and_then(|p| quadkey::from_geo(p.y(), p.x(), zoom));
        if key.is_none() {
            unkeyed += 1;
        }
        let before = rows.len();
        if let Some(key) = key.as_deref() {
            for row in crosswalk.lookup(key) {
                labels.push(IndexLabel::Int(i as i64));
                rows.push(row.to_vec());
            }
        }
        if rows.len() == before {
            unmatched += 1;
            labels.push(IndexLabel::Int(i as i64));
            rows.push(vec![Value::Null; width]);
        }
    }

    if unkeyed > 0 {
        warn!("{} points had no usable coordinates", unkeyed);
    }
    info!(
        "Crosswalk join: {} points -> {} matches ({} without a match)",
        points.len(),
        rows.len(),
        unmatched
    );

    let index = Index {
        name: None,
        labels,
    };
    Table::new(crosswalk.fields().to_vec(), rows, index)
}

/// Key table built from an identifier column of the input itself.
///
/// One row per input row, holding the identifier in `<type>_id`.
pub fn identifier_keys(points: &Table, boundary: BoundaryType, column: &str) -> Result<Table> {
    if let Some(field) = points.field(column) {
        if matches!(field.dtype, DataType::Int | DataType::Float) {
            warn!(
                "Identifier column '{}' is numeric, codes with leading zeros will not match",
                column
            );
        }
    }
    let values = points
        .column(column)
        .ok_or_else(|| EnrichError::MissingColumn {
            table: "input".to_string(),
            column: column.to_string(),
        })?;
    let rows: Vec<Vec<Value>> = values
        .map(|v| vec![v.as_key().map_or(Value::Null, Value::Text)])
        .collect();
    Ok(Table::from_rows(
        vec![Field::new(boundary.key_column(), DataType::Text)],
        rows,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crosswalk_for(points: &[(f64, f64)]) -> Crosswalk {
        let mut rows = Vec::new();
        for (i, (lon, lat)) in points.iter().enumerate() {
            let key = quadkey::from_geo(*lat, *lon, 19).unwrap();
            rows.push(vec![
                Value::Text(key),
                Value::Text(format!("c{}", i)),
                Value::Float(i as f64),
            ]);
        }
        Crosswalk::from_table(Table::from_rows(
            vec![
                Field::new("id", DataType::Text),
                Field::new("county_id", DataType::Text),
                Field::new("county_area_sqkm", DataType::Float),
            ],
            rows,
        ))
        .unwrap()
    }

    #[test]
    fn test_join_one_to_one_and_missing() {
        let crosswalk = crosswalk_for(&[(-82.72, 27.84), (-82.70, 28.09)]);
        let points = vec![
            Some(Point::new(-82.70, 28.09)),
            None,
            Some(Point::new(10.0, 10.0)),
            Some(Point::new(-82.72, 27.84)),
        ];
        let joined = join_points(&points, &crosswalk, 19);

        assert_eq!(joined.len(), 4);
        assert_eq!(joined.value(0, "county_id"), Some(&Value::Text("c1".into())));
        assert_eq!(joined.value(1, "county_id"), Some(&Value::Null));
        assert_eq!(joined.value(2, "county_id"), Some(&Value::Null));
        assert_eq!(joined.value(3, "county_id"), Some(&Value::Text("c0".into())));
        assert!(!joined.has_column("id"));
    }

    #[test]
    fn test_join_fans_out_on_overlap() {
        // two crosswalk rows for the same quadkey
        let crosswalk = crosswalk_for(&[(-82.72, 27.84), (-82.72, 27.84)]);
        let points = vec![Some(Point::new(-82.72, 27.84)), Some(Point::new(0.5, 0.5))];
        let joined = join_points(&points, &crosswalk, 19);

        assert_eq!(joined.len(), 3);
        assert_eq!(
            joined.index().labels,
            vec![IndexLabel::Int(0), IndexLabel::Int(0), IndexLabel::Int(1)]
        );
    }

    #[test]
    fn test_crosswalk_boundaries() {
        let crosswalk = crosswalk_for(&[(0.0, 0.0)]);
        assert_eq!(
            crosswalk.boundaries().collect::<Vec<_>>(),
            vec![BoundaryType::County]
        );
    }

    #[test]
    fn test_identifier_keys() {
        let points = Table::from_rows(
            vec![Field::new("cbg", DataType::Int)],
            vec![vec![Value::Int(121030245001)], vec![Value::Null]],
        );
        let keys = identifier_keys(&points, BoundaryType::Cbg, "cbg").unwrap();
        assert_eq!(
            keys.value(0, "cbg_id"),
            Some(&Value::Text("121030245001".into()))
        );
        assert_eq!(keys.value(1, "cbg_id"), Some(&Value::Null));
        assert!(identifier_keys(&points, BoundaryType::Cbg, "zip").is_err());
    }
}
