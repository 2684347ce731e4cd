//! Merge resolved boundary identifiers with boundary feature tables.

use tracing::debug;

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, FeatureSet, Selection, Table, Value};
use crate::store::{BoundaryTable, StoreSnapshot};

/// Substring marking boolean flag columns that are emitted as floats
const INTERSECTS_MARKER: &str = "intersects";

/// Attach boundary features to `points`.
///
/// `keys` holds one row per input row, positionally aligned, carrying a
/// `<type>_id` column for every boundary in `selection`. Key columns and any
/// other crosswalk columns are never copied to the output.
///
/// The output keeps the input's columns, index and geometry column, followed
/// by the schema of each selected boundary table in [`BoundaryType`] order,
/// minus its descriptive columns unless they were explicitly requested.
pub fn merge_features(
    points: &Table,
    keys: &Table,
    snapshot: &StoreSnapshot,
    selection: &Selection,
) -> Result<Table> {
    if keys.len() != points.len() {
        return Err(EnrichError::RowCountMismatch {
            stage: "identifier resolution",
            expected: points.len(),
            actual: keys.len(),
        });
    }

    let mut out = points.clone();
    for (boundary, features) in selection {
        let table = snapshot
            .get(*boundary)
            .ok_or(EnrichError::NotLoaded(*boundary))?;
        join_boundary(&mut out, keys, table, features)?;
    }

    normalize_flags(&mut out);

    if out.len() != points.len() || out.index() != points.index() {
        return Err(EnrichError::RowCountMismatch {
            stage: "boundary merge",
            expected: points.len(),
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Left-join one boundary table onto `out` on `<type>_id == id_<type>`
fn join_boundary(
    out: &mut Table,
    keys: &Table,
    table: &BoundaryTable,
    features: &FeatureSet,
) -> Result<()> {
    let boundary = table.boundary();
    let key_column = boundary.key_column();
    let key_pos = keys
        .column_index(&key_column)
        .ok_or(EnrichError::MissingJoinKey {
            boundary,
            column: key_column,
        })?;

    let descriptive = boundary.descriptive_columns();
    let columns: Vec<usize> = table
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !descriptive.contains(&f.name) || features.requests(&f.name))
        .map(|(i, _)| i)
        .collect();

    for &col in &columns {
        let name = &table.fields()[col].name;
        if out.has_column(name) {
            return Err(EnrichError::ColumnCollision {
                boundary,
                column: name.clone(),
            });
        }
    }

    let matched: Vec<Option<&[Value]>> = keys
        .rows()
        .iter()
        .map(|row| row[key_pos].as_key().and_then(|id| table.get(&id)))
        .collect();
    debug!(
        "Merged {}: {}/{} rows matched a boundary",
        boundary,
        matched.iter().filter(|m| m.is_some()).count(),
        matched.len()
    );

    for col in columns {
        let values = matched
            .iter()
            .map(|m| m.map_or(Value::Null, |row| row[col].clone()))
            .collect();
        out.push_column(table.fields()[col].clone(), values);
    }
    Ok(())
}

/// Coerce `*intersects*` columns to floats (0.0 / 1.0)
fn normalize_flags(out: &mut Table) {
    let flags: Vec<usize> = out
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| f.name.contains(INTERSECTS_MARKER))
        .map(|(i, _)| i)
        .collect();
    for col in flags {
        out.cast_to_float(col);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataType, Field, Index, IndexLabel};
    use crate::store::BoundaryStore;
    use std::collections::BTreeSet;

    fn county_raw() -> Table {
        Table::from_rows(
            vec![
                Field::new("id", DataType::Text),
                Field::new("name", DataType::Text),
                Field::new("geometry", DataType::Text),
                Field::new("population", DataType::Int),
                Field::new("coast_intersects", DataType::Bool),
            ],
            vec![
                vec![
                    Value::Text("12103".into()),
                    Value::Text("Pinellas".into()),
                    Value::Text("POLYGON EMPTY".into()),
                    Value::Int(959107),
                    Value::Bool(true),
                ],
                vec![
                    Value::Text("12057".into()),
                    Value::Text("Hillsborough".into()),
                    Value::Null,
                    Value::Int(1459762),
                    Value::Bool(false),
                ],
            ],
        )
    }

    fn snapshot_with(features: FeatureSet) -> (std::sync::Arc<StoreSnapshot>, Selection) {
        let mut store = BoundaryStore::new();
        let selection: Selection = [(BoundaryType::County, features)].into_iter().collect();
        let snapshot = store.reconcile(&selection, |_, _| Ok(county_raw())).unwrap();
        (snapshot, selection)
    }

    fn points() -> Table {
        Table::from_rows(
            vec![Field::new("label", DataType::Text)],
            vec![
                vec![Value::Text("p0".into())],
                vec![Value::Text("p1".into())],
                vec![Value::Text("p2".into())],
            ],
        )
        .with_index(Index {
            name: Some("point_id".into()),
            labels: vec![IndexLabel::Int(10), IndexLabel::Int(11), IndexLabel::Int(12)],
        })
    }

    fn keys() -> Table {
        Table::from_rows(
            vec![
                Field::new("county_id", DataType::Text),
                Field::new("county_area_sqkm", DataType::Float),
            ],
            vec![
                vec![Value::Text("12057".into()), Value::Float(3.0)],
                vec![Value::Null, Value::Null],
                vec![Value::Text("12103".into()), Value::Float(1.0)],
            ],
        )
    }

    #[test]
    fn test_merge_all_features() {
        let (snapshot, selection) = snapshot_with(FeatureSet::All);
        let out = merge_features(&points(), &keys(), &snapshot, &selection).unwrap();

        let names: Vec<&str> = out.column_names().collect();
        assert_eq!(names, vec!["label", "population_county", "coast_intersects_county"]);
        assert_eq!(out.index(), points().index());
        assert_eq!(out.value(0, "population_county"), Some(&Value::Int(1459762)));
        assert_eq!(out.value(1, "population_county"), Some(&Value::Null));
        assert_eq!(out.value(2, "coast_intersects_county"), Some(&Value::Float(1.0)));
        assert_eq!(out.value(0, "coast_intersects_county"), Some(&Value::Float(0.0)));
        assert_eq!(out.field("coast_intersects_county").unwrap().dtype, DataType::Float);
    }

    #[test]
    fn test_requested_descriptive_column_kept() {
        let features = FeatureSet::Only(BTreeSet::from([
            "name_county".to_string(),
            "population_county".to_string(),
        ]));
        let (snapshot, selection) = snapshot_with(features);
        let out = merge_features(&points(), &keys(), &snapshot, &selection).unwrap();
        let names: Vec<&str> = out.column_names().collect();
        assert_eq!(names, vec!["label", "name_county", "population_county"]);
        assert_eq!(out.value(2, "name_county"), Some(&Value::Text("Pinellas".into())));
    }

    #[test]
    fn test_missing_join_key() {
        let (snapshot, selection) = snapshot_with(FeatureSet::All);
        let keys = Table::from_rows(vec![], vec![vec![], vec![], vec![]]);
        let err = merge_features(&points(), &keys, &snapshot, &selection).unwrap_err();
        assert!(matches!(err, EnrichError::MissingJoinKey { .. }));
    }

    #[test]
    fn test_misaligned_keys_rejected() {
        let (snapshot, selection) = snapshot_with(FeatureSet::All);
        let keys = Table::from_rows(
            vec![Field::new("county_id", DataType::Text)],
            vec![vec![Value::Null]],
        );
        let err = merge_features(&points(), &keys, &snapshot, &selection).unwrap_err();
        assert!(matches!(err, EnrichError::RowCountMismatch { .. }));
    }

    #[test]
    fn test_column_collision() {
        let (snapshot, selection) = snapshot_with(FeatureSet::All);
        let mut input = points();
        input.push_column(
            Field::new("population_county", DataType::Int),
            vec![Value::Null, Value::Null, Value::Null],
        );
        let err = merge_features(&input, &keys(), &snapshot, &selection).unwrap_err();
        assert!(matches!(err, EnrichError::ColumnCollision { .. }));
    }

    #[test]
    fn test_unloaded_boundary() {
        let (snapshot, _) = snapshot_with(FeatureSet::All);
        let selection: Selection = [(BoundaryType::Zipcode, FeatureSet::All)].into_iter().collect();
        let err = merge_features(&points(), &keys(), &snapshot, &selection).unwrap_err();
        assert!(matches!(err, EnrichError::NotLoaded(BoundaryType::Zipcode)));
    }
}
