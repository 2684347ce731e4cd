//! Resident boundary tables and their incremental reconciliation.

use hashbrown::HashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, DataType, FeatureSet, Field, Selection, Table, Value};

/// Feature table of one boundary type, keyed by boundary identifier.
///
/// Columns carry the `_<type>` suffix; the `id_<type>` column is always last.
#[derive(Debug)]
pub struct BoundaryTable {
    boundary: BoundaryType,
    features: FeatureSet,
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
    by_id: HashMap<String, usize>,
}

impl BoundaryTable {
    /// Suffix, project and index a raw boundary table.
    ///
    /// The raw table must have an `id` column. Every explicitly requested
    /// feature must exist after suffixing.
    pub fn from_table(boundary: BoundaryType, raw: Table, features: &FeatureSet) -> Result<Self> {
        let id_column = boundary.id_column();
        let renamed: Vec<Field> = raw
            .fields()
            .iter()
            .map(|f| Field::new(boundary.column(&f.name), f.dtype))
            .collect();

        let id_pos = renamed
            .iter()
            .position(|f| f.name == id_column)
            .ok_or_else(|| EnrichError::MissingColumn {
                table: boundary.to_string(),
                column: "id".to_string(),
            })?;

        let mut keep: Vec<usize> = match features {
            FeatureSet::All => (0..renamed.len()).filter(|&i| i != id_pos).collect(),
            FeatureSet::Only(wanted) => wanted
                .iter()
                .filter(|name| **name != id_column)
                .map(|name| {
                    renamed
                        .iter()
                        .position(|f| &f.name == name)
                        .ok_or_else(|| EnrichError::MissingFeature {
                            boundary,
                            feature: name.clone(),
                        })
                })
                .collect::<Result<_>>()?,
        };
        keep.push(id_pos);

        let fields: Vec<Field> = keep
            .iter()
            .map(|&i| {
                let mut field = renamed[i].clone();
                if i == id_pos {
                    field.dtype = DataType::Text;
                }
                field
            })
            .collect();

        let mut rows = Vec::with_capacity(raw.len());
        let mut by_id = HashMap::with_capacity(raw.len());
        for row in raw.into_rows() {
            let Some(id) = row[id_pos].as_key() else {
                debug!("Skipping {} row without identifier", boundary);
                continue;
            };
            if by_id.insert(id.clone(), rows.len()).is_some() {
                return Err(EnrichError::DuplicateBoundaryId { boundary, id });
            }
            let mut projected: Vec<Value> = keep.iter().map(|&i| row[i].clone()).collect();
            if let Some(last) = projected.last_mut() {
                *last = Value::Text(id);
            }
            rows.push(projected);
        }

        Ok(Self {
            boundary,
            features: features.clone(),
            fields,
            rows,
            by_id,
        })
    }

    pub fn boundary(&self) -> BoundaryType {
        self.boundary
    }

    /// Feature selection this table was loaded with
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    /// Ordered schema, identifier column last
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row for a boundary identifier
    pub fn get(&self, id: &str) -> Option<&[Value]> {
        self.by_id.get(id).map(|&i| self.rows[i].as_slice())
    }
}

/// Immutable view of the resident boundary tables
#[derive(Debug, Default)]
pub struct StoreSnapshot {
    tables: BTreeMap<BoundaryType, Arc<BoundaryTable>>,
}

impl StoreSnapshot {
    pub fn get(&self, boundary: BoundaryType) -> Option<&Arc<BoundaryTable>> {
        self.tables.get(&boundary)
    }

    pub fn contains(&self, boundary: BoundaryType) -> bool {
        self.tables.contains_key(&boundary)
    }

    /// Resident boundary types in enumeration order
    pub fn boundaries(&self) -> impl Iterator<Item = BoundaryType> + '_ {
        self.tables.keys().copied()
    }

    /// The selection the resident tables were loaded with
    pub fn selection(&self) -> Selection {
        self.tables
            .iter()
            .map(|(b, t)| (*b, t.features().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Holds the current snapshot of resident boundary tables.
///
/// Reconciliation builds the next snapshot aside and swaps it in only once
/// every load succeeded, so a failed load leaves the store untouched and an
/// enrich call holding an older snapshot keeps a consistent view.
#[derive(Debug, Default)]
pub struct BoundaryStore {
    current: Arc<StoreSnapshot>,
}

impl BoundaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.current)
    }

    /// Make the resident set equal to `target`.
    ///
    /// Tables already resident with the same feature set are reused; others
    /// are fetched through `loader`; resident types missing from `target` are
    /// evicted. Loader errors propagate and leave the store unchanged.
    pub fn reconcile<F>(&mut self, target: &Selection, mut loader: F) -> Result<Arc<StoreSnapshot>>
    where
        F: FnMut(BoundaryType, &FeatureSet) -> Result<Table>,
    {
        let mut tables = BTreeMap::new();

        for (boundary, features) in target {
            match self.current.get(*boundary) {
                Some(existing) if existing.features() == features => {
                    info!(
                        "Boundary {} with {} rows and {} columns already loaded",
                        boundary,
                        existing.len(),
                        existing.fields().len()
                    );
                    tables.insert(*boundary, Arc::clone(existing));
                }
                _ => {
                    let raw = loader(*boundary, features)?;
                    let table = BoundaryTable::from_table(*boundary, raw, features)?;
                    info!(
                        "Loaded boundary {} with {} rows and {} columns",
                        boundary,
                        table.len(),
                        table.fields().len()
                    );
                    tables.insert(*boundary, Arc::new(table));
                }
            }
        }

        for boundary in self.current.boundaries() {
            if !tables.contains_key(&boundary) {
                info!("Removed data for boundary {}", boundary);
            }
        }

        self.current = Arc::new(StoreSnapshot { tables });
        Ok(self.snapshot())
    }

    /// Make sure `boundary` is resident, loading all of its features if it is
    /// not. Other resident tables are kept as they are.
    pub fn ensure<F>(&mut self, boundary: BoundaryType, loader: F) -> Result<Arc<StoreSnapshot>>
    where
        F: FnMut(BoundaryType, &FeatureSet) -> Result<Table>,
    {
        if self.current.contains(boundary) {
            return Ok(self.snapshot());
        }
        let mut target = self.current.selection();
        target.insert(boundary, FeatureSet::All);
        self.reconcile(&target, loader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn raw_table() -> Table {
        Table::from_rows(
            vec![
                Field::new("id", DataType::Int),
                Field::new("name", DataType::Text),
                Field::new("population", DataType::Int),
                Field::new("area_sqkm", DataType::Float),
            ],
            vec![
                vec![
                    Value::Int(1),
                    Value::Text("one".into()),
                    Value::Int(100),
                    Value::Float(5.0),
                ],
                vec![
                    Value::Int(2),
                    Value::Text("two".into()),
                    Value::Int(200),
                    Value::Float(10.0),
                ],
            ],
        )
    }

    fn only(features: &[&str]) -> FeatureSet {
        FeatureSet::Only(features.iter().map(|s| s.to_string()).collect())
    }

    fn selection(entries: &[(BoundaryType, FeatureSet)]) -> Selection {
        entries.iter().cloned().collect()
    }

    #[test]
    fn test_from_table_all_features_id_last() {
        let table =
            BoundaryTable::from_table(BoundaryType::Cbg, raw_table(), &FeatureSet::All)
                .unwrap();
        let names: Vec<&str> = table.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["name_cbg", "population_cbg", "area_sqkm_cbg", "id_cbg"]
        );
        assert_eq!(table.fields()[3].dtype, DataType::Text);
        assert_eq!(table.get("2").unwrap()[1], Value::Int(200));
        assert_eq!(table.get("2").unwrap()[3], Value::Text("2".into()));
        assert!(table.get("3").is_none());
    }

    #[test]
    fn test_feature_selection_precision() {
        let table = BoundaryTable::from_table(
            BoundaryType::Cbg,
            raw_table(),
            &only(&["population_cbg"]),
        )
        .unwrap();
        let names: Vec<&str> = table.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["population_cbg", "id_cbg"]);
    }

    #[test]
    fn test_requested_id_stays_last() {
        let table = BoundaryTable::from_table(
            BoundaryType::Cbg,
            raw_table(),
            &only(&["id_cbg", "population_cbg"]),
        )
        .unwrap();
        assert_eq!(table.fields().len(), 2);
        assert_eq!(table.fields()[1].name, "id_cbg");
    }

    #[test]
    fn test_missing_feature() {
        let err = BoundaryTable::from_table(
            BoundaryType::Cbg,
            raw_table(),
            &only(&["median_rent_cbg"]),
        )
        .unwrap_err();
        assert!(matches!(err, EnrichError::MissingFeature { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = Table::from_rows(
            vec![Field::new("id", DataType::Text)],
            vec![vec![Value::Text("a".into())], vec![Value::Text("a".into())]],
        );
        let err =
            BoundaryTable::from_table(BoundaryType::County, raw, &FeatureSet::All).unwrap_err();
        assert!(matches!(err, EnrichError::DuplicateBoundaryId { .. }));
    }

    #[test]
    fn test_missing_id_column() {
        let raw = Table::from_rows(vec![Field::new("name", DataType::Text)], vec![]);
        let err =
            BoundaryTable::from_table(BoundaryType::County, raw, &FeatureSet::All).unwrap_err();
        assert!(matches!(err, EnrichError::MissingColumn { .. }));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let calls = RefCell::new(Vec::new());
        let loader = |b: BoundaryType, _: &FeatureSet| {
            calls.borrow_mut().push(b);
            Ok(raw_table())
        };
        let mut store = BoundaryStore::new();
        let target = selection(&[(BoundaryType::County, FeatureSet::All)]);

        let first = store.reconcile(&target, loader).unwrap();
        let second = store.reconcile(&target, loader).unwrap();

        assert_eq!(calls.borrow().len(), 1);
        assert!(Arc::ptr_eq(
            first.get(BoundaryType::County).unwrap(),
            second.get(BoundaryType::County).unwrap()
        ));
    }

    #[test]
    fn test_reconcile_adds_and_evicts() {
        let loader = |_: BoundaryType, _: &FeatureSet| Ok(raw_table());
        let mut store = BoundaryStore::new();

        store
            .reconcile(&selection(&[(BoundaryType::County, FeatureSet::All)]), loader)
            .unwrap();
        let both = store
            .reconcile(
                &selection(&[
                    (BoundaryType::County, FeatureSet::All),
                    (BoundaryType::Zipcode, FeatureSet::All),
                ]),
                loader,
            )
            .unwrap();
        assert_eq!(
            both.boundaries().collect::<Vec<_>>(),
            vec![BoundaryType::County, BoundaryType::Zipcode]
        );

        let zip_only = store
            .reconcile(&selection(&[(BoundaryType::Zipcode, FeatureSet::All)]), loader)
            .unwrap();
        assert_eq!(
            zip_only.boundaries().collect::<Vec<_>>(),
            vec![BoundaryType::Zipcode]
        );
        // the older snapshot still sees what it saw
        assert!(both.contains(BoundaryType::County));
    }

    #[test]
    fn test_reconcile_replaces_on_feature_change() {
        let calls = RefCell::new(0);
        let loader = |b: BoundaryType, _: &FeatureSet| {
            *calls.borrow_mut() += 1;
            Ok(raw_table())
        };
        let mut store = BoundaryStore::new();
        store
            .reconcile(&selection(&[(BoundaryType::Cbg, FeatureSet::All)]), loader)
            .unwrap();
        let snapshot = store
            .reconcile(
                &selection(&[(BoundaryType::Cbg, only(&["population_cbg"]))]),
                loader,
            )
            .unwrap();
        assert_eq!(*calls.borrow(), 2);
        assert_eq!(snapshot.get(BoundaryType::Cbg).unwrap().fields().len(), 2);
    }

    #[test]
    fn test_failed_load_leaves_store_unchanged() {
        let mut store = BoundaryStore::new();
        store
            .reconcile(&selection(&[(BoundaryType::County, FeatureSet::All)]), |_, _| {
                Ok(raw_table())
            })
            .unwrap();

        let result = store.reconcile(
            &selection(&[(BoundaryType::Metro, FeatureSet::All)]),
            |b, _| {
                Err(EnrichError::MissingColumn {
                    table: b.to_string(),
                    column: "id".to_string(),
                })
            },
        );
        assert!(result.is_err());
        let snapshot = store.snapshot();
        assert_eq!(
            snapshot.boundaries().collect::<Vec<_>>(),
            vec![BoundaryType::County]
        );
    }

    #[test]
    fn test_ensure_keeps_other_tables() {
        let loader = |_: BoundaryType, _: &FeatureSet| Ok(raw_table());
        let mut store = BoundaryStore::new();
        store
            .reconcile(&selection(&[(BoundaryType::Cbg, only(&["population_cbg"]))]), loader)
            .unwrap();
        let snapshot = store.ensure(BoundaryType::County, loader).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get(BoundaryType::Cbg).unwrap().features(),
            &only(&["population_cbg"])
        );
    }
}
