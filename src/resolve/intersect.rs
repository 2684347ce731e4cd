//! Spatial index for point-in-polygon lookups against a parcel layer.

use geo::{BoundingRect, Intersects, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};
use std::sync::Arc;
use tracing::info;

use crate::error::{EnrichError, Result};
use crate::models::{BoundaryType, DataType, Field, Table, Value};

/// A single parcel polygon with its identifier
#[derive(Debug, Clone)]
pub struct ParcelPolygon {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl ParcelPolygon {
    /// Get the bounding box of this parcel
    pub fn bbox(&self) -> Option<(f64, f64, f64, f64)> {
        self.geometry
            .bounding_rect()
            .map(|rect| (rect.min().x, rect.min().y, rect.max().x, rect.max().y))
    }
}

/// Wrapper for R-tree indexing of parcels
#[derive(Clone)]
struct IndexedParcel {
    /// Position in the source layer, used to order multiple hits
    order: usize,
    parcel: Arc<ParcelPolygon>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedParcel {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedParcel {
    fn new(order: usize, parcel: ParcelPolygon) -> Option<Self> {
        let (min_x, min_y, max_x, max_y) = parcel.bbox()?;
        Some(Self {
            order,
            parcel: Arc::new(parcel),
            envelope: AABB::from_corners([min_x, min_y], [max_x, max_y]),
        })
    }
}

/// Spatial index over a parcel layer using an R-tree
pub struct ParcelIndex {
    tree: RTree<IndexedParcel>,
}

impl ParcelIndex {
    /// Build spatial index from parcel polygons. Empty geometries are skipped.
    pub fn build(parcels: Vec<ParcelPolygon>) -> Self {
        info!("Building spatial index for {} parcels...", parcels.len());

        let indexed: Vec<IndexedParcel> = parcels
            .into_iter()
            .enumerate()
            .filter_map(|(order, parcel)| IndexedParcel::new(order, parcel))
            .collect();

        let tree = RTree::bulk_load(indexed);
        info!("Spatial index built with {} entries", tree.size());

        Self { tree }
    }

    /// All parcels intersecting a point, in layer order
    pub fn lookup(&self, point: Point<f64>) -> Vec<&ParcelPolygon> {
        let query_envelope = AABB::from_point([point.x(), point.y()]);

        // R-tree candidates by envelope, then the exact predicate
        let mut hits: Vec<&IndexedParcel> = self
            .tree
            .locate_in_envelope_intersecting(&query_envelope)
            .filter(|ip| ip.parcel.geometry.intersects(&point))
            .collect();
        hits.sort_by_key(|ip| ip.order);
        hits.into_iter().map(|ip| ip.parcel.as_ref()).collect()
    }

    /// First parcel (in layer order) intersecting a point
    pub fn first_match(&self, point: Point<f64>) -> Option<&ParcelPolygon> {
        self.lookup(point).into_iter().next()
    }

    /// Get total number of indexed parcels
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

/// Resolve points to parcel identifiers, first match wins.
///
/// Returns one row per point with a single `parcel_id` column.
pub fn intersect_points(points: &[Option<Point<f64>>], index: &ParcelIndex) -> Result<Table> {
    let mut matched = 0usize;
    let rows: Vec<Vec<Value>> = points
        .iter()
        .map(|point| {
            let id = point.and_then(|p| index.first_match(p)).map(|parcel| {
                matched += 1;
                Value::Text(parcel.id.clone())
            });
            vec![id.unwrap_or(Value::Null)]
        })
        .collect();

    if rows.len() != points.len() {
        return Err(EnrichError::RowCountMismatch {
            stage: "parcel intersection",
            expected: points.len(),
            actual: rows.len(),
        });
    }
    info!("Parcel intersection matched {}/{} points", matched, points.len());

    Ok(Table::from_rows(
        vec![Field::new(BoundaryType::Parcel.key_column(), DataType::Text)],
        rows,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn square(id: &str, x: f64, y: f64, size: f64) -> ParcelPolygon {
        let poly: Polygon<f64> = polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ];
        ParcelPolygon {
            id: id.to_string(),
            geometry: MultiPolygon::new(vec![poly]),
        }
    }

    #[test]
    fn test_empty_index() {
        let index = ParcelIndex::build(vec![]);
        assert!(index.is_empty());
        assert!(index.first_match(Point::new(0.5, 0.5)).is_none());
    }

    #[test]
    fn test_lookup_inside_and_outside() {
        let index =
            ParcelIndex::build(vec![square("a", 0.0, 0.0, 1.0), square("b", 2.0, 0.0, 1.0)]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.first_match(Point::new(0.5, 0.5)).unwrap().id, "a");
        assert_eq!(index.first_match(Point::new(2.5, 0.5)).unwrap().id, "b");
        assert!(index.first_match(Point::new(1.5, 0.5)).is_none());
    }

    #[test]
    fn test_overlap_first_in_layer_order_wins() {
        let index = ParcelIndex::build(vec![
            square("big", 0.0, 0.0, 10.0),
            square("small", 1.0, 1.0, 1.0),
        ]);
        let hits = index.lookup(Point::new(1.5, 1.5));
        assert_eq!(hits.len(), 2);
        assert_eq!(index.first_match(Point::new(1.5, 1.5)).unwrap().id, "big");
    }

    #[test]
    fn test_boundary_point_intersects() {
        let index = ParcelIndex::build(vec![square("a", 0.0, 0.0, 1.0)]);
        assert_eq!(index.first_match(Point::new(1.0, 0.5)).unwrap().id, "a");
    }

    #[test]
    fn test_intersect_points_keeps_row_count() {
        let index = ParcelIndex::build(vec![
            square("a", 0.0, 0.0, 1.0),
            square("b", 0.5, 0.5, 1.0),
        ]);
        let points = vec![
            Some(Point::new(0.75, 0.75)),
            None,
            Some(Point::new(5.0, 5.0)),
        ];
        let table = intersect_points(&points, &index).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.value(0, "parcel_id"), Some(&Value::Text("a".into())));
        assert_eq!(table.value(1, "parcel_id"), Some(&Value::Null));
        assert_eq!(table.value(2, "parcel_id"), Some(&Value::Null));
    }
}
