//! Geoenrich - attach boundary features to point data
//!
//! Points (or boundary identifiers) are resolved to census block groups,
//! counties, isochrones, parcels and other boundary types through a quadkey
//! crosswalk or a parcel R-tree, and each boundary's feature columns are merged
//! onto the input rows.

pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod package;
pub mod quadkey;
pub mod resolve;
pub mod selector;
pub mod source;
pub mod store;

pub use engine::{EnrichEngine, EnrichRequest, IdentifierColumn};
pub use error::{EnrichError, Result};
pub use models::{BoundaryType, FeatureSet, Table, Value};
pub use package::{LocalDataPackage, PackageConfig};
pub use resolve::RankingRule;
pub use source::{BoundarySource, MemorySource};
