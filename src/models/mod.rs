//! Core data models for the enrichment engine.

pub mod boundary;
pub mod table;

pub use boundary::{BoundaryType, FeatureSet, Selection};
pub use table::{DataType, Field, Index, IndexLabel, Table, Value};
