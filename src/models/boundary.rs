//! Boundary types and feature selections.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Known boundary layers of a data package.
///
/// Declaration order matters: it is the iteration order of [`BoundaryType::all`],
/// the merge order of boundary tables and the tie-break order used when ranking
/// duplicate crosswalk matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    /// 10 minute walking isochrone around a quadkey
    #[serde(rename = "qk_isochrone_walk_10m")]
    WalkIsochrone10m,
    /// Census block group
    Cbg,
    /// Census tract
    CensusTract,
    /// County
    County,
    /// Locality / city / town
    Locality,
    /// Metropolitan area
    Metro,
    /// Zip code tabulation area
    Zipcode,
    /// Land parcel (resolved by polygon intersection, not by crosswalk)
    Parcel,
}

impl BoundaryType {
    /// Get all boundary types in enumeration order
    pub fn all() -> &'static [BoundaryType] {
        &[
            BoundaryType::WalkIsochrone10m,
            BoundaryType::Cbg,
            BoundaryType::CensusTract,
            BoundaryType::County,
            BoundaryType::Locality,
            BoundaryType::Metro,
            BoundaryType::Zipcode,
            BoundaryType::Parcel,
        ]
    }

    /// Boundary types whose identifiers come from the quadkey crosswalk
    pub fn crosswalk_backed() -> impl Iterator<Item = BoundaryType> {
        Self::all().iter().copied().filter(|b| b.is_crosswalk_backed())
    }

    pub fn is_crosswalk_backed(&self) -> bool {
        !matches!(self, BoundaryType::Parcel)
    }

    /// Canonical name, also the suffix of every feature column of this type
    pub fn name(&self) -> &'static str {
        match self {
            BoundaryType::WalkIsochrone10m => "qk_isochrone_walk_10m",
            BoundaryType::Cbg => "cbg",
            BoundaryType::CensusTract => "census_tract",
            BoundaryType::County => "county",
            BoundaryType::Locality => "locality",
            BoundaryType::Metro => "metro",
            BoundaryType::Zipcode => "zipcode",
            BoundaryType::Parcel => "parcel",
        }
    }

    /// Parse a canonical name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|b| b.name() == name)
    }

    /// Attribute a feature column to the boundary type it belongs to.
    ///
    /// A feature belongs to a type when it ends with `_<name>`. If several
    /// names match (one suffix being a tail of another) the longest wins, so
    /// every feature maps to at most one type.
    pub fn from_feature(feature: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|b| {
                feature
                    .strip_suffix(b.name())
                    .is_some_and(|head| head.len() > 1 && head.ends_with('_'))
            })
            .max_by_key(|b| b.name().len())
    }

    /// Suffix a raw boundary column name: `population` -> `population_cbg`
    pub fn column(&self, base: &str) -> String {
        format!("{}_{}", base, self.name())
    }

    /// Identifier column inside this type's boundary table (`id_cbg`)
    pub fn id_column(&self) -> String {
        self.column("id")
    }

    /// Join key expected on resolved rows (`cbg_id`)
    pub fn key_column(&self) -> String {
        format!("{}_id", self.name())
    }

    /// Descriptive columns that are dropped after a merge unless requested
    pub fn descriptive_columns(&self) -> [String; 3] {
        [self.column("id"), self.column("name"), self.column("geometry")]
    }
}

impl std::fmt::Display for BoundaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Features requested for one boundary type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FeatureSet {
    /// Every column of the boundary table
    #[default]
    All,
    /// Only these suffixed feature names (plus the identifier column)
    Only(BTreeSet<String>),
}

impl FeatureSet {
    /// Whether `column` was explicitly requested
    pub fn requests(&self, column: &str) -> bool {
        match self {
            FeatureSet::All => false,
            FeatureSet::Only(features) => features.contains(column),
        }
    }
}

/// Typed association from boundary type to the features to keep.
///
/// Ordered by [`BoundaryType`] so iteration follows enumeration order.
pub type Selection = BTreeMap<BoundaryType, FeatureSet>;
