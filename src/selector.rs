//! Decide which boundary tables, and which of their features, to load.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::models::{BoundaryType, FeatureSet, Selection};

/// Compute the boundary selection for a load request.
///
/// - Named boundary types are kept if known and silently dropped otherwise;
///   each maps to [`FeatureSet::All`].
/// - Features are attributed to their boundary type by suffix
///   ([`BoundaryType::from_feature`]); a type with attributed features maps to
///   exactly those features, replacing an `All` entry from the names.
/// - If nothing is selected, every crosswalk-backed type is selected with all
///   features. Parcels are only loaded when asked for.
pub fn select_boundaries<S: AsRef<str>>(boundaries: &[S], features: &[S]) -> Selection {
    let mut selection = Selection::new();

    for name in boundaries {
        match BoundaryType::from_name(name.as_ref()) {
            Some(boundary) => {
                selection.insert(boundary, FeatureSet::All);
            }
            None => debug!("Ignoring unknown boundary type '{}'", name.as_ref()),
        }
    }

    let mut by_boundary: BTreeMap<BoundaryType, BTreeSet<String>> = BTreeMap::new();
    for feature in features {
        let feature = feature.as_ref();
        match BoundaryType::from_feature(feature) {
            Some(boundary) => {
                by_boundary
                    .entry(boundary)
                    .or_default()
                    .insert(feature.to_string());
            }
            None => debug!("Feature '{}' matches no known boundary type", feature),
        }
    }
    for (boundary, wanted) in by_boundary {
        selection.insert(boundary, FeatureSet::Only(wanted));
    }

    if selection.is_empty() {
        selection = BoundaryType::crosswalk_backed()
            .map(|b| (b, FeatureSet::All))
            .collect();
    }

    selection
}
