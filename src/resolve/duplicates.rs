//! Collapse multiple crosswalk matches per input row into one.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::debug;

use crate::models::{BoundaryType, Index, IndexLabel, Table, Value};

/// How to pick one match when a point falls in overlapping regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingRule {
    SmallestArea,
    #[default]
    LargestArea,
    SmallestPopulation,
    LargestPopulation,
}

impl RankingRule {
    /// Crosswalk metric the rule ranks by
    pub fn metric(&self) -> &'static str {
        match self {
            RankingRule::SmallestArea | RankingRule::LargestArea => "area_sqkm",
            RankingRule::SmallestPopulation | RankingRule::LargestPopulation => "population",
        }
    }

    pub fn ascending(&self) -> bool {
        matches!(self, RankingRule::SmallestArea | RankingRule::SmallestPopulation)
    }

    /// Ranking column for a boundary type, e.g. `cbg_area_sqkm`
    pub fn column(&self, boundary: BoundaryType) -> String {
        format!("{}_{}", boundary.name(), self.metric())
    }
}

impl FromStr for RankingRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "smallest_area" => Ok(RankingRule::SmallestArea),
            "largest_area" => Ok(RankingRule::LargestArea),
            "smallest_population" => Ok(RankingRule::SmallestPopulation),
            "largest_population" => Ok(RankingRule::LargestPopulation),
            other => Err(format!("unknown ranking rule '{}'", other)),
        }
    }
}

/// Compare two ranking values; nulls sort last in either direction
fn compare(a: Option<f64>, b: Option<f64>, ascending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ord = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Keep exactly one row per index label.
///
/// Rows are stable-sorted by the rule's ranking column of every boundary type
/// whose join key is present, in [`BoundaryType`] order, and the first row of
/// each label is kept. Ties on one column fall through to the next boundary
/// type's column, then to the original row order. Labels keep the order of
/// their first appearance in `matches`; labels without any match must already
/// be present as null rows (the input is a left join).
pub fn resolve_duplicates(matches: Table, rule: RankingRule) -> Table {
    let ranking: Vec<usize> = BoundaryType::all()
        .iter()
        .filter(|b| matches.has_column(&b.key_column()))
        .filter_map(|b| matches.column_index(&rule.column(*b)))
        .collect();

    let mut order: Vec<usize> = (0..matches.len()).collect();
    if !ranking.is_empty() {
        let rows = matches.rows();
        let ascending = rule.ascending();
        order.sort_by(|&a, &b| {
            ranking
                .iter()
                .map(|&col| compare(rows[a][col].as_f64(), rows[b][col].as_f64(), ascending))
                .find(|ord| ord.is_ne())
                .unwrap_or(Ordering::Equal)
        });
    }

    let labels = &matches.index().labels;
    let mut chosen: HashMap<&IndexLabel, usize> = HashMap::with_capacity(labels.len());
    for &row in &order {
        chosen.entry(&labels[row]).or_insert(row);
    }

    let mut keep: Vec<usize> = Vec::with_capacity(chosen.len());
    let mut seen: HashSet<&IndexLabel> = HashSet::with_capacity(chosen.len());
    for label in labels {
        if seen.insert(label) {
            keep.push(chosen[label]);
        }
    }

    if keep.len() != matches.len() {
        debug!(
            "Resolved {} matches to {} rows using {:?}",
            matches.len(),
            keep.len(),
            rule
        );
    }

    let index = Index {
        name: matches.index().name.clone(),
        labels: keep.iter().map(|&i| labels[i].clone()).collect(),
    };
    let rows: Vec<Vec<Value>> = keep.iter().map(|&i| matches.rows()[i].clone()).collect();
    Table::new(matches.fields().to_vec(), rows, index)
}
