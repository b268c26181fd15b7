use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

mod record;

pub use record::{
    AdminPolygon, Attribution, AttributionTable, AugmentedRecord, AugmentedTable, MatchStage,
    MergedTable, ReconciledRecord, ReconciledTable, StageCounts,
};

/// Prefix shared by every raster-derived demographic column.
pub const POPULATION_PREFIX: &str = "population_";

/// Identifier of a hexagonal grid cell. The string form is resolution
/// qualified, so identifiers from different resolutions never collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Wraps an already validated identifier.
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the textual identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cell derived from a coordinate: identifier, resolution, and the
/// representative centroid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridCell {
    pub id: CellId,
    pub resolution: u8,
    pub latitude: f64,
    pub longitude: f64,
}

/// One named feature column keyed by cell identifier. Keys are unique by
/// construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    name: String,
    values: BTreeMap<CellId, f64>,
}

impl FeatureTable {
    /// Creates an empty table for the given feature.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    /// Creates a table from an existing cell → value mapping.
    pub fn from_values(name: impl Into<String>, values: BTreeMap<CellId, f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Name of the feature column.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, cell: &CellId) -> Option<f64> {
        self.values.get(cell).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the entries in cell identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&CellId, f64)> {
        self.values.iter().map(|(cell, value)| (cell, *value))
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.values.keys()
    }

    /// Sum of every value in the column.
    pub fn total(&self) -> f64 {
        self.values.values().sum()
    }
}

/// Sex component of an age/sex bracket label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

/// A demographic bracket label such as `m15` (males aged 15-19) or `f0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureLabel {
    pub sex: Sex,
    pub age: u16,
}

impl FeatureLabel {
    /// Parses a bare label (`m15`, `f80`).
    pub fn parse(label: &str) -> Option<Self> {
        let mut chars = label.chars();
        let sex = match chars.next()? {
            'm' | 'M' => Sex::Male,
            'f' | 'F' => Sex::Female,
            _ => return None,
        };
        let digits = chars.as_str();
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let age = digits.parse().ok()?;
        Some(Self { sex, age })
    }

    /// Parses the label out of a `population_<label>` column name.
    pub fn from_column(column: &str) -> Option<Self> {
        column.strip_prefix(POPULATION_PREFIX).and_then(Self::parse)
    }

    /// Derives the label from an age/sex raster file stem such as
    /// `KEN_population_v2_0_agesex_m15`.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        stem.rsplit('_').next().and_then(Self::parse)
    }

    /// Column name used for the bracket in merged tables.
    pub fn column_name(&self) -> String {
        format!("{POPULATION_PREFIX}{self}")
    }
}

impl fmt::Display for FeatureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.sex {
            Sex::Male => 'm',
            Sex::Female => 'f',
        };
        write!(f, "{prefix}{}", self.age)
    }
}

/// Builds the merged column name for a raster feature label. Labels already
/// carrying the prefix are kept as is.
pub fn feature_column(label: &str) -> String {
    if label.starts_with(POPULATION_PREFIX) {
        label.to_string()
    } else {
        format!("{POPULATION_PREFIX}{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracket_labels() {
        assert_eq!(
            FeatureLabel::parse("m15"),
            Some(FeatureLabel {
                sex: Sex::Male,
                age: 15
            })
        );
        assert_eq!(FeatureLabel::parse("f0").map(|label| label.age), Some(0));
        assert_eq!(FeatureLabel::parse("x15"), None);
        assert_eq!(FeatureLabel::parse("m"), None);
        assert_eq!(FeatureLabel::parse("m1a"), None);
    }

    #[test]
    fn labels_come_from_columns_and_file_stems() {
        let label = FeatureLabel::from_file_stem("KEN_population_v2_0_agesex_f80").expect("label");
        assert_eq!(label.column_name(), "population_f80");
        assert_eq!(FeatureLabel::from_column("population_f80"), Some(label));
        assert_eq!(FeatureLabel::from_column("total_population"), None);
        assert_eq!(FeatureLabel::from_column("schools"), None);
    }

    #[test]
    fn feature_column_adds_prefix_once() {
        assert_eq!(feature_column("m15"), "population_m15");
        assert_eq!(feature_column("population_m15"), "population_m15");
    }

    #[test]
    fn feature_table_totals() {
        let mut values = BTreeMap::new();
        values.insert(CellId::new("a"), 1.5);
        values.insert(CellId::new("b"), 2.5);
        let table = FeatureTable::from_values("population_m0", values);
        assert_eq!(table.len(), 2);
        assert_eq!(table.total(), 4.0);
        assert_eq!(table.get(&CellId::new("c")), None);
    }
}
