use std::fs;
use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::hexatlas::engine::error::Result;
use crate::hexatlas::engine::model::StageCounts;

/// Outcome of ingesting one source. Failures are kept, never dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub kind: SourceKind,
    #[serde(flatten)]
    pub status: SourceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Raster,
    Points,
    Polygons,
    Baseline,
}

/// Per-source result. Tabular and raster sources report what they aggregated;
/// polygon sources report what they loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SourceStatus {
    Aggregated {
        /// Distinct cells the source contributed.
        cells: usize,
        /// Pixels, points, or rows that reached a cell.
        records: usize,
        skipped_nodata: usize,
        /// Records excluded for out-of-range coordinates or malformed values.
        invalid_records: usize,
    },
    Loaded {
        polygons: usize,
        skipped_features: usize,
    },
    Failed {
        error: String,
    },
}

impl SourceOutcome {
    pub fn failed(source: String, kind: SourceKind, error: impl ToString) -> Self {
        Self {
            source,
            kind,
            status: SourceStatus::Failed {
                error: error.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.status, SourceStatus::Failed { .. })
    }
}

/// Counts collected while reconciling population totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconciliationSummary {
    pub records: usize,
    pub baseline_filled: usize,
    pub matching_before_correction: usize,
    pub matching_after_correction: usize,
    pub corrected: usize,
}

/// Stage counts for one administrative level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub level: String,
    pub polygons: usize,
    #[serde(flatten)]
    pub counts: StageCounts,
}

/// Everything a pipeline run reports back, persisted next to the outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub resolution: u8,
    pub sources: Vec<SourceOutcome>,
    pub reconciliation: Option<ReconciliationSummary>,
    pub attribution: Vec<LevelSummary>,
    pub output_rows: usize,
}

impl RunReport {
    pub fn new(resolution: u8) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            resolution,
            sources: Vec::new(),
            reconciliation: None,
            attribution: Vec::new(),
            output_rows: 0,
        }
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|outcome| !outcome.is_success())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
