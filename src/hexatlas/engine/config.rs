//! Pipeline manifest.
//!
//! The manifest is a JSON document listing every input explicitly. Relative
//! paths are resolved against the manifest's own directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::hexatlas::engine::augment::{DEFAULT_CRIME_KEY, DEFAULT_POVERTY_KEY};
use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::grid::DEFAULT_RESOLUTION;
use crate::hexatlas::engine::io::table::{OutputFormat, POPULATION_COLUMN};
use crate::hexatlas::engine::model::{FeatureLabel, feature_column};
use crate::hexatlas::engine::raster::{PixelAnchor, RasterJob};
use crate::hexatlas::engine::reconcile::JoinAnchor;

/// Full description of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "default_resolution")]
    pub resolution: u8,
    #[serde(default)]
    pub pixel_anchor: PixelAnchor,
    #[serde(default)]
    pub rasters: Vec<RasterSourceConfig>,
    #[serde(default)]
    pub point_layers: Vec<PointLayerConfig>,
    #[serde(default)]
    pub baseline: Option<BaselineConfig>,
    #[serde(default)]
    pub join_anchor: JoinAnchor,
    #[serde(default)]
    pub admin_levels: Vec<AdminLevelConfig>,
    #[serde(default)]
    pub poverty: Option<PovertyConfig>,
    #[serde(default)]
    pub crime: Option<CrimeConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RasterSourceConfig {
    pub path: PathBuf,
    /// Feature label; derived from the file stem (`..._m15`) when omitted.
    #[serde(default)]
    pub label: Option<String>,
}

impl RasterSourceConfig {
    /// Label taken from the manifest or, failing that, from the file name.
    pub fn resolved_label(&self) -> Option<String> {
        if let Some(label) = &self.label {
            return Some(label.clone());
        }
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(FeatureLabel::from_file_stem)
            .map(|label| label.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointLayerConfig {
    pub path: PathBuf,
    /// Column name for plain counts, or column prefix when categorised.
    pub label: String,
    /// When set, one count column is produced per distinct category.
    #[serde(default)]
    pub category_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaselineConfig {
    pub path: PathBuf,
    #[serde(default = "default_population_column")]
    pub population_column: String,
}

/// Which augmented column an administrative level fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    County,
    SubCounty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminLevelConfig {
    pub name: String,
    pub role: AdminRole,
    /// GeoJSON files whose polygons, in order, make up the level.
    pub sources: Vec<PathBuf>,
    /// Feature property holding the region name (e.g. `ADM1_EN`).
    pub name_property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PovertyConfig {
    pub path: PathBuf,
    #[serde(default = "default_poverty_key")]
    pub key_column: String,
    #[serde(default = "default_poverty_drop_columns")]
    pub drop_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrimeConfig {
    pub path: PathBuf,
    #[serde(default = "default_crime_key")]
    pub key_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    /// Also write one table per aggregated feature.
    #[serde(default)]
    pub write_feature_tables: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            format: OutputFormat::default(),
            write_feature_tables: false,
        }
    }
}

fn claim_column(columns: &mut HashSet<String>, column: String) -> Result<()> {
    if columns.contains(&column) {
        return Err(EngineError::Config(format!(
            "feature column '{column}' is produced by more than one source"
        )));
    }
    columns.insert(column);
    Ok(())
}

fn default_resolution() -> u8 {
    DEFAULT_RESOLUTION
}

fn default_population_column() -> String {
    POPULATION_COLUMN.to_string()
}

fn default_poverty_key() -> String {
    DEFAULT_POVERTY_KEY.to_string()
}

fn default_poverty_drop_columns() -> Vec<String> {
    [
        "Country",
        "ISO country numeric code",
        "ISO country code",
        "World region",
    ]
    .map(str::to_string)
    .to_vec()
}

fn default_crime_key() -> String {
    DEFAULT_CRIME_KEY.to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("output")
}

impl PipelineConfig {
    /// Loads, resolves, and validates a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::MissingInput(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Makes every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.rasters.iter_mut().for_each(|raster| resolve(&mut raster.path));
        self.point_layers.iter_mut().for_each(|layer| resolve(&mut layer.path));
        if let Some(baseline) = &mut self.baseline {
            resolve(&mut baseline.path);
        }
        for level in &mut self.admin_levels {
            level.sources.iter_mut().for_each(&resolve);
        }
        if let Some(poverty) = &mut self.poverty {
            resolve(&mut poverty.path);
        }
        if let Some(crime) = &mut self.crime {
            resolve(&mut crime.path);
        }
        resolve(&mut self.output.directory);
    }

    /// Checks the manifest for inconsistencies that would only surface late.
    pub fn validate(&self) -> Result<()> {
        if self.resolution > 15 {
            return Err(EngineError::InvalidResolution(self.resolution));
        }
        if self.rasters.is_empty() && self.point_layers.is_empty() {
            return Err(EngineError::Config(
                "at least one raster source or point layer is required".into(),
            ));
        }
        let mut columns = HashSet::new();
        for raster in &self.rasters {
            let Some(label) = raster.resolved_label() else {
                return Err(EngineError::Config(format!(
                    "raster '{}' has no label and none can be derived from its file name",
                    raster.path.display()
                )));
            };
            claim_column(&mut columns, feature_column(&label))?;
        }
        for layer in self.point_layers.iter().filter(|layer| layer.category_column.is_none()) {
            claim_column(&mut columns, layer.label.clone())?;
        }
        let mut roles = HashSet::new();
        for level in &self.admin_levels {
            if !roles.insert(level.role) {
                return Err(EngineError::Config(format!(
                    "more than one administrative level has role {:?}",
                    level.role
                )));
            }
            if level.sources.is_empty() {
                return Err(EngineError::Config(format!(
                    "administrative level '{}' lists no sources",
                    level.name
                )));
            }
        }
        Ok(())
    }

    /// Output columns fixed by the manifest: one per raster and per plain
    /// point layer. Categorised layers add theirs at run time.
    pub fn static_columns(&self) -> Vec<String> {
        let rasters = self
            .raster_jobs()
            .into_iter()
            .map(|job| feature_column(&job.label));
        let points = self
            .point_layers
            .iter()
            .filter(|layer| layer.category_column.is_none())
            .map(|layer| layer.label.clone());
        rasters.chain(points).collect()
    }

    /// Raster jobs with their labels resolved.
    pub fn raster_jobs(&self) -> Vec<RasterJob> {
        self.rasters
            .iter()
            .filter_map(|raster| {
                raster.resolved_label().map(|label| RasterJob {
                    label,
                    path: raster.path.clone(),
                })
            })
            .collect()
    }
}
