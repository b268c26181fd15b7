use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::hexatlas::engine::attribute;
use crate::hexatlas::engine::augment::{self, CrimeSubregions, PovertyTable, RegionData};
use crate::hexatlas::engine::config::{AdminLevelConfig, AdminRole, BaselineConfig, PipelineConfig, PointLayerConfig};
use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::grid::GridIndexer;
use crate::hexatlas::engine::io::table::{self, OutputFormat, TabularData};
use crate::hexatlas::engine::io::vector_read;
use crate::hexatlas::engine::merge;
use crate::hexatlas::engine::model::{AdminPolygon, AttributionTable};
use crate::hexatlas::engine::points;
use crate::hexatlas::engine::raster::{self, SourceBatch};
use crate::hexatlas::engine::reconcile::{self, BaselinePopulation};
use crate::hexatlas::engine::report::{LevelSummary, RunReport, SourceKind, SourceOutcome, SourceStatus};

/// File stem of the merged age/sex table.
pub const MERGED_TABLE: &str = "agesex_aggregated";
/// File stem of the reconciled population table.
pub const RECONCILED_TABLE: &str = "population_age_demographics_merged";
/// File stem of the final augmented table.
pub const FINAL_TABLE: &str = "h3_data_full";
/// File name of the JSON run report.
pub const REPORT_FILE: &str = "run_report.json";
/// Sub-directory receiving per-feature tables.
pub const FEATURE_DIR: &str = "features";

/// Runs every stage described by the manifest and writes the outputs.
///
/// Unreadable raster, point, baseline, and polygon sources are recorded in
/// the report and skipped. A level left without polygons aborts the run.
#[instrument(
    level = "info",
    skip_all,
    fields(resolution = config.resolution, output = %config.output.directory.display())
)]
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    let indexer = GridIndexer::new(config.resolution)?;
    let output = &config.output;
    fs::create_dir_all(&output.directory)?;
    let mut report = RunReport::new(config.resolution);

    let mut batch = raster::aggregate_sources(&config.raster_jobs(), &indexer, config.pixel_anchor);
    let mut taken: BTreeSet<String> =
        batch.tables.iter().map(|table| table.name().to_string()).collect();
    let point_batch = aggregate_point_layers(&config.point_layers, &indexer, &mut taken);
    batch.tables.extend(point_batch.tables);
    batch.outcomes.extend(point_batch.outcomes);
    report.sources.extend(batch.outcomes);

    let mut tables = batch.tables;
    merge::canonical_order(&mut tables);
    if output.write_feature_tables {
        let feature_dir = output.directory.join(FEATURE_DIR);
        fs::create_dir_all(&feature_dir)?;
        for feature in &tables {
            let path = output_path(&feature_dir, feature.name(), output.format);
            table::write_table(&path, &table::feature_table_data(feature), output.format)?;
        }
        debug!(count = tables.len(), "feature tables written");
    }

    let merged = merge::merge_feature_tables(&tables)?;
    info!(cells = merged.len(), columns = merged.columns().len(), "features merged");
    write_output(
        &output.directory,
        MERGED_TABLE,
        output.format,
        &table::merged_table_data(&merged, MERGED_TABLE),
    )?;

    let baseline = load_baseline(config.baseline.as_ref(), &indexer, &mut report);
    let reconciliation = reconcile::reconcile(&merged, &baseline, config.join_anchor)?;
    report.reconciliation = Some(reconciliation.summary);
    write_output(
        &output.directory,
        RECONCILED_TABLE,
        output.format,
        &table::reconciled_table_data(&reconciliation.table, RECONCILED_TABLE),
    )?;

    let mut county: Option<AttributionTable> = None;
    let mut sub_county: Option<AttributionTable> = None;
    for level in &config.admin_levels {
        let polygons = load_level_polygons(level, &mut report);
        let attribution =
            attribute::attribute_records(&level.name, &reconciliation.table, &polygons)?;
        report.attribution.push(LevelSummary {
            level: level.name.clone(),
            polygons: polygons.len(),
            counts: attribution.counts,
        });
        match level.role {
            AdminRole::County => county = Some(attribution),
            AdminRole::SubCounty => sub_county = Some(attribution),
        }
    }

    let poverty = match &config.poverty {
        Some(poverty) => Some(PovertyTable::from_tabular(
            &table::read_table(&poverty.path)?,
            &poverty.key_column,
            &poverty.drop_columns,
        )?),
        None => None,
    };
    let crime = match &config.crime {
        Some(crime) => Some(CrimeSubregions::from_tabular(
            &table::read_table(&crime.path)?,
            &crime.key_column,
        )?),
        None => None,
    };

    let augmented = augment::augment(
        &reconciliation.table,
        RegionData {
            county: county.as_ref(),
            sub_county: sub_county.as_ref(),
            poverty: poverty.as_ref(),
            crime: crime.as_ref(),
        },
    );
    write_output(
        &output.directory,
        FINAL_TABLE,
        output.format,
        &table::augmented_table_data(&augmented, FINAL_TABLE),
    )?;
    report.output_rows = augmented.records.len();

    report.write_json(&output.directory.join(REPORT_FILE))?;
    let failed = report.failed_sources().count();
    if failed > 0 {
        warn!(failed, "some sources were skipped, see the run report");
    }
    info!(run_id = %report.run_id, rows = report.output_rows, "pipeline finished");
    Ok(report)
}

fn output_path(directory: &Path, stem: &str, format: OutputFormat) -> PathBuf {
    directory.join(format!("{stem}.{}", format.extension()))
}

fn write_output(directory: &Path, stem: &str, format: OutputFormat, data: &TabularData) -> Result<()> {
    let path = output_path(directory, stem, format);
    table::write_table(&path, data, format)?;
    info!(path = %path.display(), rows = data.rows.len(), "table written");
    Ok(())
}

/// Counts every point layer; unreadable layers are reported, not fatal.
///
/// `taken` holds the columns produced so far. A layer whose columns collide
/// with it is reported as failed and contributes nothing.
#[instrument(level = "info", skip_all, fields(layers = layers.len()))]
pub fn aggregate_point_layers(
    layers: &[PointLayerConfig],
    indexer: &GridIndexer,
    taken: &mut BTreeSet<String>,
) -> SourceBatch {
    let mut batch = SourceBatch::default();
    for layer in layers {
        let source = layer.path.display().to_string();
        let loaded = table::read_table(&layer.path)
            .and_then(|data| table::read_points(&data, layer.category_column.as_deref()));
        let (records, malformed) = match loaded {
            Ok(loaded) => loaded,
            Err(error) => {
                warn!(%source, %error, "skipping point layer");
                batch
                    .outcomes
                    .push(SourceOutcome::failed(source, SourceKind::Points, error));
                continue;
            }
        };

        let aggregation = match &layer.category_column {
            Some(_) => points::aggregate_point_categories(&records, indexer, &layer.label),
            None => points::aggregate_points(&records, indexer, &layer.label),
        };
        if let Some(column) = aggregation
            .tables
            .iter()
            .map(|table| table.name())
            .find(|name| taken.contains(*name))
        {
            let error = EngineError::DuplicateColumn(column.to_string());
            warn!(%source, %error, "skipping point layer");
            batch
                .outcomes
                .push(SourceOutcome::failed(source, SourceKind::Points, error));
            continue;
        }

        let cells = aggregation.tables.iter().map(|table| table.len()).sum::<usize>();
        info!(
            %source,
            columns = aggregation.tables.len(),
            points = aggregation.points_counted,
            malformed,
            "aggregated point layer"
        );
        batch.outcomes.push(SourceOutcome {
            source,
            kind: SourceKind::Points,
            status: SourceStatus::Aggregated {
                cells,
                records: aggregation.points_counted,
                skipped_nodata: 0,
                invalid_records: aggregation.invalid_coordinates + malformed,
            },
        });
        taken.extend(aggregation.tables.iter().map(|table| table.name().to_string()));
        batch.tables.extend(aggregation.tables);
    }
    batch
}

fn load_baseline(
    config: Option<&BaselineConfig>,
    indexer: &GridIndexer,
    report: &mut RunReport,
) -> BaselinePopulation {
    let Some(config) = config else {
        debug!("no baseline configured, totals come from the brackets");
        return BaselinePopulation::default();
    };
    let source = config.path.display().to_string();
    let loaded = table::read_table(&config.path)
        .and_then(|data| table::read_baseline(&data, &config.population_column, indexer));
    match loaded {
        Ok((baseline, invalid)) => {
            info!(%source, cells = baseline.len(), invalid, "baseline population loaded");
            report.sources.push(SourceOutcome {
                source,
                kind: SourceKind::Baseline,
                status: SourceStatus::Aggregated {
                    cells: baseline.len(),
                    records: baseline.len(),
                    skipped_nodata: 0,
                    invalid_records: invalid,
                },
            });
            baseline
        }
        Err(error) => {
            warn!(%source, %error, "skipping baseline population source");
            report
                .sources
                .push(SourceOutcome::failed(source, SourceKind::Baseline, error));
            BaselinePopulation::default()
        }
    }
}

fn load_level_polygons(level: &AdminLevelConfig, report: &mut RunReport) -> Vec<AdminPolygon> {
    let mut polygons = Vec::new();
    for path in &level.sources {
        let source = path.display().to_string();
        match vector_read::read_admin_polygons(path, &level.name, &level.name_property) {
            Ok(layer) => {
                info!(%source, level = %level.name, polygons = layer.polygons.len(), skipped = layer.skipped_features, "polygons loaded");
                report.sources.push(SourceOutcome {
                    source,
                    kind: SourceKind::Polygons,
                    status: SourceStatus::Loaded {
                        polygons: layer.polygons.len(),
                        skipped_features: layer.skipped_features,
                    },
                });
                polygons.extend(layer.polygons);
            }
            Err(error) => {
                warn!(%source, level = %level.name, %error, "skipping polygon source");
                report
                    .sources
                    .push(SourceOutcome::failed(source, SourceKind::Polygons, error));
            }
        }
    }
    polygons
}
