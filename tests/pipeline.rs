use std::fs;
use std::path::Path;

use hexatlas_tools::EngineError;
use hexatlas_tools::config::PipelineConfig;
use hexatlas_tools::io::table::{self, OutputFormat};
use hexatlas_tools::pipeline::{self, FINAL_TABLE, MERGED_TABLE, RECONCILED_TABLE, REPORT_FILE};
use hexatlas_tools::report::{RunReport, SourceKind, SourceOutcome, SourceStatus};
use serde_json::{Value, json};
use tempfile::tempdir;

const HEADER: &str = "ncols 2\nnrows 2\nxllcorner 36.8\nyllcorner -1.3\ncellsize 0.05\nNODATA_value -9999\n";

fn square_feature(name: &str, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Value {
    json!({
        "type": "Feature",
        "properties": { "NAME": name },
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [min_x, min_y], [max_x, min_y], [max_x, max_y], [min_x, max_y], [min_x, min_y]
            ]]
        }
    })
}

fn write_fixtures(dir: &Path) {
    fs::create_dir_all(dir.join("rasters")).expect("raster dir");
    fs::write(
        dir.join("rasters/KEN_agesex_m15.asc"),
        format!("{HEADER}10 20\n30 -9999\n"),
    )
    .expect("m15 raster");
    fs::write(dir.join("rasters/KEN_agesex_f15.asc"), format!("{HEADER}5 5\n5 5\n"))
        .expect("f15 raster");

    fs::write(
        dir.join("schools.csv"),
        "latitude,longitude\n-1.22,36.82\n-1.22,36.82\n,\n",
    )
    .expect("schools");
    fs::write(
        dir.join("baseline.csv"),
        "latitude,longitude,population\n\
         -1.2,36.8,1000\n-1.2,36.85,NaN\n-1.25,36.8,40\n-1.25,36.85,\n-1.22,36.82,3\nnorth,36.8,7\n",
    )
    .expect("baseline");

    let counties = json!({
        "type": "FeatureCollection",
        "features": [square_feature("Nairobi", 36.7, -1.5, 37.0, -1.1)]
    });
    fs::write(dir.join("counties.geojson"), counties.to_string()).expect("counties");
    let sub_counties = json!({
        "type": "FeatureCollection",
        "features": [
            square_feature("Westlands", 36.7, -1.5, 37.0, -1.1),
            { "type": "Feature", "properties": {}, "geometry": null }
        ]
    });
    fs::write(dir.join("sub_counties.geojson"), sub_counties.to_string()).expect("sub-counties");

    fs::write(
        dir.join("poverty.csv"),
        "Country,Subnational region,MPI\nKenya,Nairobi,0.02\nKenya,Mombasa,0.10\n",
    )
    .expect("poverty");
    fs::write(dir.join("crime.csv"), "sub-county\n WESTLANDS\n").expect("crime");
}

fn manifest(format: &str) -> Value {
    json!({
        "resolution": 8,
        "rasters": [
            { "path": "rasters/KEN_agesex_m15.asc" },
            { "path": "rasters/KEN_agesex_f15.asc" },
            { "path": "rasters/KEN_agesex_m20.asc" }
        ],
        "point_layers": [{ "path": "schools.csv", "label": "schools" }],
        "baseline": { "path": "baseline.csv" },
        "admin_levels": [
            {
                "name": "counties",
                "role": "county",
                "sources": ["counties.geojson"],
                "name_property": "NAME"
            },
            {
                "name": "sub_counties",
                "role": "sub_county",
                "sources": ["missing_sub_counties.geojson", "sub_counties.geojson"],
                "name_property": "NAME"
            }
        ],
        "poverty": { "path": "poverty.csv" },
        "crime": { "path": "crime.csv" },
        "output": { "directory": "out", "format": format, "write_feature_tables": true }
    })
}

fn load_config(dir: &Path, manifest: &Value) -> PipelineConfig {
    let path = dir.join("manifest.json");
    fs::write(&path, manifest.to_string()).expect("manifest written");
    PipelineConfig::load(&path).expect("manifest loaded")
}

fn outcome<'a>(report: &'a RunReport, kind: SourceKind, suffix: &str) -> &'a SourceOutcome {
    report
        .sources
        .iter()
        .find(|outcome| outcome.kind == kind && outcome.source.ends_with(suffix))
        .expect("source outcome")
}

fn column_sum(data: &table::TabularData, column: &str) -> f64 {
    let index = data.column_index(column).expect("column present");
    data.rows
        .iter()
        .filter_map(|row| row[index].parse::<f64>().ok())
        .sum()
}

#[test]
fn pipeline_produces_augmented_table_and_report() {
    let temp_dir = tempdir().expect("temporary directory");
    write_fixtures(temp_dir.path());
    let config = load_config(temp_dir.path(), &manifest("csv"));

    let report = pipeline::run_pipeline(&config).expect("pipeline ran");

    let failed: Vec<&str> = report
        .failed_sources()
        .map(|outcome| outcome.source.as_str())
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().any(|source| source.ends_with("KEN_agesex_m20.asc")));
    assert!(failed.iter().any(|source| source.ends_with("missing_sub_counties.geojson")));
    assert_eq!(report.sources.len(), 8);

    let baseline = outcome(&report, SourceKind::Baseline, "baseline.csv");
    assert!(matches!(
        baseline.status,
        SourceStatus::Aggregated { cells: 5, invalid_records: 1, .. }
    ));
    let sub_counties = outcome(&report, SourceKind::Polygons, "/sub_counties.geojson");
    assert_eq!(
        sub_counties.status,
        SourceStatus::Loaded { polygons: 1, skipped_features: 1 }
    );

    let reconciliation = report.reconciliation.expect("reconciliation summary");
    assert_eq!(reconciliation.records, 5);
    assert_eq!(reconciliation.baseline_filled, 2);
    assert_eq!(report.output_rows, reconciliation.records);
    assert_eq!(report.attribution.len(), 2);
    for level in &report.attribution {
        assert_eq!(level.polygons, 1);
        assert_eq!(level.counts.total(), report.output_rows);
    }

    let out = temp_dir.path().join("out");
    assert!(out.join(format!("{MERGED_TABLE}.csv")).exists());
    assert!(out.join(format!("{RECONCILED_TABLE}.csv")).exists());
    assert!(out.join("features/population_m15.csv").exists());
    assert!(out.join("features/schools.csv").exists());

    let final_table = table::read_csv(&out.join(format!("{FINAL_TABLE}.csv"))).expect("final table");
    assert_eq!(final_table.rows.len(), report.output_rows);
    assert_eq!(final_table.columns[0], "h3");
    for column in ["county", "sub_county", "MPI", "high_crime_in_county"] {
        assert!(final_table.column_index(column).is_some(), "missing {column}");
    }
    assert!(final_table.column_index("Country").is_none());
    assert_eq!(column_sum(&final_table, "population_m15"), 60.0);
    assert_eq!(column_sum(&final_table, "population_f15"), 20.0);
    assert_eq!(column_sum(&final_table, "schools"), 2.0);

    let county = final_table.column_index("county").expect("county");
    let mpi = final_table.column_index("MPI").expect("MPI");
    let crime = final_table.column_index("high_crime_in_county").expect("crime flag");
    for row in &final_table.rows {
        assert_eq!(row[county], "Nairobi");
        assert_eq!(row[mpi], "0.02");
        assert_eq!(row[crime], "1");
    }

    let report_json: Value =
        serde_json::from_str(&fs::read_to_string(out.join(REPORT_FILE)).expect("report file"))
            .expect("report parsed");
    assert_eq!(report_json["run_id"], json!(report.run_id.to_string()));
    let statuses: Vec<&str> = report_json["sources"]
        .as_array()
        .expect("sources array")
        .iter()
        .filter_map(|source| source["status"].as_str())
        .collect();
    assert_eq!(statuses.iter().filter(|status| **status == "failed").count(), 2);
    assert_eq!(statuses.iter().filter(|status| **status == "loaded").count(), 2);
    let loaded = report_json["sources"]
        .as_array()
        .expect("sources array")
        .iter()
        .find(|source| source["source"].as_str().is_some_and(|name| name.ends_with("/sub_counties.geojson")))
        .expect("sub-county source");
    assert_eq!(loaded["polygons"], json!(1));
    assert_eq!(loaded["skipped_features"], json!(1));
    assert!(loaded.get("skipped_nodata").is_none());
}

#[test]
fn colliding_category_layer_is_reported_not_fatal() {
    let temp_dir = tempdir().expect("temporary directory");
    write_fixtures(temp_dir.path());
    fs::write(
        temp_dir.path().join("survey.csv"),
        "latitude,longitude,kind\n-1.22,36.82,m15\n-1.22,36.82,f60\n",
    )
    .expect("survey");
    let mut manifest = manifest("csv");
    manifest["point_layers"]
        .as_array_mut()
        .expect("point layers")
        .push(json!({ "path": "survey.csv", "label": "population", "category_column": "kind" }));
    let config = load_config(temp_dir.path(), &manifest);

    let report = pipeline::run_pipeline(&config).expect("pipeline ran");

    let survey = outcome(&report, SourceKind::Points, "survey.csv");
    assert!(
        matches!(&survey.status, SourceStatus::Failed { error } if error.contains("population_m15"))
    );
    assert_eq!(report.failed_sources().count(), 3);

    let out = temp_dir.path().join("out");
    let final_table = table::read_csv(&out.join(format!("{FINAL_TABLE}.csv"))).expect("final table");
    assert_eq!(column_sum(&final_table, "population_m15"), 60.0);
    assert!(final_table.column_index("population_f60").is_none());
}

#[test]
fn duplicate_raster_columns_are_rejected_at_load() {
    let temp_dir = tempdir().expect("temporary directory");
    write_fixtures(temp_dir.path());
    let mut manifest = manifest("csv");
    manifest["rasters"]
        .as_array_mut()
        .expect("rasters")
        .push(json!({ "path": "rasters/KEN_agesex_m15.asc", "label": "m15" }));
    let path = temp_dir.path().join("manifest.json");
    fs::write(&path, manifest.to_string()).expect("manifest written");

    let error = PipelineConfig::load(&path).expect_err("duplicate column");

    assert!(matches!(error, EngineError::Config(message) if message.contains("population_m15")));
}

#[test]
fn pipeline_writes_xlsx_tables() {
    let temp_dir = tempdir().expect("temporary directory");
    write_fixtures(temp_dir.path());
    let config = load_config(temp_dir.path(), &manifest("xlsx"));
    assert_eq!(config.output.format, OutputFormat::Xlsx);

    let report = pipeline::run_pipeline(&config).expect("pipeline ran");

    let path = temp_dir.path().join("out").join(format!("{FINAL_TABLE}.xlsx"));
    let final_table = table::read_table(&path).expect("workbook read");
    assert_eq!(final_table.rows.len(), report.output_rows);
    assert_eq!(column_sum(&final_table, "population_m15"), 60.0);
}

#[test]
fn level_without_readable_polygons_aborts() {
    let temp_dir = tempdir().expect("temporary directory");
    write_fixtures(temp_dir.path());
    let mut manifest = manifest("csv");
    manifest["admin_levels"][0]["sources"] = json!(["nowhere.geojson"]);
    let config = load_config(temp_dir.path(), &manifest);

    let error = pipeline::run_pipeline(&config).expect_err("level without polygons");

    assert!(matches!(error, EngineError::NoPolygons { level } if level == "counties"));
}

#[test]
fn missing_manifest_is_reported() {
    let temp_dir = tempdir().expect("temporary directory");
    let error = PipelineConfig::load(&temp_dir.path().join("absent.json")).expect_err("missing");
    assert!(matches!(error, EngineError::MissingInput(_)));
}
