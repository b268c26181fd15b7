use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hexatlas_tools::config::PipelineConfig;
use hexatlas_tools::grid::{self, DEFAULT_RESOLUTION, GridIndexer};
use hexatlas_tools::logging::init_tracing;
use hexatlas_tools::pipeline;
use hexatlas_tools::{EngineError, Result};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => execute_run(args),
        Command::Cell(args) => execute_cell(args),
    }
}

fn execute_run(args: RunArgs) -> Result<()> {
    init_tracing(args.verbose)?;
    let config = PipelineConfig::load(&args.config)?;
    let report = pipeline::run_pipeline(&config)?;
    println!(
        "run {} wrote {} rows to {}",
        report.run_id,
        report.output_rows,
        config.output.directory.display()
    );
    let failed = report.failed_sources().count();
    if failed > 0 {
        println!("{failed} source(s) skipped; see {}", pipeline::REPORT_FILE);
    }
    Ok(())
}

fn execute_cell(args: CellArgs) -> Result<()> {
    let indexer = GridIndexer::new(args.resolution)?;
    let cell = indexer.cell(args.lat, args.lon)?;
    let boundary = grid::boundary(&cell.id)?;
    let vertices = boundary
        .polygons()
        .first()
        .map(|polygon| polygon.exterior().coords().len())
        .ok_or_else(|| EngineError::InvalidCellId(cell.id.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&cell)?);
    println!("boundary vertices: {vertices}");
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Aggregate demographic rasters onto a hexagonal grid and attribute cells to regions."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline described by a JSON manifest.
    Run(RunArgs),
    /// Print the grid cell containing a coordinate.
    Cell(CellArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pipeline manifest (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::Args)]
struct CellArgs {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    #[arg(long, allow_hyphen_values = true)]
    lon: f64,

    #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
    resolution: u8,
}
