use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error type covering the different failure cases that can occur when the
/// engine ingests sources, builds the hexagon table, or writes outputs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a delimited table cannot be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// A raster or vector source could not be opened or parsed. The pipeline
    /// records it and carries on with the remaining sources.
    #[error("failed to read source '{source_name}': {reason}")]
    SourceRead { source_name: String, reason: String },

    /// A coordinate fell outside the valid latitude/longitude range.
    #[error("invalid coordinate (lat {lat}, lon {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// Raised for grid resolutions the hexagonal index does not support.
    #[error("invalid grid resolution {0}")]
    InvalidResolution(u8),

    /// Raised when a textual cell identifier cannot be decoded.
    #[error("invalid cell identifier '{0}'")]
    InvalidCellId(String),

    /// An administrative level has no polygons to attribute against.
    #[error("no polygons available for administrative level '{level}'")]
    NoPolygons { level: String },

    /// Raised when raster dimensions and values disagree.
    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    /// Raised when a polygon ring or geometry object is malformed.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Raised when a table lacks a column the engine relies on.
    #[error("table '{table}' is missing column '{column}'")]
    MissingColumn { table: String, column: String },

    /// Raised when numeric parsing fails for a table cell.
    #[error("invalid numeric value '{value}' in column {column}")]
    InvalidNumber { column: String, value: String },

    /// Raised when two merged feature tables claim the same column name.
    #[error("duplicate feature column '{0}'")]
    DuplicateColumn(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the pipeline manifest is inconsistent.
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl EngineError {
    /// Builds a [`EngineError::SourceRead`] for the named source.
    pub fn source_read(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceRead {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }
}
