pub mod attribute;
pub mod augment;
pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod io;
pub mod logging;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod points;
pub mod raster;
pub mod reconcile;
pub mod report;

pub use error::{EngineError, Result};
