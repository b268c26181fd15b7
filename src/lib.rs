//! Core library for the hexatlas command line application.
//!
//! The library turns gridded demographic rasters, point layers, and
//! administrative boundaries into one table keyed by hexagonal grid cells.
//! Readers and writers live under [`hexatlas::engine::io`], data
//! representations inside [`hexatlas::engine::model`], the per-stage logic in
//! [`hexatlas::engine::raster`], [`hexatlas::engine::merge`],
//! [`hexatlas::engine::reconcile`], [`hexatlas::engine::attribute`] and
//! [`hexatlas::engine::augment`], and the orchestration under
//! [`hexatlas::engine::pipeline`].

pub mod hexatlas;

pub use hexatlas::engine::{
    EngineError, Result, attribute, augment, config, error, geometry, grid, io, logging, merge,
    model, pipeline, points, raster, reconcile, report,
};
