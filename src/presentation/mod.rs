//! Presentation layer: the command-line surface.

/// Command handlers.
pub mod cli;

pub use cli::{DiskReport, build_pipeline, run};
