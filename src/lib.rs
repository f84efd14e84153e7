//! Thumbvault - a two-tier thumbnail cache for on-device photo libraries.
//!
//! Encoded source images are downsampled to a display footprint, kept in a
//! bounded in-memory LRU cache and persisted to a disk cache so later
//! launches skip the decode. Lookups go memory, then disk, then a fresh
//! downsample of the source bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, key derivation, and port definitions.
pub mod domain;
/// Infrastructure layer containing the cache tiers, pipeline, and configuration.
pub mod infrastructure;
/// Presentation layer containing the CLI command handlers.
pub mod presentation;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "thumbvault";
