//! Configuration for the axon meshing pipeline.
//!
//! Settings persist to disk as a RON file with deployed defaults for every
//! stage. Missing sections fall back to their defaults and unknown fields
//! are ignored, so older and newer files both load. Command-line values
//! override the file.

mod cli;
mod config;
mod error;

pub use cli::{CliArgs, Command};
pub use config::{
    AssemblyConfig, CONFIG_FILE_NAME, ClosingConfig, Config, ExtractionConfig, GridConfig,
    LodConfig, LodNumbering, LoggingConfig, SeamPolicy, SmoothingConfig, StorageConfig,
    WorkerConfig,
};
pub use error::ConfigError;
