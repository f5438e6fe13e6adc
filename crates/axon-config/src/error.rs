//! Configuration error types.

use std::path::PathBuf;

/// Errors raised while loading, saving or validating pipeline settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// The settings file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file or its directory could not be written.
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        /// The settings file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// The settings file.
        path: PathBuf,
        /// Parser error with position.
        #[source]
        source: ron::error::SpannedError,
    },

    /// The settings could not be rendered as RON.
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),

    /// A setting is outside its accepted range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
