//! Command-line argument parsing for the axon pipeline.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::Config;

/// axon command-line arguments.
///
/// CLI values override settings loaded from `axon.ron`.
#[derive(Parser, Debug)]
#[command(name = "axon", about = "Chunked label volume to multi-resolution neuron meshes")]
pub struct CliArgs {
    /// Pipeline stage to run.
    #[command(subcommand)]
    pub command: Command,

    /// Path to config directory (defaults to the current directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Chunk store root directory.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Number of workers.
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Directory for JSON log files.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

/// Pipeline stages exposed on the command line.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close every raw chunk into the filled namespace.
    Close,
    /// Extract per-object fragments from every filled chunk.
    Extract,
    /// Assemble fragments into one mesh per object.
    Assemble {
        /// Only assemble this object id.
        #[arg(long)]
        object: Option<u32>,
    },
    /// Generate LOD levels for assembled objects.
    Lod {
        /// Only generate levels for this object id.
        #[arg(long)]
        object: Option<u32>,
    },
    /// Run close, extract, assemble and LOD in order.
    Run,
    /// Rebuild the object catalog from chunk labels.
    Catalog,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref root) = args.root {
            self.storage.root = root.clone();
        }
        if let Some(workers) = args.workers {
            self.workers.count = workers;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(command: Command) -> CliArgs {
        CliArgs {
            command,
            config: None,
            root: None,
            workers: None,
            log_level: None,
            log_dir: None,
        }
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let mut cli = args(Command::Run);
        cli.root = Some(PathBuf::from("/data/volume"));
        cli.workers = Some(2);
        config.apply_cli_overrides(&cli);
        assert_eq!(config.storage.root, PathBuf::from("/data/volume"));
        assert_eq!(config.workers.count, 2);
        // Non-overridden fields retain defaults
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&args(Command::Extract));
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_subcommand_with_global_flags() {
        let cli =
            CliArgs::try_parse_from(["axon", "assemble", "--object", "7", "--workers", "3"])
                .unwrap();
        assert_eq!(cli.command, Command::Assemble { object: Some(7) });
        assert_eq!(cli.workers, Some(3));
    }

    #[test]
    fn test_missing_subcommand_is_error() {
        assert!(CliArgs::try_parse_from(["axon"]).is_err());
    }
}
