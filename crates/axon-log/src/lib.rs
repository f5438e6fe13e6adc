//! Structured logging for the axon pipeline.
//!
//! Console output carries uptime timestamps, module paths and worker thread
//! names (`axon-worker-N`), so events from concurrent chunk and object tasks
//! can be told apart. An optional JSON file keeps a machine-readable record
//! of long runs. The filter honours `RUST_LOG` first, then the configured
//! level.

use std::fs::File;
use std::path::{Path, PathBuf};

use axon_config::Config;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when neither `RUST_LOG` nor the config specifies a valid
/// one. Per-pass geometry events stay quiet unless asked for.
pub const DEFAULT_FILTER: &str = "info,axon_geometry=warn";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE_NAME: &str = "axon.log";

/// Installs the global tracing subscriber.
///
/// The JSON layer is added when `json_file` is set and `log_dir` is given.
/// Returns the path of the JSON log if one was opened. A log file that
/// cannot be created is reported through the console layer and skipped.
///
/// ```no_run
/// use axon_config::Config;
///
/// let config = Config::default();
/// let json = axon_log::init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(
    log_dir: Option<&Path>,
    json_file: bool,
    config: Option<&Config>,
) -> Option<PathBuf> {
    let mut json_path = None;
    let mut failure = None;
    let file = match log_dir.filter(|_| json_file).map(|dir| (dir, open_json_log(dir))) {
        Some((_, Ok((file, path)))) => {
            json_path = Some(path);
            Some(file)
        }
        Some((dir, Err(e))) => {
            failure = Some((dir, e));
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console_layer())
        .with(file.map(json_layer))
        .init();

    if let Some((dir, e)) = failure {
        tracing::warn!(dir = %dir.display(), error = %e, "JSON log disabled");
    }
    json_path
}

/// `RUST_LOG` if set and valid, otherwise [`configured_filter`].
pub fn env_filter(config: Option<&Config>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured_filter(config))
}

/// The filter named by the config; an empty or malformed one falls back to
/// [`DEFAULT_FILTER`].
pub fn configured_filter(config: Option<&Config>) -> EnvFilter {
    config
        .map(|c| c.logging.level.as_str())
        .filter(|level| !level.is_empty())
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_timer(fmt::time::uptime())
}

fn json_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_names(true)
        .with_current_span(true)
        .with_timer(fmt::time::uptime())
}

fn open_json_log(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    Ok((File::create(&path)?, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(level: &str) -> Config {
        let mut config = Config::default();
        config.logging.level = level.to_string();
        config
    }

    #[test]
    fn test_configured_filter_from_config() {
        let filter = configured_filter(Some(&config_with("debug,axon_pipeline=trace")));
        assert_eq!(
            filter.to_string(),
            EnvFilter::new("debug,axon_pipeline=trace").to_string()
        );
    }

    #[test]
    fn test_configured_filter_falls_back() {
        let default = EnvFilter::new(DEFAULT_FILTER).to_string();
        assert_eq!(configured_filter(None).to_string(), default);
        assert_eq!(configured_filter(Some(&config_with(""))).to_string(), default);
        assert_eq!(
            configured_filter(Some(&config_with("axon_pipeline=loud"))).to_string(),
            default
        );
    }

    #[test]
    fn test_stage_filters_parse() {
        for filter in [
            DEFAULT_FILTER,
            "warn,axon_pipeline::extractor=debug",
            "info,axon_geometry::quadric=trace,axon_volume=off",
        ] {
            assert!(EnvFilter::try_new(filter).is_ok(), "rejected {filter}");
        }
    }

    #[test]
    fn test_open_json_log_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (_, path) = open_json_log(&dir.path().join("a/b")).unwrap();
        assert_eq!(path, dir.path().join("a/b").join(LOG_FILE_NAME));
        assert!(path.is_file());

        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        assert!(open_json_log(&blocker).is_err());
    }

    // The only test that installs the global subscriber.
    #[test]
    fn test_json_layer_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let path = init_logging(Some(&log_dir), true, None);
        assert_eq!(path.as_deref(), Some(log_dir.join(LOG_FILE_NAME).as_path()));
        tracing::info!(chunk = "x0y0z0", "written to the json layer");
        assert!(log_dir.join(LOG_FILE_NAME).is_file());
    }
}
