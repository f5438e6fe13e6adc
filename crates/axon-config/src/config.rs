//! Configuration structs with deployed defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// File name of the pipeline configuration inside a config directory.
pub const CONFIG_FILE_NAME: &str = "axon.ron";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Chunk grid bounds.
    pub grid: GridConfig,
    /// Morphological closing of raw chunks.
    pub closing: ClosingConfig,
    /// Per-chunk surface extraction.
    pub extraction: ExtractionConfig,
    /// Fragment assembly into global meshes.
    pub assembly: AssemblyConfig,
    /// Level-of-detail generation.
    pub lod: LodConfig,
    /// Worker pool sizing.
    pub workers: WorkerConfig,
    /// Chunk store location.
    pub storage: StorageConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Chunk grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// Number of chunks along each axis `(i, j, k)`.
    pub dims: (u32, u32, u32),
}

/// Morphological closing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClosingConfig {
    /// Edge length in voxels of the cubic flat structuring element.
    pub structuring_size: usize,
    /// Follow the closing with an opening so thin foreground spikes are removed too.
    pub remove_protrusions: bool,
}

/// Windowed-sinc smoothing parameters shared by extraction and LOD generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Number of filter iterations (Chebyshev polynomial order).
    pub iterations: u32,
    /// Pass-band in `(0, 2]`. Lower values smooth harder and shrink more.
    pub pass_band: f64,
    /// Allow boundary vertices to move.
    pub boundary_smoothing: bool,
    /// Detect sharp interior edges and smooth only along them.
    pub feature_edge_smoothing: bool,
    /// Dihedral angle in degrees above which an edge counts as a feature edge.
    pub feature_angle: f64,
    /// Allow vertices on non-manifold edges to move.
    pub non_manifold_smoothing: bool,
    /// Map coordinates into a unit cube while filtering.
    pub normalize_coordinates: bool,
    /// Record how far each vertex moved as a per-vertex scalar.
    pub generate_error_scalars: bool,
}

/// Chunk surface extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Smoothing applied to each raw isosurface.
    pub smoothing: SmoothingConfig,
    /// Fraction of triangles to remove in `[0, 1)`.
    pub target_reduction: f64,
    /// Reject collapses that would change mesh topology.
    pub preserve_topology: bool,
    /// Allow decimation to remove vertices on the mesh boundary.
    pub boundary_vertex_deletion: bool,
}

/// How fragments that share a chunk boundary are merged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SeamPolicy {
    /// Plain geometric union; boundary vertices are kept twice.
    #[default]
    Duplicate,
    /// Merge vertices that coincide after translation.
    Weld,
}

/// Fragment assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Physical extent `(W, H, D)` of one chunk along each axis.
    pub chunk_extent: (f64, f64, f64),
    /// Voxel spacing correction for the third axis.
    pub anisotropy: f64,
    /// Seam handling between adjoining fragments.
    pub seam_policy: SeamPolicy,
    /// Assemble whatever fragments exist instead of failing on missing ones.
    pub allow_partial: bool,
}

/// Labelling scheme for persisted LOD levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum LodNumbering {
    /// Levels are labelled `0..N`.
    #[default]
    ZeroBased,
    /// Levels are labelled `-1..N-1`, matching files produced by earlier tooling.
    Legacy,
}

impl LodNumbering {
    /// Returns the persisted label for the level at position `index`.
    pub fn label(self, index: u32) -> i32 {
        match self {
            LodNumbering::ZeroBased => index as i32,
            LodNumbering::Legacy => index as i32 - 1,
        }
    }
}

/// Level-of-detail generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Number of levels produced per object.
    pub levels: u32,
    /// Smoothing applied before each decimation pass.
    pub smoothing: SmoothingConfig,
    /// Fraction of triangles removed per level in `[0, 1)`.
    pub target_reduction: f64,
    /// Level labelling scheme.
    pub numbering: LodNumbering,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of single-threaded workers.
    pub count: usize,
}

/// Chunk store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the chunk store.
    pub root: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter (e.g., "debug", "info,axon_pipeline=trace").
    pub level: String,
    /// Also write JSON logs to a file when a log directory is given.
    pub json_file: bool,
}

// --- Default implementations ---

impl Default for GridConfig {
    fn default() -> Self {
        Self { dims: (6, 9, 4) }
    }
}

impl Default for ClosingConfig {
    fn default() -> Self {
        Self {
            structuring_size: 5,
            remove_protrusions: false,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            pass_band: 0.01,
            boundary_smoothing: false,
            feature_edge_smoothing: false,
            feature_angle: 45.0,
            non_manifold_smoothing: true,
            normalize_coordinates: true,
            generate_error_scalars: true,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            smoothing: SmoothingConfig::default(),
            target_reduction: 0.8,
            preserve_topology: true,
            boundary_vertex_deletion: false,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            chunk_extent: (1023.0, 1023.0, 1023.0),
            anisotropy: 2.49,
            seam_policy: SeamPolicy::Duplicate,
            allow_partial: false,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            levels: 5,
            smoothing: SmoothingConfig {
                iterations: 20,
                pass_band: 0.1,
                ..SmoothingConfig::default()
            },
            target_reduction: 0.7,
            numbering: LodNumbering::ZeroBased,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 4 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("volume"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_file: false,
        }
    }
}

// --- Validation ---

fn check_reduction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not in [0, 1)"),
        })
    }
}

fn check_smoothing(field: &'static str, smoothing: &SmoothingConfig) -> Result<(), ConfigError> {
    if !(smoothing.pass_band > 0.0 && smoothing.pass_band <= 2.0) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("pass band {} is not in (0, 2]", smoothing.pass_band),
        });
    }
    Ok(())
}

impl Config {
    /// Checks that every setting is within its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (gi, gj, gk) = self.grid.dims;
        if gi == 0 || gj == 0 || gk == 0 {
            return Err(ConfigError::Invalid {
                field: "grid.dims",
                reason: "every axis needs at least one chunk".to_string(),
            });
        }
        if self.closing.structuring_size == 0 {
            return Err(ConfigError::Invalid {
                field: "closing.structuring_size",
                reason: "must be at least 1".to_string(),
            });
        }
        check_smoothing("extraction.smoothing", &self.extraction.smoothing)?;
        check_smoothing("lod.smoothing", &self.lod.smoothing)?;
        check_reduction("extraction.target_reduction", self.extraction.target_reduction)?;
        check_reduction("lod.target_reduction", self.lod.target_reduction)?;
        if self.assembly.anisotropy <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "assembly.anisotropy",
                reason: "must be positive".to_string(),
            });
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid {
                field: "workers.count",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Reads `axon.ron` from `config_dir`, writing the defaults there first
    /// when the file does not exist yet.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Wrote default pipeline settings to {}", path.display());
            return Ok(config);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = ron::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        log::info!("Pipeline settings loaded from {}", path.display());
        Ok(config)
    }

    /// Writes the settings to `config_dir/axon.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let write_err = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(config_dir).map_err(write_err)?;
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(false)
            .enumerate_arrays(false);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;
        std::fs::write(&path, text).map_err(write_err)
    }

    /// Re-reads `config_dir/axon.ron` and returns it only if it differs
    /// from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = config_dir.join(CONFIG_FILE_NAME);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let fresh: Config =
            ron::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        if fresh == *self {
            return Ok(None);
        }
        log::info!("Pipeline settings changed on disk");
        Ok(Some(fresh))
    }
}
