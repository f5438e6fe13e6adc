//! Progressive level-of-detail generation.

use std::sync::Arc;

use axon_config::{LodConfig, LodNumbering};
use axon_geometry::{GeometryEngine, GeometryError, Mesh, SmoothParams};
use tracing::{debug, info, info_span};

use crate::TaskStatus;
use crate::error::PipelineError;
use crate::params::smooth_params;
use crate::store::ChunkStore;

/// Which levels of one object were produced or found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LodOutcome {
    /// Object id.
    pub object: u32,
    /// `Skipped` when every level already existed.
    pub status: TaskStatus,
    /// Labels of the levels written by this run.
    pub written: Vec<i32>,
    /// Labels of the levels that already existed.
    pub skipped: Vec<i32>,
}

/// Derives each level from the previous one by smoothing and quadric
/// decimation, so triangle counts never increase down the sequence.
#[derive(Clone)]
pub struct LodGenerator {
    engine: Arc<dyn GeometryEngine>,
    smoothing: SmoothParams,
    reduction: f64,
    levels: u32,
    numbering: LodNumbering,
}

impl LodGenerator {
    /// Creates a generator from the LOD settings.
    pub fn new(engine: Arc<dyn GeometryEngine>, config: &LodConfig) -> Self {
        Self {
            engine,
            smoothing: smooth_params(&config.smoothing),
            reduction: config.target_reduction,
            levels: config.levels,
            numbering: config.numbering,
        }
    }

    /// Persisted labels of every level, finest first.
    pub fn labels(&self) -> Vec<i32> {
        (0..self.levels).map(|i| self.numbering.label(i)).collect()
    }

    /// Computes the level that follows `mesh`.
    pub fn next_level(&self, mesh: &Mesh) -> Result<Mesh, GeometryError> {
        let smoothed = self.engine.smooth(mesh, &self.smoothing)?;
        self.engine.decimate_quadric(&smoothed, self.reduction)
    }

    /// Writes every missing level of object `id`.
    ///
    /// The first level derives from the assembled mesh. Generation resumes
    /// after the last consecutive level already on disk, reading it back as
    /// the starting point; levels that exist are never rewritten.
    pub fn generate(&self, store: &ChunkStore, id: u32) -> Result<LodOutcome, PipelineError> {
        let _span = info_span!("lod", object = id).entered();
        let labels = self.labels();
        let mut outcome = LodOutcome {
            object: id,
            status: TaskStatus::Skipped,
            written: Vec::new(),
            skipped: Vec::new(),
        };

        let Some(first_missing) = labels.iter().position(|&l| !store.lod_exists(id, l)) else {
            debug!("Every level exists, skipping");
            outcome.skipped = labels;
            return Ok(outcome);
        };
        outcome.skipped.extend_from_slice(&labels[..first_missing]);

        let mut current = match first_missing {
            0 => store.read_assembled(id)?,
            n => store.read_lod(id, labels[n - 1])?,
        };
        for &label in &labels[first_missing..] {
            if store.lod_exists(id, label) {
                current = store.read_lod(id, label)?;
                outcome.skipped.push(label);
                continue;
            }
            current = self
                .next_level(&current)
                .map_err(|source| PipelineError::Geometry {
                    object: id,
                    context: format!("LOD level {label}"),
                    source,
                })?;
            store.write_lod(id, label, &current)?;
            debug!(level = label, triangles = current.triangle_count(), "Level written");
            outcome.written.push(label);
        }

        outcome.status = TaskStatus::Done;
        info!(written = outcome.written.len(), "LOD sequence complete");
        Ok(outcome)
    }
}
