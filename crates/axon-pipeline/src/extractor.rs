//! Per-chunk, per-object surface extraction.

use std::sync::Arc;

use axon_config::{AssemblyConfig, ExtractionConfig};
use axon_geometry::{DecimateParams, GeometryEngine, Mesh, SmoothParams, Vec3};
use axon_volume::{ChunkCoord, VolumeChunk};
use tracing::{debug, error, info, info_span};

use crate::error::PipelineError;
use crate::params::{decimate_params, smooth_params};
use crate::scheduler::catch_task;
use crate::store::{ChunkStore, Generation};

/// What happened to the objects of one chunk.
#[derive(Debug)]
pub struct ChunkExtraction {
    /// The chunk processed.
    pub coord: ChunkCoord,
    /// Every object id found in the chunk's labels.
    pub object_ids: Vec<u32>,
    /// Objects whose fragment was written by this run.
    pub written: Vec<u32>,
    /// Objects whose fragment already existed.
    pub skipped: Vec<u32>,
    /// Objects that failed, with the reason.
    pub failed: Vec<(u32, PipelineError)>,
}

/// Turns each object of a closed chunk into a smoothed, decimated fragment.
///
/// Objects are processed independently: an object whose fragment exists is
/// skipped, and a failure for one object is recorded without affecting the
/// others.
#[derive(Clone)]
pub struct ChunkSurfaceExtractor {
    engine: Arc<dyn GeometryEngine>,
    smoothing: SmoothParams,
    decimation: DecimateParams,
    spacing: Vec3,
}

impl ChunkSurfaceExtractor {
    /// Creates an extractor. Voxel spacing along the third axis comes from
    /// the assembly anisotropy so fragments land in the assembled frame.
    pub fn new(
        engine: Arc<dyn GeometryEngine>,
        extraction: &ExtractionConfig,
        assembly: &AssemblyConfig,
    ) -> Self {
        Self {
            engine,
            smoothing: smooth_params(&extraction.smoothing),
            decimation: decimate_params(extraction),
            spacing: Vec3::new(1.0, 1.0, assembly.anisotropy as f32),
        }
    }

    /// Contours, smooths and decimates object `id` of `chunk`.
    pub fn extract_object(&self, chunk: &VolumeChunk, id: u32) -> Result<Mesh, PipelineError> {
        let context = "extraction";
        let geometry = |source| PipelineError::Geometry {
            object: id,
            context: context.to_string(),
            source,
        };
        let surface = self
            .engine
            .extract_isosurface(chunk.data(), id, self.spacing)
            .map_err(geometry)?;
        let smoothed = self
            .engine
            .smooth(&surface, &self.smoothing)
            .map_err(geometry)?;
        let fragment = self
            .engine
            .decimate_topology_preserving(&smoothed, &self.decimation)
            .map_err(geometry)?;
        debug!(
            object = id,
            contour = surface.triangle_count(),
            fragment = fragment.triangle_count(),
            "Extracted fragment"
        );
        Ok(fragment)
    }

    /// Extracts every object of the filled chunk at `coord`.
    ///
    /// The returned error covers only the chunk as a whole (missing or
    /// corrupt file); per-object failures are listed in the result.
    pub fn extract_chunk(
        &self,
        store: &ChunkStore,
        coord: ChunkCoord,
    ) -> Result<ChunkExtraction, PipelineError> {
        let _span = info_span!("extract", chunk = %coord).entered();
        let chunk = store.read_chunk(Generation::Filled, coord)?;
        let mut report = ChunkExtraction {
            coord,
            object_ids: chunk.object_ids(),
            written: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        for &id in &report.object_ids {
            if store.fragment_exists(coord, id) {
                report.skipped.push(id);
                continue;
            }
            let label = format!("{coord}_n{id:03}");
            let outcome = catch_task(&label, || {
                let fragment = self.extract_object(&chunk, id)?;
                store.write_fragment(coord, id, &fragment)
            });
            match outcome {
                Ok(()) => report.written.push(id),
                Err(e) => {
                    error!(object = id, error = %e, "Object failed");
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            objects = report.object_ids.len(),
            written = report.written.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Chunk extracted"
        );
        Ok(report)
    }
}
