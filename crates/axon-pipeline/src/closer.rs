//! Morphological closing of raw chunks.

use std::sync::Arc;

use axon_config::ClosingConfig;
use axon_geometry::GeometryEngine;
use axon_volume::{ChunkCoord, VolumeChunk};
use tracing::{debug, info_span};

use crate::error::PipelineError;
use crate::store::{ChunkStore, Generation};
use crate::TaskStatus;

/// Fills small gaps in a chunk's segmentation field.
///
/// The data field is dilated then eroded with the same cubic footprint. When
/// protrusion removal is enabled an opening follows, which also strips
/// foreground spikes thinner than the footprint. Labels pass through.
#[derive(Clone)]
pub struct Closer {
    engine: Arc<dyn GeometryEngine>,
    structuring_size: usize,
    remove_protrusions: bool,
}

impl Closer {
    /// Creates a closer using `engine` for the morphology.
    pub fn new(engine: Arc<dyn GeometryEngine>, config: &ClosingConfig) -> Self {
        Self {
            engine,
            structuring_size: config.structuring_size,
            remove_protrusions: config.remove_protrusions,
        }
    }

    /// Returns the closed version of `chunk`.
    pub fn close_chunk(&self, chunk: VolumeChunk) -> Result<VolumeChunk, PipelineError> {
        let size = self.structuring_size;
        let engine = &self.engine;
        let dilated = engine.morphological_dilate(chunk.data(), size);
        let mut data = engine.morphological_erode(&dilated, size);
        if self.remove_protrusions {
            let eroded = engine.morphological_erode(&data, size);
            data = engine.morphological_dilate(&eroded, size);
        }
        Ok(chunk.with_data(data)?)
    }

    /// Closes the raw chunk at `coord` into the filled namespace.
    ///
    /// Skips chunks whose filled version already exists.
    pub fn run(&self, store: &ChunkStore, coord: ChunkCoord) -> Result<TaskStatus, PipelineError> {
        let _span = info_span!("close", chunk = %coord).entered();
        if store.chunk_exists(Generation::Filled, coord) {
            debug!("Filled chunk exists, skipping");
            return Ok(TaskStatus::Skipped);
        }
        let raw = store.read_chunk(Generation::Unfilled, coord)?;
        let closed = self.close_chunk(raw)?;
        store.write_chunk(Generation::Filled, coord, &closed)?;
        debug!("Closed chunk");
        Ok(TaskStatus::Done)
    }
}
