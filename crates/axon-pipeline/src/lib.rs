//! Staged meshing pipeline over a chunked label volume.
//!
//! The stages run in order, each as one barrier-terminated wave on a
//! [`WorkerPool`]:
//!
//! 1. [`Closer`] fills small gaps in every raw chunk.
//! 2. [`ChunkSurfaceExtractor`] writes one mesh fragment per (chunk, object).
//! 3. [`Assembler`] merges each object's fragments into the shared frame.
//! 4. [`LodGenerator`] derives progressively coarser levels per object.
//!
//! Every task checks for its output first and skips finished work, so an
//! interrupted run resumes by running again.

mod assembler;
mod catalog;
mod closer;
mod error;
mod extractor;
mod lod;
mod params;
mod pipeline;
mod scheduler;
mod store;

pub use assembler::{Assembler, AssemblyOutcome};
pub use catalog::ObjectCatalog;
pub use closer::Closer;
pub use error::PipelineError;
pub use extractor::{ChunkExtraction, ChunkSurfaceExtractor};
pub use lod::{LodGenerator, LodOutcome};
pub use params::{decimate_params, smooth_params};
pub use pipeline::{Pipeline, RunReport, StageSummary};
pub use scheduler::{StageReport, Task, TaskOutcome, WorkerPool};
pub use store::{ChunkStore, FragmentStamp, Generation};

/// Whether a task produced its output or found it already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The output was written by this run.
    Done,
    /// The output existed and nothing was recomputed.
    Skipped,
}
