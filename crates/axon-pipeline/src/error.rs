//! Error types for pipeline stages.

use std::path::PathBuf;

use axon_geometry::{GeometryError, MeshSerError};
use axon_volume::{ChunkCoord, ChunkSerError, VolumeError};

/// Errors raised by the chunk store and the pipeline stages.
///
/// Every variant describes the failure of one task; none of them stops
/// sibling tasks in the same stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A filesystem operation failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A chunk file could not be decoded.
    #[error("chunk {coord} is unreadable: {source}")]
    ChunkDecode {
        /// The chunk that failed.
        coord: ChunkCoord,
        /// The decode error.
        #[source]
        source: ChunkSerError,
    },
    /// A mesh file could not be decoded or encoded.
    #[error("mesh file {} is unreadable: {source}", .path.display())]
    MeshDecode {
        /// The mesh file.
        path: PathBuf,
        /// The codec error.
        #[source]
        source: MeshSerError,
    },
    /// The geometry engine failed for one object.
    #[error("geometry failure for object {object} ({context}): {source}")]
    Geometry {
        /// The object being processed.
        object: u32,
        /// Where it happened, e.g. the chunk coordinate or LOD level.
        context: String,
        /// The engine error.
        #[source]
        source: GeometryError,
    },
    /// Fragments the catalog expects for an object are not on disk.
    #[error("object {object} is missing fragments from chunks {missing:?}")]
    IncompleteAssembly {
        /// The object being assembled.
        object: u32,
        /// Chunks whose fragment is absent.
        missing: Vec<ChunkCoord>,
    },
    /// No fragment exists for the object at all.
    #[error("no fragments found for object {0}")]
    NoFragments(u32),
    /// A stage input does not exist.
    #[error("missing input {}", .0.display())]
    MissingInput(PathBuf),
    /// The object catalog could not be read or written.
    #[error("catalog {}: {reason}", .path.display())]
    Catalog {
        /// The catalog file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// The record of an assembled mesh's sources could not be written.
    #[error("assembly sources {}: {reason}", .path.display())]
    Sources {
        /// The sources file.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// A chunk coordinate or file name is invalid.
    #[error(transparent)]
    Volume(#[from] VolumeError),
    /// A task panicked; the worker survived.
    #[error("task {task} panicked: {message}")]
    TaskPanicked {
        /// Label of the task.
        task: String,
        /// The panic payload, if it was a string.
        message: String,
    },
    /// The worker pool shut down before the task ran.
    #[error("task {0} was not run: worker pool closed")]
    PoolClosed(String),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
