//! Dense label volumes, chunk-grid addressing, chunk persistence and grey-scale morphology.

pub mod chunk;
pub mod chunk_serial;
pub mod coord;
pub mod error;
pub mod morphology;
pub mod volume;

pub use chunk::VolumeChunk;
pub use chunk_serial::ChunkSerError;
pub use coord::{ChunkCoord, GridDims};
pub use error::VolumeError;
pub use volume::Volume;
