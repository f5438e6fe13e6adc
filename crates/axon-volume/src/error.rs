//! Volume error types.

/// Errors raised while building or addressing volumes and chunks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VolumeError {
    /// The sample buffer does not match the requested dimensions.
    #[error("buffer of {actual} samples does not fill a {dims:?} volume")]
    BufferSize {
        /// Requested dimensions.
        dims: [usize; 3],
        /// Number of samples supplied.
        actual: usize,
    },
    /// Intensity and label arrays of one chunk disagree in shape.
    #[error("data shape {data:?} does not match label shape {labels:?}")]
    ShapeMismatch {
        /// Shape of the data array.
        data: [usize; 3],
        /// Shape of the label array.
        labels: [usize; 3],
    },
    /// A chunk coordinate lies outside the configured grid.
    #[error("chunk {coord} is outside grid {grid:?}")]
    OutsideGrid {
        /// Offending coordinate, formatted as its file stem.
        coord: String,
        /// Grid dimensions.
        grid: [u32; 3],
    },
    /// A file name does not carry a chunk coordinate.
    #[error("`{0}` does not encode a chunk coordinate")]
    BadStem(String),
}
