//! Error types for geometry operations.

/// Errors raised by the geometry engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    /// The requested label produced no surface in the field.
    #[error("label {label} has no surface in the field")]
    EmptySurface {
        /// The label that was contoured.
        label: u32,
    },
    /// An operation that needs triangles received an empty mesh.
    #[error("mesh has no triangles")]
    EmptyMesh,
    /// A triangle references a vertex that does not exist.
    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// The offending index.
        index: u32,
        /// Number of vertices in the mesh.
        vertex_count: usize,
    },
    /// A parameter is outside its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
