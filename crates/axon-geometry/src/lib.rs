//! Geometry engine: label contouring, windowed-sinc smoothing, decimation and mesh codecs.

mod connectivity;
mod contour_tables;

pub mod contour;
pub mod decimate;
pub mod engine;
pub mod error;
pub mod mesh;
pub mod mesh_serial;
pub mod quadric;
pub mod smooth;

pub use contour::extract_label_surface;
pub use decimate::{DecimateParams, decimate_topology_preserving};
pub use engine::{GeometryEngine, NativeGeometry};
pub use error::GeometryError;
pub use mesh::{Bounds, Mesh};
pub use mesh_serial::{MeshSerError, read_obj, write_obj};
pub use quadric::decimate_quadric;
pub use smooth::{SmoothParams, windowed_sinc};

pub use glam::Vec3;
