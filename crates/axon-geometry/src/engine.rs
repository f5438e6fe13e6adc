//! The geometry seam used by the pipeline stages.
//!
//! Stages talk to a [`GeometryEngine`] rather than to the free functions so a
//! different backend, or a failing one in tests, can be substituted.

use axon_volume::{Volume, morphology};
use glam::Vec3;

use crate::contour::extract_label_surface;
use crate::decimate::{DecimateParams, decimate_topology_preserving};
use crate::error::GeometryError;
use crate::mesh::Mesh;
use crate::quadric::decimate_quadric;
use crate::smooth::{SmoothParams, windowed_sinc};

/// Volume and mesh operations required by the pipeline.
pub trait GeometryEngine: Send + Sync {
    /// Surface of the voxels of `field` equal to `value`, in the field's
    /// local frame scaled by `spacing`.
    fn extract_isosurface(
        &self,
        field: &Volume<u32>,
        value: u32,
        spacing: Vec3,
    ) -> Result<Mesh, GeometryError>;

    /// Low-pass smoothing; the result carries per-vertex error scalars when
    /// requested.
    fn smooth(&self, mesh: &Mesh, params: &SmoothParams) -> Result<Mesh, GeometryError>;

    /// Decimation that never removes boundary or non-manifold vertices
    /// unless asked to.
    fn decimate_topology_preserving(
        &self,
        mesh: &Mesh,
        params: &DecimateParams,
    ) -> Result<Mesh, GeometryError>;

    /// Quadric error-metric decimation.
    fn decimate_quadric(&self, mesh: &Mesh, target_reduction: f64) -> Result<Mesh, GeometryError>;

    /// Grey dilation with a cubic footprint of edge `size`.
    fn morphological_dilate(&self, volume: &Volume<u32>, size: usize) -> Volume<u32>;

    /// Grey erosion with a cubic footprint of edge `size`.
    fn morphological_erode(&self, volume: &Volume<u32>, size: usize) -> Volume<u32>;
}

/// The built-in CPU implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeGeometry;

impl GeometryEngine for NativeGeometry {
    fn extract_isosurface(
        &self,
        field: &Volume<u32>,
        value: u32,
        spacing: Vec3,
    ) -> Result<Mesh, GeometryError> {
        extract_label_surface(field, value, spacing)
    }

    fn smooth(&self, mesh: &Mesh, params: &SmoothParams) -> Result<Mesh, GeometryError> {
        windowed_sinc(mesh, params)
    }

    fn decimate_topology_preserving(
        &self,
        mesh: &Mesh,
        params: &DecimateParams,
    ) -> Result<Mesh, GeometryError> {
        decimate_topology_preserving(mesh, params)
    }

    fn decimate_quadric(&self, mesh: &Mesh, target_reduction: f64) -> Result<Mesh, GeometryError> {
        decimate_quadric(mesh, target_reduction)
    }

    fn morphological_dilate(&self, volume: &Volume<u32>, size: usize) -> Volume<u32> {
        morphology::dilate(volume, size)
    }

    fn morphological_erode(&self, volume: &Volume<u32>, size: usize) -> Volume<u32> {
        morphology::erode(volume, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_is_object_safe() {
        let engine: Box<dyn GeometryEngine> = Box::new(NativeGeometry);
        let mut field = Volume::<u32>::new([8, 8, 8]);
        field.fill_box([2, 2, 2], [6, 6, 6], 2);
        let closed = engine.morphological_erode(&engine.morphological_dilate(&field, 3), 3);
        assert_eq!(closed, field);

        let mesh = engine.extract_isosurface(&closed, 2, Vec3::ONE).unwrap();
        let smoothed = engine.smooth(&mesh, &SmoothParams::default()).unwrap();
        assert!(smoothed.errors.is_some());
        let reduced = engine
            .decimate_topology_preserving(&smoothed, &DecimateParams::default())
            .unwrap();
        assert!(reduced.triangle_count() <= mesh.triangle_count());
    }
}
