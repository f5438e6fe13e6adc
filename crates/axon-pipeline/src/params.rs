//! Translation of configuration sections into geometry parameters.

use axon_config::{ExtractionConfig, SmoothingConfig};
use axon_geometry::{DecimateParams, SmoothParams};

/// Smoothing parameters for one stage.
pub fn smooth_params(config: &SmoothingConfig) -> SmoothParams {
    SmoothParams {
        iterations: config.iterations,
        pass_band: config.pass_band,
        boundary_smoothing: config.boundary_smoothing,
        feature_edge_smoothing: config.feature_edge_smoothing,
        feature_angle: config.feature_angle,
        non_manifold_smoothing: config.non_manifold_smoothing,
        normalize_coordinates: config.normalize_coordinates,
        generate_error_scalars: config.generate_error_scalars,
    }
}

/// Decimation parameters of the extraction stage.
pub fn decimate_params(config: &ExtractionConfig) -> DecimateParams {
    DecimateParams {
        target_reduction: config.target_reduction,
        preserve_topology: config.preserve_topology,
        boundary_vertex_deletion: config.boundary_vertex_deletion,
    }
}
