//! Windowed-sinc mesh smoothing (Taubin's non-shrinking low-pass filter).
//!
//! Each vertex moves under a Chebyshev polynomial of the discrete Laplacian
//! whose coefficients approximate an ideal low-pass response, tapered by a
//! Hamming window. High-frequency staircase noise from voxel contouring is
//! removed while the overall shape keeps its volume.
//!
//! Vertices are classified by their incident edges. Boundary edges (one
//! triangle), non-manifold edges (three or more) and, optionally, feature
//! edges (dihedral angle above a threshold) are special. A vertex with no
//! special edge is smoothed over all its neighbours; a vertex on exactly two
//! special edges is smoothed along them; anything else stays fixed.

use std::f64::consts::PI;

use glam::{DVec3, Vec3};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::GeometryError;
use crate::mesh::Mesh;

/// Maximum Newton steps when solving for the pass-band shift.
const MAX_NEWTON_STEPS: usize = 500;

/// Target accuracy of the response at the pass band.
const NEWTON_TOLERANCE: f64 = 1e-3;

/// Parameters of [`windowed_sinc`].
#[derive(Clone, Debug, PartialEq)]
pub struct SmoothParams {
    /// Filter order; also the number of Laplacian applications.
    pub iterations: u32,
    /// Pass band in `(0, 2]`. Smaller values smooth harder.
    pub pass_band: f64,
    /// Allow vertices on boundary edges to move along the boundary.
    pub boundary_smoothing: bool,
    /// Detect feature edges and smooth only along them.
    pub feature_edge_smoothing: bool,
    /// Dihedral angle in degrees above which an edge is a feature edge.
    pub feature_angle: f64,
    /// Allow vertices on non-manifold edges to move along those edges.
    pub non_manifold_smoothing: bool,
    /// Filter in a unit-cube frame for numerical stability.
    pub normalize_coordinates: bool,
    /// Record how far each vertex moved in [`Mesh::errors`].
    pub generate_error_scalars: bool,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            iterations: 15,
            pass_band: 0.01,
            boundary_smoothing: false,
            feature_edge_smoothing: false,
            feature_angle: 45.0,
            non_manifold_smoothing: true,
            normalize_coordinates: true,
            generate_error_scalars: true,
        }
    }
}

impl SmoothParams {
    fn validate(&self) -> Result<(), GeometryError> {
        if !(self.pass_band > 0.0 && self.pass_band <= 2.0) {
            return Err(GeometryError::InvalidParameter {
                name: "pass_band",
                reason: format!("{} is outside (0, 2]", self.pass_band),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct EdgeUse {
    count: u32,
    first: u32,
    second: u32,
}

/// Per-vertex neighbour lists used by the Laplacian. An empty list marks a
/// fixed vertex.
fn smoothing_neighbors(mesh: &Mesh, params: &SmoothParams) -> Vec<Vec<u32>> {
    let n = mesh.vertex_count();
    let mut edges: FxHashMap<(u32, u32), EdgeUse> = FxHashMap::default();
    for (t, tri) in mesh.triangles.iter().enumerate() {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            edges
                .entry((a.min(b), a.max(b)))
                .and_modify(|e| {
                    if e.count == 1 {
                        e.second = t as u32;
                    }
                    e.count += 1;
                })
                .or_insert(EdgeUse {
                    count: 1,
                    first: t as u32,
                    second: t as u32,
                });
        }
    }

    let normals: Vec<DVec3> = if params.feature_edge_smoothing {
        mesh.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|i| mesh.positions[i as usize].as_dvec3());
                (b - a).cross(c - a).normalize_or_zero()
            })
            .collect()
    } else {
        Vec::new()
    };
    let feature_cos = params.feature_angle.to_radians().cos();

    let mut all = vec![Vec::new(); n];
    let mut special = vec![Vec::new(); n];
    let mut on_boundary = vec![false; n];
    let mut on_non_manifold = vec![false; n];

    for (&(a, b), edge) in &edges {
        all[a as usize].push(b);
        all[b as usize].push(a);

        let is_feature = params.feature_edge_smoothing
            && edge.count == 2
            && normals[edge.first as usize].dot(normals[edge.second as usize]) < feature_cos;
        let is_special = match edge.count {
            1 => {
                on_boundary[a as usize] = true;
                on_boundary[b as usize] = true;
                true
            }
            2 => is_feature,
            _ => {
                on_non_manifold[a as usize] = true;
                on_non_manifold[b as usize] = true;
                true
            }
        };
        if is_special {
            special[a as usize].push(b);
            special[b as usize].push(a);
        }
    }

    (0..n)
        .map(|v| {
            let fixed = (on_boundary[v] && !params.boundary_smoothing)
                || (on_non_manifold[v] && !params.non_manifold_smoothing);
            if fixed {
                return Vec::new();
            }
            match special[v].len() {
                0 => std::mem::take(&mut all[v]),
                2 => std::mem::take(&mut special[v]),
                _ => Vec::new(),
            }
        })
        .collect()
}

/// Chebyshev coefficients of the windowed-sinc low-pass filter.
///
/// The cutoff is shifted by Newton iteration so the response at the pass
/// band is one, then the coefficients are rescaled to sum to one so that
/// uniform translations pass unchanged.
pub(crate) fn sinc_coefficients(order: usize, pass_band: f64) -> Vec<f64> {
    let theta_pb = (1.0 - 0.5 * pass_band).acos();
    let weights: Vec<f64> = (0..=order)
        .map(|i| 0.54 + 0.46 * (i as f64 * PI / (order as f64 + 1.0)).cos())
        .collect();

    let coefficients = |sigma: f64| -> Vec<f64> {
        let cutoff = theta_pb + sigma;
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                if i == 0 {
                    w * cutoff / PI
                } else {
                    2.0 * w * (i as f64 * cutoff).sin() / (i as f64 * PI)
                }
            })
            .collect()
    };
    let response_at_pass_band = |c: &[f64]| -> f64 {
        c.iter()
            .enumerate()
            .map(|(i, ci)| ci * (i as f64 * theta_pb).cos())
            .sum()
    };

    let mut sigma = 0.0;
    let mut c = coefficients(sigma);
    let mut converged = false;
    for _ in 0..MAX_NEWTON_STEPS {
        let residual = response_at_pass_band(&c) - 1.0;
        if residual.abs() < NEWTON_TOLERANCE {
            converged = true;
            break;
        }
        let cutoff = theta_pb + sigma;
        let slope: f64 = weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                if i == 0 {
                    w / PI
                } else {
                    2.0 * w * (i as f64 * cutoff).cos() * (i as f64 * theta_pb).cos() / PI
                }
            })
            .sum();
        if slope.abs() < f64::EPSILON {
            break;
        }
        sigma -= residual / slope;
        c = coefficients(sigma);
    }
    if !converged {
        warn!(order, pass_band, "Pass-band search did not converge");
    }

    let total: f64 = c.iter().sum();
    if total.abs() > f64::EPSILON {
        for ci in &mut c {
            *ci /= total;
        }
    }
    c
}

fn apply_laplacian(x: &[DVec3], neighbors: &[Vec<u32>], out: &mut [DVec3]) {
    for (v, slot) in out.iter_mut().enumerate() {
        let nbrs = &neighbors[v];
        *slot = if nbrs.is_empty() {
            DVec3::ZERO
        } else {
            let sum: DVec3 = nbrs.iter().map(|&n| x[n as usize]).sum();
            x[v] - sum / nbrs.len() as f64
        };
    }
}

/// Smooths `mesh` with a windowed-sinc filter.
///
/// Connectivity is unchanged. When [`SmoothParams::generate_error_scalars`]
/// is set, the result carries the distance each vertex moved.
pub fn windowed_sinc(mesh: &Mesh, params: &SmoothParams) -> Result<Mesh, GeometryError> {
    params.validate()?;
    mesh.validate()?;
    if mesh.is_empty() {
        return Err(GeometryError::EmptyMesh);
    }

    let original: Vec<DVec3> = mesh.positions.iter().map(|p| p.as_dvec3()).collect();
    let order = params.iterations as usize;
    if order == 0 {
        let mut out = mesh.clone();
        if params.generate_error_scalars {
            out.errors = Some(vec![0.0; mesh.vertex_count()]);
        }
        return Ok(out);
    }

    let (center, scale) = match (params.normalize_coordinates, mesh.bounds()) {
        (true, Some(b)) if b.size().max_element() > 0.0 => {
            (b.center().as_dvec3(), b.size().max_element() as f64)
        }
        _ => (DVec3::ZERO, 1.0),
    };

    let neighbors = smoothing_neighbors(mesh, params);
    let coefficients = sinc_coefficients(order, params.pass_band);
    debug!(
        vertices = mesh.vertex_count(),
        fixed = neighbors.iter().filter(|n| n.is_empty()).count(),
        order,
        "Windowed-sinc smoothing"
    );

    let n = original.len();
    let mut x0: Vec<DVec3> = original.iter().map(|&p| (p - center) / scale).collect();
    let mut kx = vec![DVec3::ZERO; n];
    apply_laplacian(&x0, &neighbors, &mut kx);
    let mut x1: Vec<DVec3> = x0.iter().zip(&kx).map(|(&x, &k)| x - 0.5 * k).collect();
    let mut result: Vec<DVec3> = x0
        .iter()
        .zip(&x1)
        .map(|(&a, &b)| coefficients[0] * a + coefficients[1] * b)
        .collect();

    for &c in &coefficients[2..] {
        apply_laplacian(&x1, &neighbors, &mut kx);
        let x2: Vec<DVec3> = (0..n).map(|v| 2.0 * x1[v] - kx[v] - x0[v]).collect();
        for (r, &x) in result.iter_mut().zip(&x2) {
            *r += c * x;
        }
        x0 = std::mem::replace(&mut x1, x2);
    }

    let positions: Vec<Vec3> = result
        .iter()
        .enumerate()
        .map(|(v, &p)| {
            if neighbors[v].is_empty() {
                original[v].as_vec3()
            } else {
                (p * scale + center).as_vec3()
            }
        })
        .collect();

    let errors = if params.generate_error_scalars {
        Some(
            positions
                .iter()
                .zip(&original)
                .map(|(p, o)| p.as_dvec3().distance(*o) as f32)
                .collect(),
        )
    } else {
        mesh.errors.clone()
    };

    Ok(Mesh {
        positions,
        triangles: mesh.triangles.clone(),
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::extract_label_surface;
    use axon_volume::Volume;

    fn voxel_ball(radius: f32) -> Mesh {
        let n = (radius * 2.0) as usize + 6;
        let c = n as f32 / 2.0;
        let mut field = Volume::<u32>::new([n, n, n]);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = Vec3::new(x as f32 - c, y as f32 - c, z as f32 - c).length();
                    if d <= radius {
                        field.set(x, y, z, 1);
                    }
                }
            }
        }
        extract_label_surface(&field, 1, Vec3::ONE).unwrap()
    }

    fn radial_stats(mesh: &Mesh) -> (f32, f32) {
        let n = mesh.vertex_count() as f32;
        let centroid = mesh.positions.iter().copied().sum::<Vec3>() / n;
        let radii: Vec<f32> = mesh.positions.iter().map(|p| p.distance(centroid)).collect();
        let mean = radii.iter().sum::<f32>() / n;
        let var = radii.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n;
        (mean, var.sqrt())
    }

    #[test]
    fn test_coefficients_sum_to_one_and_reject_high_frequencies() {
        for (order, pass_band) in [(15, 0.01), (20, 0.1), (5, 0.5)] {
            let c = sinc_coefficients(order, pass_band);
            assert_eq!(c.len(), order + 1);
            let sum: f64 = c.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
            let at_nyquist: f64 = c
                .iter()
                .enumerate()
                .map(|(i, ci)| ci * (i as f64 * PI).cos())
                .sum();
            assert!(at_nyquist.abs() < 0.2, "order {order}: {at_nyquist}");
        }
    }

    #[test]
    fn test_smoothing_reduces_staircase_noise() {
        let mesh = voxel_ball(7.0);
        let smoothed = windowed_sinc(&mesh, &SmoothParams::default()).unwrap();
        assert_eq!(smoothed.triangles, mesh.triangles);

        let (mean_before, spread_before) = radial_stats(&mesh);
        let (mean_after, spread_after) = radial_stats(&smoothed);
        assert!(spread_after < spread_before, "{spread_after} >= {spread_before}");
        assert!((mean_after - mean_before).abs() < 0.15 * mean_before);
    }

    #[test]
    fn test_error_scalars_record_displacement() {
        let mesh = voxel_ball(5.0);
        let smoothed = windowed_sinc(&mesh, &SmoothParams::default()).unwrap();
        let errors = smoothed.errors.as_ref().unwrap();
        assert_eq!(errors.len(), mesh.vertex_count());
        for (v, &e) in errors.iter().enumerate() {
            let moved = smoothed.positions[v].distance(mesh.positions[v]);
            assert!((moved - e).abs() < 1e-4);
        }
        let (lo, hi) = smoothed.error_range().unwrap();
        assert!(lo >= 0.0 && hi > 0.0);
    }

    #[test]
    fn test_boundary_vertices_stay_fixed() {
        let mut field = Volume::<u32>::new([8, 8, 8]);
        field.fill_box([0, 2, 2], [5, 6, 6], 3);
        let mesh = extract_label_surface(&field, 3, Vec3::ONE).unwrap();
        let smoothed = windowed_sinc(&mesh, &SmoothParams::default()).unwrap();
        let mut boundary_seen = 0;
        for (v, p) in mesh.positions.iter().enumerate() {
            if p.x == 0.0 {
                boundary_seen += 1;
                assert_eq!(smoothed.positions[v], *p);
            }
        }
        assert!(boundary_seen > 0);
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = voxel_ball(3.0);
        let params = SmoothParams {
            iterations: 0,
            ..SmoothParams::default()
        };
        let out = windowed_sinc(&mesh, &params).unwrap();
        assert_eq!(out.positions, mesh.positions);
        assert_eq!(out.error_range(), Some((0.0, 0.0)));
    }

    #[test]
    fn test_feature_edges_fix_cube_corners() {
        let mut field = Volume::<u32>::new([10, 10, 10]);
        field.fill_box([2, 2, 2], [8, 8, 8], 1);
        let mesh = extract_label_surface(&field, 1, Vec3::ONE).unwrap();
        let params = SmoothParams {
            feature_edge_smoothing: true,
            feature_angle: 30.0,
            ..SmoothParams::default()
        };
        let with_features = windowed_sinc(&mesh, &params).unwrap();
        let without = windowed_sinc(&mesh, &SmoothParams::default()).unwrap();
        let max_move = |m: &Mesh| m.error_range().unwrap().1;
        assert!(max_move(&with_features) <= max_move(&without));
    }

    #[test]
    fn test_invalid_pass_band_rejected() {
        let params = SmoothParams {
            pass_band: 0.0,
            ..SmoothParams::default()
        };
        assert!(matches!(
            windowed_sinc(&voxel_ball(2.0), &params),
            Err(GeometryError::InvalidParameter {
                name: "pass_band",
                ..
            })
        ));
    }
}
