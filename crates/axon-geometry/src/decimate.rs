//! Topology-preserving decimation by vertex removal.
//!
//! Vertices are ranked by their distance to the average plane of their
//! triangle fan, so vertices on flat regions go first. A vertex is removed by
//! collapsing it onto the nearest neighbour that keeps the surface valid.
//! Boundary vertices are only removed when boundary deletion is enabled, and
//! then only along the boundary. Non-manifold vertices are never removed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::DVec3;
use tracing::debug;

use crate::connectivity::{EditMesh, VertexClass};
use crate::error::GeometryError;
use crate::mesh::Mesh;

/// Parameters of [`decimate_topology_preserving`].
#[derive(Clone, Debug, PartialEq)]
pub struct DecimateParams {
    /// Fraction of triangles to remove, in `[0, 1)`.
    pub target_reduction: f64,
    /// Only perform collapses that keep the surface's topology.
    pub preserve_topology: bool,
    /// Allow vertices on the mesh boundary to be removed.
    pub boundary_vertex_deletion: bool,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_reduction: 0.8,
            preserve_topology: true,
            boundary_vertex_deletion: false,
        }
    }
}

/// Triangle count to stop at when removing `reduction` of `initial`.
pub(crate) fn target_triangles(initial: usize, reduction: f64) -> Result<usize, GeometryError> {
    if !(0.0..1.0).contains(&reduction) {
        return Err(GeometryError::InvalidParameter {
            name: "target_reduction",
            reason: format!("{reduction} is outside [0, 1)"),
        });
    }
    Ok(((1.0 - reduction) * initial as f64).ceil() as usize)
}

/// Min-heap entry keyed by cost.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub(crate) cost: f64,
    pub(crate) vertex: u32,
    pub(crate) stamp: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

/// Distance from `v` to the area-weighted average plane of its fan.
fn plane_distance(edit: &EditMesh, v: u32) -> Option<f64> {
    let mut normal = DVec3::ZERO;
    let mut center = DVec3::ZERO;
    let mut weight = 0.0;
    for &t in edit.triangles_of(v) {
        let n = edit.normal(t);
        let area = n.length();
        let centroid = edit
            .triangle(t)
            .map(|w| edit.positions[w as usize])
            .into_iter()
            .sum::<DVec3>()
            / 3.0;
        normal += n;
        center += centroid * area;
        weight += area;
    }
    if weight <= 0.0 {
        return None;
    }
    let normal = normal.try_normalize()?;
    Some(normal.dot(edit.positions[v as usize] - center / weight).abs())
}

/// Distance from boundary vertex `v` to the line through its two boundary
/// neighbours.
fn boundary_distance(edit: &EditMesh, v: u32) -> Option<f64> {
    let [a, b] = <[u32; 2]>::try_from(edit.boundary_neighbors(v)).ok()?;
    let (pa, pb, p) = (
        edit.positions[a as usize],
        edit.positions[b as usize],
        edit.positions[v as usize],
    );
    let dir = (pb - pa).try_normalize()?;
    Some((p - pa).reject_from_normalized(dir).length())
}

fn removal_cost(edit: &EditMesh, v: u32, params: &DecimateParams) -> Option<f64> {
    match edit.classify(v) {
        VertexClass::Interior => plane_distance(edit, v),
        VertexClass::Boundary if params.boundary_vertex_deletion => boundary_distance(edit, v),
        _ => None,
    }
}

/// Picks the neighbour to collapse `v` onto, nearest first.
fn collapse_target(edit: &EditMesh, v: u32, params: &DecimateParams) -> Option<u32> {
    let mut options = match edit.classify(v) {
        VertexClass::Boundary => edit.boundary_neighbors(v),
        _ => edit.neighbors(v),
    };
    let p = edit.positions[v as usize];
    options.sort_by(|&a, &b| {
        let da = p.distance_squared(edit.positions[a as usize]);
        let db = p.distance_squared(edit.positions[b as usize]);
        da.total_cmp(&db)
    });
    options.into_iter().find(|&n| {
        edit.can_collapse(v, n, edit.positions[n as usize], params.preserve_topology)
    })
}

/// Reduces the triangle count of `mesh` by `params.target_reduction`.
///
/// The reduction is a target: when no valid collapse remains the mesh is
/// returned with more triangles than requested. The result never has more
/// triangles than the input.
pub fn decimate_topology_preserving(
    mesh: &Mesh,
    params: &DecimateParams,
) -> Result<Mesh, GeometryError> {
    mesh.validate()?;
    if mesh.is_empty() {
        return Err(GeometryError::EmptyMesh);
    }
    let target = target_triangles(mesh.triangle_count(), params.target_reduction)?;
    let mut edit = EditMesh::from_mesh(mesh);

    let mut stamps = vec![0u32; edit.vertex_count()];
    let mut heap = BinaryHeap::new();
    for v in 0..edit.vertex_count() as u32 {
        if let Some(cost) = removal_cost(&edit, v, params) {
            heap.push(Candidate {
                cost,
                vertex: v,
                stamp: 0,
            });
        }
    }

    while edit.live_triangles() > target {
        let Some(candidate) = heap.pop() else {
            break;
        };
        let v = candidate.vertex;
        if stamps[v as usize] != candidate.stamp {
            continue;
        }
        stamps[v as usize] += 1;
        let Some(onto) = collapse_target(&edit, v, params) else {
            continue;
        };

        let target_pos = edit.positions[onto as usize];
        edit.collapse(v, onto, target_pos);

        let mut touched = edit.neighbors(onto);
        touched.push(onto);
        for w in touched {
            stamps[w as usize] += 1;
            if let Some(cost) = removal_cost(&edit, w, params) {
                heap.push(Candidate {
                    cost,
                    vertex: w,
                    stamp: stamps[w as usize],
                });
            }
        }
    }

    let out = edit.into_mesh();
    debug!(
        before = mesh.triangle_count(),
        after = out.triangle_count(),
        target,
        "Topology-preserving decimation"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::tests::{euler_characteristic, grid};
    use crate::contour::extract_label_surface;
    use axon_volume::Volume;
    use glam::Vec3;

    fn blob() -> Mesh {
        let mut field = Volume::<u32>::new([16, 16, 16]);
        field.fill_box([3, 3, 3], [13, 13, 13], 1);
        field.fill_box([6, 6, 1], [10, 10, 15], 1);
        extract_label_surface(&field, 1, Vec3::ONE).unwrap()
    }

    #[test]
    fn test_flat_grid_reduces_and_keeps_boundary() {
        let mesh = grid(8);
        let out = decimate_topology_preserving(&mesh, &DecimateParams::default()).unwrap();
        assert!(out.triangle_count() < mesh.triangle_count());
        assert_eq!(out.bounds(), mesh.bounds());
        assert_eq!(euler_characteristic(&out), 1);

        // Every original boundary vertex survives in place.
        for p in &mesh.positions {
            let on_edge = p.x == 0.0 || p.y == 0.0 || p.x == 8.0 || p.y == 8.0;
            if on_edge {
                assert!(out.positions.contains(p), "lost boundary vertex {p}");
            }
        }
    }

    #[test]
    fn test_closed_surface_keeps_genus() {
        let mesh = blob();
        assert_eq!(euler_characteristic(&mesh), 2);
        let out = decimate_topology_preserving(&mesh, &DecimateParams::default()).unwrap();
        assert!(out.triangle_count() < mesh.triangle_count() / 2);
        assert_eq!(euler_characteristic(&out), 2);
        assert!(out.validate().is_ok());
    }

    #[test]
    fn test_zero_reduction_keeps_mesh() {
        let mesh = blob();
        let params = DecimateParams {
            target_reduction: 0.0,
            ..DecimateParams::default()
        };
        let out = decimate_topology_preserving(&mesh, &params).unwrap();
        assert_eq!(out.triangle_count(), mesh.triangle_count());
    }

    #[test]
    fn test_boundary_deletion_removes_more() {
        let mesh = grid(8);
        let keep = decimate_topology_preserving(&mesh, &DecimateParams::default()).unwrap();
        let params = DecimateParams {
            boundary_vertex_deletion: true,
            ..DecimateParams::default()
        };
        let drop = decimate_topology_preserving(&mesh, &params).unwrap();
        assert!(drop.triangle_count() <= keep.triangle_count());
        assert!(drop.vertex_count() < keep.vertex_count());
    }

    #[test]
    fn test_error_scalars_follow_vertices() {
        let mut mesh = grid(6);
        mesh.errors = Some(vec![0.25; mesh.vertex_count()]);
        let out = decimate_topology_preserving(&mesh, &DecimateParams::default()).unwrap();
        assert_eq!(out.errors.as_ref().unwrap().len(), out.vertex_count());
        assert_eq!(out.error_range(), Some((0.25, 0.25)));
    }

    #[test]
    fn test_invalid_reduction_rejected() {
        let params = DecimateParams {
            target_reduction: 1.0,
            ..DecimateParams::default()
        };
        assert!(decimate_topology_preserving(&grid(2), &params).is_err());
        assert_eq!(
            decimate_topology_preserving(&Mesh::default(), &DecimateParams::default()),
            Err(GeometryError::EmptyMesh)
        );
    }
}
