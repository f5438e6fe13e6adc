//! Quadric error-metric decimation (Garland and Heckbert).
//!
//! Every vertex accumulates the squared-distance quadric of the planes of its
//! triangles, weighted by area. Boundary edges add a perpendicular constraint
//! plane so open borders keep their outline. Edges are collapsed cheapest
//! first, each into the point minimising the summed quadric.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::{DMat3, DVec3};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::connectivity::EditMesh;
use crate::decimate::target_triangles;
use crate::error::GeometryError;
use crate::mesh::Mesh;

/// Weight of boundary constraint planes relative to surface planes.
const BOUNDARY_WEIGHT: f64 = 1.0;

/// Optimal placements farther than this many edge lengths from the edge
/// midpoint are discarded as ill-conditioned.
const MAX_PLACEMENT_REACH: f64 = 2.0;

#[derive(Clone, Copy, Debug)]
struct Quadric {
    a: DMat3,
    b: DVec3,
    c: f64,
}

impl Quadric {
    const ZERO: Self = Self {
        a: DMat3::ZERO,
        b: DVec3::ZERO,
        c: 0.0,
    };

    /// Quadric of the plane through `point` with unit `normal`.
    fn plane(normal: DVec3, point: DVec3, weight: f64) -> Self {
        let d = -normal.dot(point);
        Self {
            a: DMat3::from_cols(normal * normal.x, normal * normal.y, normal * normal.z) * weight,
            b: normal * (d * weight),
            c: d * d * weight,
        }
    }

    fn add(self, other: Self) -> Self {
        Self {
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
        }
    }

    fn error(&self, p: DVec3) -> f64 {
        (p.dot(self.a * p) + 2.0 * self.b.dot(p) + self.c).max(0.0)
    }

    fn minimizer(&self) -> Option<DVec3> {
        let det = self.a.determinant();
        let scale = self.a.x_axis.x + self.a.y_axis.y + self.a.z_axis.z;
        if scale <= 0.0 || det.abs() <= 1e-9 * scale.powi(3) {
            return None;
        }
        Some(-(self.a.inverse() * self.b))
    }
}

#[derive(Clone, Copy, Debug)]
struct EdgeCandidate {
    cost: f64,
    from: u32,
    to: u32,
    stamps: (u32, u32),
    target: DVec3,
}

impl PartialEq for EdgeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCandidate {}

impl PartialOrd for EdgeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| (other.from, other.to).cmp(&(self.from, self.to)))
    }
}

fn vertex_quadrics(edit: &EditMesh) -> Vec<Quadric> {
    let mut quadrics = vec![Quadric::ZERO; edit.vertex_count()];
    let mut edge_uses: rustc_hash::FxHashMap<(u32, u32), (u32, u32)> = Default::default();

    for (t, tri) in edit.live() {
        let n = edit.normal(t);
        let area = 0.5 * n.length();
        let Some(unit) = n.try_normalize() else {
            continue;
        };
        let q = Quadric::plane(unit, edit.positions[tri[0] as usize], area);
        for &v in &tri {
            quadrics[v as usize] = quadrics[v as usize].add(q);
        }
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            edge_uses
                .entry((a.min(b), a.max(b)))
                .and_modify(|e| e.0 += 1)
                .or_insert((1, t));
        }
    }

    for (&(a, b), &(count, t)) in &edge_uses {
        if count != 1 {
            continue;
        }
        let (pa, pb) = (edit.positions[a as usize], edit.positions[b as usize]);
        let edge = pb - pa;
        let Some(side) = edge.cross(edit.normal(t)).try_normalize() else {
            continue;
        };
        let q = Quadric::plane(side, pa, BOUNDARY_WEIGHT * edge.length_squared());
        quadrics[a as usize] = quadrics[a as usize].add(q);
        quadrics[b as usize] = quadrics[b as usize].add(q);
    }
    quadrics
}

/// Cheapest placement for collapsing edge `(a, b)`.
fn placement(edit: &EditMesh, quadrics: &[Quadric], a: u32, b: u32) -> (f64, DVec3) {
    let q = quadrics[a as usize].add(quadrics[b as usize]);
    let (pa, pb) = (edit.positions[a as usize], edit.positions[b as usize]);
    let mid = (pa + pb) * 0.5;
    let reach = MAX_PLACEMENT_REACH * pa.distance(pb);

    let mut options = vec![pb, pa, mid];
    if let Some(opt) = q.minimizer()
        && opt.distance(mid) <= reach
    {
        options.insert(0, opt);
    }
    options
        .into_iter()
        .map(|p| (q.error(p), p))
        .min_by(|x, y| x.0.total_cmp(&y.0))
        .unwrap_or((0.0, pb))
}

fn push_edges(
    heap: &mut BinaryHeap<EdgeCandidate>,
    edit: &EditMesh,
    quadrics: &[Quadric],
    stamps: &[u32],
    v: u32,
) {
    for n in edit.neighbors(v) {
        let (cost, target) = placement(edit, quadrics, v, n);
        heap.push(EdgeCandidate {
            cost,
            from: v,
            to: n,
            stamps: (stamps[v as usize], stamps[n as usize]),
            target,
        });
    }
}

/// Reduces the triangle count of `mesh` by `target_reduction` with quadric
/// error-metric edge collapses.
///
/// Collapses that would change the surface's topology or fold a triangle
/// over are skipped, so the reduction may fall short of the target.
pub fn decimate_quadric(mesh: &Mesh, target_reduction: f64) -> Result<Mesh, GeometryError> {
    mesh.validate()?;
    if mesh.is_empty() {
        return Err(GeometryError::EmptyMesh);
    }
    let target = target_triangles(mesh.triangle_count(), target_reduction)?;
    let mut edit = EditMesh::from_mesh(mesh);
    let mut quadrics = vertex_quadrics(&edit);
    let mut stamps = vec![0u32; edit.vertex_count()];

    let mut heap = BinaryHeap::new();
    let mut seen: FxHashSet<(u32, u32)> = FxHashSet::default();
    for (_, tri) in edit.live() {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            if !seen.insert((a.min(b), a.max(b))) {
                continue;
            }
            let (cost, target) = placement(&edit, &quadrics, a, b);
            heap.push(EdgeCandidate {
                cost,
                from: a,
                to: b,
                stamps: (0, 0),
                target,
            });
        }
    }

    while edit.live_triangles() > target {
        let Some(edge) = heap.pop() else {
            break;
        };
        let (from, to) = (edge.from, edge.to);
        if edge.stamps != (stamps[from as usize], stamps[to as usize])
            || edit.triangles_of(from).is_empty()
            || edit.triangles_of(to).is_empty()
        {
            continue;
        }
        if !edit.can_collapse(from, to, edge.target, true) {
            continue;
        }

        edit.collapse(from, to, edge.target);
        quadrics[to as usize] = quadrics[to as usize].add(quadrics[from as usize]);
        stamps[from as usize] += 1;
        stamps[to as usize] += 1;
        push_edges(&mut heap, &edit, &quadrics, &stamps, to);
    }

    let out = edit.into_mesh();
    debug!(
        before = mesh.triangle_count(),
        after = out.triangle_count(),
        target,
        "Quadric decimation"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::tests::{euler_characteristic, grid};
    use crate::contour::extract_label_surface;
    use crate::smooth::{SmoothParams, windowed_sinc};
    use axon_volume::Volume;
    use glam::Vec3;

    fn smooth_ball() -> Mesh {
        let n = 20;
        let mut field = Volume::<u32>::new([n, n, n]);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d = Vec3::new(x as f32, y as f32, z as f32) - Vec3::splat(9.5);
                    if d.length() <= 7.0 {
                        field.set(x, y, z, 1);
                    }
                }
            }
        }
        let mesh = extract_label_surface(&field, 1, Vec3::ONE).unwrap();
        windowed_sinc(&mesh, &SmoothParams::default()).unwrap()
    }

    #[test]
    fn test_plane_quadric_measures_squared_distance() {
        let q = Quadric::plane(DVec3::Z, DVec3::new(0.0, 0.0, 2.0), 1.0);
        assert!((q.error(DVec3::new(5.0, -3.0, 5.0)) - 9.0).abs() < 1e-12);
        assert!(q.minimizer().is_none(), "a single plane has no unique minimum");

        let corner = q
            .add(Quadric::plane(DVec3::X, DVec3::ONE, 1.0))
            .add(Quadric::plane(DVec3::Y, DVec3::ONE, 1.0));
        let p = corner.minimizer().unwrap();
        assert!(p.distance(DVec3::new(1.0, 1.0, 2.0)) < 1e-9);
    }

    #[test]
    fn test_ball_reduces_and_stays_closed() {
        let mesh = smooth_ball();
        let out = decimate_quadric(&mesh, 0.7).unwrap();
        assert!(out.triangle_count() < mesh.triangle_count() * 6 / 10);
        assert_eq!(euler_characteristic(&out), 2);

        let before = mesh.bounds().unwrap();
        let after = out.bounds().unwrap();
        assert!((before.size() - after.size()).abs().max_element() < 1.0);
    }

    #[test]
    fn test_flat_grid_keeps_outline() {
        let mesh = grid(10);
        let out = decimate_quadric(&mesh, 0.7).unwrap();
        assert!(out.triangle_count() <= mesh.triangle_count());
        let (before, after) = (mesh.bounds().unwrap(), out.bounds().unwrap());
        assert!((before.min - after.min).abs().max_element() < 1e-3);
        assert!((before.max - after.max).abs().max_element() < 1e-3);
        assert!(out.positions.iter().all(|p| p.z.abs() < 1e-4));
    }

    #[test]
    fn test_repeated_levels_never_grow() {
        let mut mesh = smooth_ball();
        for _ in 0..4 {
            let next = decimate_quadric(&mesh, 0.7).unwrap();
            assert!(next.triangle_count() <= mesh.triangle_count());
            mesh = next;
        }
    }
}
