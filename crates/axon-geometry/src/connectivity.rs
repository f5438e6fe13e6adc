//! Editable triangle connectivity for decimation.
//!
//! Triangles are deleted in place and vertices merged by edge collapse. The
//! incidence lists only ever hold live triangles.

use glam::DVec3;

use crate::mesh::Mesh;

/// Cosine below which a collapse is considered to fold a triangle over.
const MIN_NORMAL_COS: f64 = 0.2;

/// Local topology of a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VertexClass {
    /// Not used by any live triangle.
    Isolated,
    /// Surrounded by a closed fan of manifold edges.
    Interior,
    /// On exactly two boundary edges.
    Boundary,
    /// On a non-manifold edge, or a boundary pinch point.
    NonManifold,
}

pub(crate) struct EditMesh {
    pub(crate) positions: Vec<DVec3>,
    triangles: Vec<[u32; 3]>,
    tri_alive: Vec<bool>,
    incident: Vec<Vec<u32>>,
    errors: Option<Vec<f32>>,
    live: usize,
}

impl EditMesh {
    pub(crate) fn from_mesh(mesh: &Mesh) -> Self {
        let mut incident = vec![Vec::new(); mesh.vertex_count()];
        let mut triangles = Vec::with_capacity(mesh.triangle_count());
        for tri in &mesh.triangles {
            if tri[0] == tri[1] || tri[1] == tri[2] || tri[0] == tri[2] {
                continue;
            }
            let t = triangles.len() as u32;
            for &v in tri {
                incident[v as usize].push(t);
            }
            triangles.push(*tri);
        }
        let live = triangles.len();
        Self {
            positions: mesh.positions.iter().map(|p| p.as_dvec3()).collect(),
            tri_alive: vec![true; live],
            triangles,
            incident,
            errors: mesh.errors.clone(),
            live,
        }
    }

    pub(crate) fn live_triangles(&self) -> usize {
        self.live
    }

    pub(crate) fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn triangles_of(&self, v: u32) -> &[u32] {
        &self.incident[v as usize]
    }

    pub(crate) fn triangle(&self, t: u32) -> [u32; 3] {
        self.triangles[t as usize]
    }

    /// Live triangles as `(id, vertices)`.
    pub(crate) fn live(&self) -> impl Iterator<Item = (u32, [u32; 3])> + '_ {
        self.triangles
            .iter()
            .enumerate()
            .filter(|(t, _)| self.tri_alive[*t])
            .map(|(t, tri)| (t as u32, *tri))
    }

    /// Unnormalized normal (twice the area) of triangle `t`, with vertex
    /// `moved` displaced to `to`.
    fn normal_with(&self, t: u32, moved: u32, to: DVec3) -> DVec3 {
        let [a, b, c] = self.triangle(t).map(|v| {
            if v == moved {
                to
            } else {
                self.positions[v as usize]
            }
        });
        (b - a).cross(c - a)
    }

    /// Unnormalized normal of triangle `t`.
    pub(crate) fn normal(&self, t: u32) -> DVec3 {
        let [a, b, c] = self.triangle(t).map(|v| self.positions[v as usize]);
        (b - a).cross(c - a)
    }

    /// Neighbours of `v` paired with the number of live triangles on each edge.
    pub(crate) fn edge_counts(&self, v: u32) -> Vec<(u32, u32)> {
        let mut counts: Vec<(u32, u32)> = Vec::new();
        for &t in self.triangles_of(v) {
            for w in self.triangle(t) {
                if w == v {
                    continue;
                }
                match counts.iter_mut().find(|(n, _)| *n == w) {
                    Some((_, c)) => *c += 1,
                    None => counts.push((w, 1)),
                }
            }
        }
        counts
    }

    /// Sorted neighbours of `v`.
    pub(crate) fn neighbors(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self.edge_counts(v).into_iter().map(|(n, _)| n).collect();
        out.sort_unstable();
        out
    }

    pub(crate) fn classify(&self, v: u32) -> VertexClass {
        let counts = self.edge_counts(v);
        if counts.is_empty() {
            return VertexClass::Isolated;
        }
        if counts.iter().any(|&(_, c)| c > 2) {
            return VertexClass::NonManifold;
        }
        match counts.iter().filter(|&&(_, c)| c == 1).count() {
            0 if counts.len() == self.triangles_of(v).len() => VertexClass::Interior,
            2 if counts.len() == self.triangles_of(v).len() + 1 => VertexClass::Boundary,
            _ => VertexClass::NonManifold,
        }
    }

    /// Neighbours of `v` joined to it by boundary edges.
    pub(crate) fn boundary_neighbors(&self, v: u32) -> Vec<u32> {
        self.edge_counts(v)
            .into_iter()
            .filter(|&(_, c)| c == 1)
            .map(|(n, _)| n)
            .collect()
    }

    /// Checks whether merging `from` into `to` at position `target` keeps
    /// the surface valid.
    ///
    /// With `check_link`, the link condition must hold so the collapse
    /// preserves topology. The collapse is always rejected if it would fold
    /// a triangle over, create a degenerate triangle or duplicate one.
    pub(crate) fn can_collapse(&self, from: u32, to: u32, target: DVec3, check_link: bool) -> bool {
        let shared: Vec<u32> = self
            .triangles_of(from)
            .iter()
            .copied()
            .filter(|&t| self.triangle(t).contains(&to))
            .collect();
        if shared.is_empty() || shared.len() > 2 {
            return false;
        }

        if check_link {
            let opposite: Vec<u32> = shared
                .iter()
                .filter_map(|&t| self.triangle(t).into_iter().find(|&w| w != from && w != to))
                .collect();
            let from_nbrs = self.neighbors(from);
            let to_nbrs = self.neighbors(to);
            let common = from_nbrs
                .iter()
                .filter(|n| to_nbrs.binary_search(n).is_ok())
                .count();
            if common != opposite.len() {
                return false;
            }
            let interior_edge = shared.len() == 2;
            if interior_edge
                && self.classify(from) == VertexClass::Boundary
                && self.classify(to) == VertexClass::Boundary
            {
                return false;
            }
        }

        let mut existing: Vec<[u32; 3]> = self
            .triangles_of(to)
            .iter()
            .filter(|t| !shared.contains(t))
            .map(|&t| sorted(self.triangle(t)))
            .collect();
        existing.sort_unstable();

        for &t in self.triangles_of(from) {
            if shared.contains(&t) {
                continue;
            }
            let renamed = sorted(self.triangle(t).map(|w| if w == from { to } else { w }));
            if existing.binary_search(&renamed).is_ok() {
                return false;
            }
            if !self.keeps_orientation(t, from, target) {
                return false;
            }
        }
        for &t in self.triangles_of(to) {
            if !shared.contains(&t) && !self.keeps_orientation(t, to, target) {
                return false;
            }
        }
        true
    }

    fn keeps_orientation(&self, t: u32, moved: u32, target: DVec3) -> bool {
        let before = self.normal(t);
        let after = self.normal_with(t, moved, target);
        let (lb, la) = (before.length(), after.length());
        if la <= f64::EPSILON * lb.max(1.0) {
            return false;
        }
        lb <= f64::EPSILON || before.dot(after) / (lb * la) >= MIN_NORMAL_COS
    }

    /// Merges `from` into `to`, moving `to` to `target`.
    pub(crate) fn collapse(&mut self, from: u32, to: u32, target: DVec3) {
        self.positions[to as usize] = target;
        let fan = std::mem::take(&mut self.incident[from as usize]);
        for t in fan {
            let tri = &mut self.triangles[t as usize];
            if tri.contains(&to) {
                let tri = *tri;
                self.tri_alive[t as usize] = false;
                self.live -= 1;
                for w in tri {
                    if w != from {
                        self.incident[w as usize].retain(|&x| x != t);
                    }
                }
            } else {
                for w in tri.iter_mut() {
                    if *w == from {
                        *w = to;
                    }
                }
                self.incident[to as usize].push(t);
            }
        }
        if let Some(errors) = self.errors.as_mut() {
            errors[to as usize] = errors[to as usize].max(errors[from as usize]);
        }
    }

    pub(crate) fn into_mesh(self) -> Mesh {
        let triangles = self
            .triangles
            .iter()
            .zip(&self.tri_alive)
            .filter(|(_, alive)| **alive)
            .map(|(t, _)| *t)
            .collect();
        Mesh {
            positions: self.positions.iter().map(|p| p.as_vec3()).collect(),
            triangles,
            errors: self.errors,
        }
        .compact()
    }
}

fn sorted(mut tri: [u32; 3]) -> [u32; 3] {
    tri.sort_unstable();
    tri
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use glam::Vec3;
    use rustc_hash::FxHashMap;

    /// Flat `n` by `n` grid of quads in the z = 0 plane.
    pub(crate) fn grid(n: u32) -> Mesh {
        let mut positions = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                positions.push(Vec3::new(x as f32, y as f32, 0.0));
            }
        }
        let id = |x: u32, y: u32| y * (n + 1) + x;
        let mut triangles = Vec::new();
        for y in 0..n {
            for x in 0..n {
                triangles.push([id(x, y), id(x + 1, y), id(x + 1, y + 1)]);
                triangles.push([id(x, y), id(x + 1, y + 1), id(x, y + 1)]);
            }
        }
        Mesh::new(positions, triangles)
    }

    /// `V - E + F` of a mesh.
    pub(crate) fn euler_characteristic(mesh: &Mesh) -> i64 {
        let mut edges: FxHashMap<(u32, u32), ()> = FxHashMap::default();
        for t in &mesh.triangles {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                edges.insert((a.min(b), a.max(b)), ());
            }
        }
        mesh.vertex_count() as i64 - edges.len() as i64 + mesh.triangle_count() as i64
    }

    #[test]
    fn test_classification_on_grid() {
        let edit = EditMesh::from_mesh(&grid(3));
        assert_eq!(edit.classify(5), VertexClass::Interior);
        assert_eq!(edit.classify(1), VertexClass::Boundary);
        assert_eq!(edit.classify(0), VertexClass::Boundary);
        assert_eq!(edit.boundary_neighbors(1).len(), 2);
    }

    #[test]
    fn test_collapse_interior_vertex() {
        let mesh = grid(2);
        let mut edit = EditMesh::from_mesh(&mesh);
        let target = edit.positions[5];
        assert!(edit.can_collapse(4, 5, target, true));
        edit.collapse(4, 5, target);
        let out = edit.into_mesh();
        assert_eq!(out.triangle_count(), mesh.triangle_count() - 2);
        assert_eq!(out.vertex_count(), mesh.vertex_count() - 1);
        assert_eq!(euler_characteristic(&out), euler_characteristic(&mesh));
    }

    #[test]
    fn test_boundary_pinch_rejected() {
        let edit = EditMesh::from_mesh(&grid(2));
        // 1 and 5 both lie on the boundary but the edge between them does not.
        assert!(!edit.can_collapse(1, 5, edit.positions[5], true));
        assert!(edit.can_collapse(4, 1, edit.positions[1], true));
    }

    #[test]
    fn test_fold_over_rejected() {
        let edit = EditMesh::from_mesh(&grid(2));
        assert!(!edit.can_collapse(4, 5, DVec3::new(-1.0, 3.0, 0.0), true));
        assert!(edit.can_collapse(4, 5, edit.positions[5], true));
    }
}
