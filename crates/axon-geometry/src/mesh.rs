//! Indexed triangle meshes.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::error::GeometryError;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Bounds {
    /// Extent along each axis.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Midpoint of the box.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns true if `p` lies inside or on the box.
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// A triangle mesh with optional per-vertex error scalars.
///
/// Error scalars record how far smoothing moved each vertex. They travel with
/// the vertices through translation, appending and decimation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    /// Vertex positions.
    pub positions: Vec<Vec3>,
    /// Triangles as vertex-index triples.
    pub triangles: Vec<[u32; 3]>,
    /// Per-vertex error scalars, one per position when present.
    pub errors: Option<Vec<f32>>,
}

impl Mesh {
    /// Creates a mesh without error scalars.
    pub fn new(positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            triangles,
            errors: None,
        }
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Returns true if the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Checks that every triangle index refers to an existing vertex and
    /// that error scalars, if any, match the vertex count.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let n = self.positions.len();
        for tri in &self.triangles {
            for &index in tri {
                if index as usize >= n {
                    return Err(GeometryError::IndexOutOfRange {
                        index,
                        vertex_count: n,
                    });
                }
            }
        }
        if let Some(errors) = &self.errors
            && errors.len() != n
        {
            return Err(GeometryError::InvalidParameter {
                name: "errors",
                reason: format!("{} scalars for {} vertices", errors.len(), n),
            });
        }
        Ok(())
    }

    /// Bounding box of all vertices, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<Bounds> {
        let first = *self.positions.first()?;
        let (min, max) = self
            .positions
            .iter()
            .fold((first, first), |(lo, hi), &p| (lo.min(p), hi.max(p)));
        Some(Bounds { min, max })
    }

    /// Moves every vertex by `offset`.
    pub fn translate(&mut self, offset: Vec3) {
        for p in &mut self.positions {
            *p += offset;
        }
    }

    /// Appends `other`, re-indexing its triangles after this mesh's vertices.
    ///
    /// If only one side carries error scalars, the other side is padded with
    /// zeros so the result stays consistent.
    pub fn append(&mut self, other: &Mesh) {
        let base = self.positions.len() as u32;
        if self.errors.is_some() || other.errors.is_some() {
            let own = self.positions.len();
            let errors = self.errors.get_or_insert_with(|| vec![0.0; own]);
            match &other.errors {
                Some(theirs) => errors.extend_from_slice(theirs),
                None => errors.resize(own + other.positions.len(), 0.0),
            }
        }
        self.positions.extend_from_slice(&other.positions);
        self.triangles.extend(
            other
                .triangles
                .iter()
                .map(|t| [t[0] + base, t[1] + base, t[2] + base]),
        );
    }

    /// `(min, max)` of the error scalars, if the mesh carries any.
    pub fn error_range(&self) -> Option<(f32, f32)> {
        let errors = self.errors.as_ref()?;
        let first = *errors.first()?;
        Some(
            errors
                .iter()
                .fold((first, first), |(lo, hi), &e| (lo.min(e), hi.max(e))),
        )
    }

    /// Merges vertices closer than `tolerance` and drops triangles that
    /// collapse as a result. Vertices that no triangle uses are removed.
    pub fn weld(&self, tolerance: f32) -> Mesh {
        let cell = tolerance.max(f32::EPSILON);
        let mut keys: FxHashMap<[i64; 3], u32> = FxHashMap::default();
        let mut remap = Vec::with_capacity(self.positions.len());
        let mut positions = Vec::new();
        let mut errors = self.errors.as_ref().map(|_| Vec::new());

        for (i, p) in self.positions.iter().enumerate() {
            let key = [
                (p.x / cell).round() as i64,
                (p.y / cell).round() as i64,
                (p.z / cell).round() as i64,
            ];
            let index = *keys.entry(key).or_insert_with(|| {
                positions.push(*p);
                if let (Some(out), Some(src)) = (errors.as_mut(), self.errors.as_ref()) {
                    out.push(src[i]);
                }
                positions.len() as u32 - 1
            });
            remap.push(index);
        }

        let triangles = self
            .triangles
            .iter()
            .map(|t| [remap[t[0] as usize], remap[t[1] as usize], remap[t[2] as usize]])
            .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
            .collect();

        Mesh {
            positions,
            triangles,
            errors,
        }
        .compact()
    }

    /// Removes vertices not referenced by any triangle.
    pub fn compact(self) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut positions = Vec::new();
        let mut errors = self.errors.as_ref().map(|_| Vec::new());
        let mut triangles = Vec::with_capacity(self.triangles.len());

        for tri in &self.triangles {
            let mut out = [0u32; 3];
            for (slot, &v) in out.iter_mut().zip(tri) {
                let v = v as usize;
                if remap[v] == u32::MAX {
                    remap[v] = positions.len() as u32;
                    positions.push(self.positions[v]);
                    if let (Some(dst), Some(src)) = (errors.as_mut(), self.errors.as_ref()) {
                        dst.push(src[v]);
                    }
                }
                *slot = remap[v];
            }
            triangles.push(out);
        }

        Mesh {
            positions,
            triangles,
            errors,
        }
    }
}
