//! Discrete marching cubes over a label field.
//!
//! Every cell of eight neighbouring voxels is classified by which corners
//! carry the requested label. Surface vertices sit at the midpoints of cell
//! edges whose endpoints disagree, so two chunks that share a boundary plane
//! of voxels produce identical vertices along it. The surface is left open
//! where the object touches the edge of the field.

use axon_volume::Volume;
use glam::Vec3;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::contour_tables::{CORNER_OFFSETS, EDGE_CORNERS, EDGE_TABLE, TRI_TABLE};
use crate::error::GeometryError;
use crate::mesh::Mesh;

/// Inclusive voxel bounds of every occurrence of `label`, if any.
fn label_extent(field: &Volume<u32>, label: u32) -> Option<([usize; 3], [usize; 3])> {
    let [nx, ny, _] = field.dims();
    let mut extent: Option<([usize; 3], [usize; 3])> = None;
    for (i, &v) in field.samples().iter().enumerate() {
        if v != label {
            continue;
        }
        let p = [i % nx, (i / nx) % ny, i / (nx * ny)];
        extent = Some(match extent {
            None => (p, p),
            Some((lo, hi)) => (
                [lo[0].min(p[0]), lo[1].min(p[1]), lo[2].min(p[2])],
                [hi[0].max(p[0]), hi[1].max(p[1]), hi[2].max(p[2])],
            ),
        });
    }
    extent
}

/// Extracts the boundary surface of all voxels equal to `label`.
///
/// Vertices are expressed in the field's local frame: voxel index times
/// `spacing`. Triangles wind counter-clockwise seen from outside the object.
/// Fails with [`GeometryError::EmptySurface`] when no cell crosses the label.
pub fn extract_label_surface(
    field: &Volume<u32>,
    label: u32,
    spacing: Vec3,
) -> Result<Mesh, GeometryError> {
    let dims = field.dims();
    let extent = label_extent(field, label);
    let (lo, hi) = match extent {
        Some(e) if dims.iter().all(|&d| d >= 2) => e,
        _ => return Err(GeometryError::EmptySurface { label }),
    };

    // Cells whose origin is one voxel before the extent still touch it.
    let first: [usize; 3] = std::array::from_fn(|a| lo[a].saturating_sub(1));
    let last: [usize; 3] = std::array::from_fn(|a| hi[a].min(dims[a] - 2));

    let mut vertex_of_edge: FxHashMap<u64, u32> = FxHashMap::default();
    let mut mesh = Mesh::default();

    for z in first[2]..=last[2] {
        for y in first[1]..=last[1] {
            for x in first[0]..=last[0] {
                let mut cube_index = 0usize;
                for (c, off) in CORNER_OFFSETS.iter().enumerate() {
                    if field.get(x + off[0], y + off[1], z + off[2]) == label {
                        cube_index |= 1 << c;
                    }
                }
                let edges = EDGE_TABLE[cube_index];
                if edges == 0 {
                    continue;
                }

                let mut cell_vertices = [0u32; 12];
                for (e, corners) in EDGE_CORNERS.iter().enumerate() {
                    if edges & (1 << e) == 0 {
                        continue;
                    }
                    let a = CORNER_OFFSETS[corners[0]];
                    let b = CORNER_OFFSETS[corners[1]];
                    let lower = [x + a[0].min(b[0]), y + a[1].min(b[1]), z + a[2].min(b[2])];
                    let axis = (0..3).find(|&i| a[i] != b[i]).unwrap_or(0);
                    let key = field.index(lower[0], lower[1], lower[2]) as u64 * 3 + axis as u64;

                    cell_vertices[e] = *vertex_of_edge.entry(key).or_insert_with(|| {
                        let mut p = Vec3::new(lower[0] as f32, lower[1] as f32, lower[2] as f32);
                        p[axis] += 0.5;
                        mesh.positions.push(p * spacing);
                        mesh.positions.len() as u32 - 1
                    });
                }

                let row = &TRI_TABLE[cube_index];
                for tri in row.chunks_exact(3).take_while(|t| t[0] >= 0) {
                    mesh.triangles.push([
                        cell_vertices[tri[0] as usize],
                        cell_vertices[tri[2] as usize],
                        cell_vertices[tri[1] as usize],
                    ]);
                }
            }
        }
    }

    if mesh.is_empty() {
        return Err(GeometryError::EmptySurface { label });
    }
    trace!(
        label,
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        "Contoured label"
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap as Map;

    /// Six times the signed volume enclosed by a closed mesh.
    fn signed_volume6(mesh: &Mesh) -> f32 {
        mesh.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = t.map(|i| mesh.positions[i as usize]);
                a.dot(b.cross(c))
            })
            .sum()
    }

    fn edge_use_counts(mesh: &Mesh) -> Map<(u32, u32), usize> {
        let mut counts = Map::default();
        for t in &mesh.triangles {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                *counts.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        counts
    }

    #[test]
    fn test_single_voxel_gives_closed_octahedron() {
        let mut field = Volume::<u32>::new([3, 3, 3]);
        field.set(1, 1, 1, 5);
        let mesh = extract_label_surface(&field, 5, Vec3::ONE).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.triangle_count(), 8);
        assert!(edge_use_counts(&mesh).values().all(|&c| c == 2));
        assert!(signed_volume6(&mesh) > 0.0, "normals should face outward");
    }

    #[test]
    fn test_interior_box_is_closed_and_bounded() {
        let mut field = Volume::<u32>::new([10, 10, 10]);
        field.fill_box([2, 3, 4], [6, 7, 8], 9);
        let mesh = extract_label_surface(&field, 9, Vec3::ONE).unwrap();
        assert!(edge_use_counts(&mesh).values().all(|&c| c == 2));
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3::new(1.5, 2.5, 3.5));
        assert_eq!(bounds.max, Vec3::new(5.5, 6.5, 7.5));
    }

    #[test]
    fn test_other_labels_are_background() {
        let mut field = Volume::<u32>::new([8, 8, 8]);
        field.fill_box([0, 0, 0], [8, 8, 8], 3);
        field.fill_box([2, 2, 2], [5, 5, 5], 4);
        let inner = extract_label_surface(&field, 4, Vec3::ONE).unwrap();
        assert!(edge_use_counts(&inner).values().all(|&c| c == 2));
    }

    #[test]
    fn test_surface_open_at_field_border() {
        let mut field = Volume::<u32>::new([6, 6, 6]);
        field.fill_box([0, 1, 1], [3, 5, 5], 2);
        let mesh = extract_label_surface(&field, 2, Vec3::ONE).unwrap();
        assert!(edge_use_counts(&mesh).values().any(|&c| c == 1));
        assert_eq!(mesh.bounds().unwrap().min.x, 0.0);
    }

    #[test]
    fn test_spacing_scales_vertices() {
        let mut field = Volume::<u32>::new([3, 3, 3]);
        field.set(1, 1, 1, 1);
        let mesh = extract_label_surface(&field, 1, Vec3::new(1.0, 1.0, 2.49)).unwrap();
        let bounds = mesh.bounds().unwrap();
        assert!((bounds.min.z - 0.5 * 2.49).abs() < 1e-5);
        assert!((bounds.max.z - 1.5 * 2.49).abs() < 1e-5);
    }

    #[test]
    fn test_absent_label_is_empty_surface() {
        let field = Volume::<u32>::new([4, 4, 4]);
        assert_eq!(
            extract_label_surface(&field, 8, Vec3::ONE),
            Err(GeometryError::EmptySurface { label: 8 })
        );
    }

    #[test]
    fn test_fragments_share_seam_vertices() {
        let mut whole = Volume::<u32>::new([9, 6, 6]);
        whole.fill_box([1, 1, 1], [8, 5, 5], 7);

        let mut left = Volume::<u32>::new([5, 6, 6]);
        let mut right = Volume::<u32>::new([5, 6, 6]);
        for z in 0..6 {
            for y in 0..6 {
                for x in 0..5 {
                    left.set(x, y, z, whole.get(x, y, z));
                    right.set(x, y, z, whole.get(x + 4, y, z));
                }
            }
        }
        let a = extract_label_surface(&left, 7, Vec3::ONE).unwrap();
        let mut b = extract_label_surface(&right, 7, Vec3::ONE).unwrap();
        b.translate(Vec3::new(4.0, 0.0, 0.0));

        let on_seam = |m: &Mesh| {
            let mut pts: Vec<[i32; 3]> = m
                .positions
                .iter()
                .filter(|p| p.x == 4.0)
                .map(|p| p.to_array().map(|c| (c * 2.0) as i32))
                .collect();
            pts.sort_unstable();
            pts
        };
        assert!(!on_seam(&a).is_empty());
        assert_eq!(on_seam(&a), on_seam(&b));
    }
}
