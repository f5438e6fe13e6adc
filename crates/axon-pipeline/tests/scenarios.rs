//! Cross-stage scenarios over a temporary chunk store.

use std::sync::Arc;

use axon_config::Config;
use axon_geometry::{
    DecimateParams, GeometryEngine, GeometryError, Mesh, NativeGeometry, SmoothParams, Vec3,
};
use axon_pipeline::{ChunkStore, Generation, ObjectCatalog, Pipeline, PipelineError, TaskStatus};
use axon_volume::{ChunkCoord, GridDims, Volume, VolumeChunk};

/// Chunks are `EXTENT + 1` voxels wide so neighbours share one voxel plane.
const EXTENT: usize = 8;
const SIDE: usize = EXTENT + 1;

fn config(root: &std::path::Path, grid: (u32, u32, u32)) -> Config {
    let mut config = Config::default();
    config.grid.dims = grid;
    config.workers.count = 4;
    config.storage.root = root.to_path_buf();
    config.assembly.chunk_extent = (EXTENT as f64, EXTENT as f64, EXTENT as f64);
    config.lod.levels = 2;
    config
}

fn write_filled(store: &ChunkStore, coord: ChunkCoord, labels: Volume<u32>) {
    store
        .write_chunk(Generation::Filled, coord, &VolumeChunk::from_labels(labels))
        .unwrap();
}

/// Fails contouring of `object` in any chunk whose field also holds
/// `sentinel`.
struct FaultyEngine {
    object: u32,
    sentinel: u32,
}

impl GeometryEngine for FaultyEngine {
    fn extract_isosurface(
        &self,
        field: &Volume<u32>,
        value: u32,
        spacing: Vec3,
    ) -> Result<Mesh, GeometryError> {
        if value == self.object && field.samples().contains(&self.sentinel) {
            return Err(GeometryError::InvalidParameter {
                name: "field",
                reason: "injected failure".to_string(),
            });
        }
        NativeGeometry.extract_isosurface(field, value, spacing)
    }

    fn smooth(&self, mesh: &Mesh, params: &SmoothParams) -> Result<Mesh, GeometryError> {
        NativeGeometry.smooth(mesh, params)
    }

    fn decimate_topology_preserving(
        &self,
        mesh: &Mesh,
        params: &DecimateParams,
    ) -> Result<Mesh, GeometryError> {
        NativeGeometry.decimate_topology_preserving(mesh, params)
    }

    fn decimate_quadric(&self, mesh: &Mesh, reduction: f64) -> Result<Mesh, GeometryError> {
        NativeGeometry.decimate_quadric(mesh, reduction)
    }

    fn morphological_dilate(&self, volume: &Volume<u32>, size: usize) -> Volume<u32> {
        NativeGeometry.morphological_dilate(volume, size)
    }

    fn morphological_erode(&self, volume: &Volume<u32>, size: usize) -> Volume<u32> {
        NativeGeometry.morphological_erode(volume, size)
    }
}

/// Config whose fragments are raw contours, so every vertex sits on a
/// voxel-edge midpoint.
fn unsmoothed_config(root: &std::path::Path, grid: (u32, u32, u32)) -> Config {
    let mut config = config(root, grid);
    config.extraction.smoothing.iterations = 0;
    config.extraction.target_reduction = 0.0;
    config
}

fn assert_bounds(mesh: &Mesh, min: Vec3, max: Vec3) {
    let bounds = mesh.bounds().unwrap();
    assert!(
        bounds.min.abs_diff_eq(min, 1e-3) && bounds.max.abs_diff_eq(max, 1e-3),
        "bounds {:?}..{:?}, expected {min:?}..{max:?}",
        bounds.min,
        bounds.max
    );
}

/// Sorted bit patterns of the positions of `mesh`, translated by `offset`,
/// that `on_plane` accepts.
fn seam_vertices(mesh: &Mesh, offset: Vec3, on_plane: impl Fn(Vec3) -> bool) -> Vec<[u32; 3]> {
    let mut pts: Vec<[u32; 3]> = mesh
        .positions
        .iter()
        .map(|p| *p + offset)
        .filter(|p| on_plane(*p))
        .map(|p| [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()])
        .collect();
    pts.sort_unstable();
    pts
}

#[test]
fn test_object_spanning_two_chunks_assembles_without_welding() {
    let dir = tempfile::tempdir().unwrap();
    let config = unsmoothed_config(dir.path(), (2, 2, 2));
    let a = config.assembly.anisotropy as f32;
    let pipeline = Pipeline::new(config).unwrap();
    let store = pipeline.store();

    // Object 7 covers global x voxels 3..=13, crossing the plane x = EXTENT.
    // Object 9 covers global z voxels 4..=10, crossing the plane z = EXTENT.
    for coord in GridDims::new(2, 2, 2).iter() {
        let mut labels = Volume::<u32>::new([SIDE; 3]);
        match (coord.i, coord.j, coord.k) {
            (0, 0, 0) => labels.fill_box([3, 2, 2], [SIDE, 7, 7], 7),
            (1, 0, 0) => labels.fill_box([0, 2, 2], [6, 7, 7], 7),
            (0, 1, 0) => labels.fill_box([2, 2, 4], [7, 7, SIDE], 9),
            (0, 1, 1) => labels.fill_box([2, 2, 0], [7, 7, 3], 9),
            _ => {}
        }
        write_filled(store, coord, labels);
    }

    let extracted = pipeline.extract().unwrap();
    assert!(extracted.is_success());
    let left = store.read_fragment(ChunkCoord::new(0, 0, 0), 7).unwrap();
    let right = store.read_fragment(ChunkCoord::new(1, 0, 0), 7).unwrap();
    assert_eq!(
        store.discover_fragments(7).unwrap(),
        vec![ChunkCoord::new(0, 0, 0), ChunkCoord::new(1, 0, 0)]
    );

    let assembled = pipeline.assemble(None).unwrap();
    assert!(assembled.is_success());
    let mesh = store.read_assembled(7).unwrap();
    assert_eq!(mesh.vertex_count(), left.vertex_count() + right.vertex_count());
    assert_eq!(
        mesh.triangle_count(),
        left.triangle_count() + right.triangle_count()
    );

    // Faces lie half a voxel outside the filled range; z is scaled by A.
    let seam = EXTENT as f32;
    assert_bounds(&mesh, Vec3::new(2.5, 1.5, 1.5 * a), Vec3::new(13.5, 6.5, 6.5 * a));

    // Boundary vertices of both fragments coincide on the seam plane.
    let on_x_seam = |p: Vec3| (p.x - seam).abs() < 1e-4;
    let left_seam = seam_vertices(&left, Vec3::ZERO, on_x_seam);
    assert!(!left_seam.is_empty());
    assert_eq!(left_seam, seam_vertices(&right, Vec3::new(seam, 0.0, 0.0), on_x_seam));

    // The upper fragment of object 9 is lifted by D * A, not by D.
    let lower = store.read_fragment(ChunkCoord::new(0, 1, 0), 9).unwrap();
    let upper = store.read_fragment(ChunkCoord::new(0, 1, 1), 9).unwrap();
    let stacked = store.read_assembled(9).unwrap();
    assert_eq!(stacked.vertex_count(), lower.vertex_count() + upper.vertex_count());
    assert_bounds(
        &stacked,
        Vec3::new(1.5, seam + 1.5, 3.5 * a),
        Vec3::new(6.5, seam + 6.5, (seam + 2.5) * a),
    );
    // Both fragments meet on the plane z = D * A with the same footprint.
    let z_seam = seam * a;
    let footprint = |m: &Mesh, z: f32| {
        let mut pts: Vec<[u32; 2]> = m
            .positions
            .iter()
            .filter(|p| (p.z - z).abs() < 1e-4)
            .map(|p| [p.x.to_bits(), p.y.to_bits()])
            .collect();
        pts.sort_unstable();
        pts
    };
    let lower_seam = footprint(&lower, z_seam);
    assert!(!lower_seam.is_empty());
    assert_eq!(lower_seam, footprint(&upper, 0.0));
    let stacked_on_seam = stacked
        .positions
        .iter()
        .filter(|p| (p.z - z_seam).abs() < 1e-3)
        .count();
    assert_eq!(stacked_on_seam, 2 * lower_seam.len());
}

#[test]
fn test_injected_failure_is_isolated() {
    const X: u32 = 7;
    const OTHER: u32 = 20;
    const SENTINEL: u32 = 999;
    let failing = ChunkCoord::new(2, 3, 1);

    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FaultyEngine {
        object: X,
        sentinel: SENTINEL,
    });
    let pipeline = Pipeline::with_engine(config(dir.path(), (3, 4, 2)), engine).unwrap();
    let store = pipeline.store();

    let grid = GridDims::new(3, 4, 2);
    for coord in grid.iter() {
        let mut labels = Volume::<u32>::new([SIDE; 3]);
        labels.fill_box([1, 1, 1], [4, 4, 4], X);
        labels.fill_box([5, 5, 5], [8, 8, 8], OTHER);
        if coord == failing {
            labels.fill_box([1, 5, 5], [3, 7, 7], SENTINEL);
        }
        write_filled(store, coord, labels);
    }

    let report = pipeline.extract().unwrap();
    assert!(report.is_success(), "chunk tasks themselves succeed");
    let failures: Vec<_> = report
        .successes()
        .flat_map(|e| e.failed.iter().map(move |(id, _)| (e.coord, *id)))
        .collect();
    assert_eq!(failures, vec![(failing, X)]);

    assert!(!store.fragment_exists(failing, X));
    assert!(store.fragment_exists(failing, OTHER));
    assert!(store.fragment_exists(failing, SENTINEL));
    for coord in grid.iter().filter(|&c| c != failing) {
        assert!(store.fragment_exists(coord, X), "missing {coord}");
        assert!(store.fragment_exists(coord, OTHER), "missing {coord}");
    }

    // The catalog still expects X in the failed chunk.
    let assembled = pipeline.assemble(Some(X)).unwrap();
    match &assembled.outcomes[0].result {
        Err(PipelineError::IncompleteAssembly { object, missing }) => {
            assert_eq!(*object, X);
            assert_eq!(missing, &vec![failing]);
        }
        other => panic!("expected incomplete assembly, got {other:?}"),
    }
    assert!(pipeline.assemble(Some(OTHER)).unwrap().is_success());
}

#[test]
fn test_rerun_skips_finished_work() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(dir.path(), (1, 1, 1))).unwrap();
    let store = pipeline.store();
    let coord = ChunkCoord::new(0, 0, 0);

    let mut labels = Volume::<u32>::new([SIDE; 3]);
    labels.fill_box([1, 1, 1], [4, 8, 8], 3);
    labels.fill_box([5, 1, 1], [8, 8, 8], 4);
    store
        .write_chunk(Generation::Unfilled, coord, &VolumeChunk::from_labels(labels))
        .unwrap();

    let first = pipeline.run().unwrap();
    assert!(first.is_success(), "{first:?}");
    let fragment = std::fs::read(store.fragment_path(coord, 3)).unwrap();
    let modified = std::fs::metadata(store.fragment_path(coord, 3))
        .unwrap()
        .modified()
        .unwrap();

    let second = pipeline.extract().unwrap();
    let extraction = second.successes().next().unwrap();
    assert!(extraction.written.is_empty());
    assert_eq!(extraction.skipped, vec![3, 4]);
    assert_eq!(std::fs::read(store.fragment_path(coord, 3)).unwrap(), fragment);
    assert_eq!(
        std::fs::metadata(store.fragment_path(coord, 3))
            .unwrap()
            .modified()
            .unwrap(),
        modified
    );

    // Removing one fragment repeats only that object.
    std::fs::remove_file(store.fragment_path(coord, 4)).unwrap();
    let third = pipeline.extract().unwrap();
    let extraction = third.successes().next().unwrap();
    assert_eq!(extraction.written, vec![4]);
    assert_eq!(extraction.skipped, vec![3]);
}

#[test]
fn test_corrupt_chunk_does_not_stop_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(dir.path(), (2, 1, 1))).unwrap();
    let store = pipeline.store();

    let mut labels = Volume::<u32>::new([SIDE; 3]);
    labels.fill_box([2, 2, 2], [6, 6, 6], 11);
    write_filled(store, ChunkCoord::new(0, 0, 0), labels);

    let corrupt = store.chunk_path(Generation::Filled, ChunkCoord::new(1, 0, 0));
    std::fs::create_dir_all(corrupt.parent().unwrap()).unwrap();
    std::fs::write(&corrupt, b"not a chunk").unwrap();

    let report = pipeline.extract().unwrap();
    assert_eq!(report.failure_count(), 1);
    let (task, error) = report.failures().next().unwrap();
    assert_eq!(task, "x1y0z0");
    assert!(matches!(error, PipelineError::ChunkDecode { .. }));
    assert!(store.fragment_exists(ChunkCoord::new(0, 0, 0), 11));
}

/// Object 7 spans x0y0z0 and x1y0z0 of a `(2, 1, 1)` grid.
fn object_halves() -> (Volume<u32>, Volume<u32>) {
    let mut left = Volume::<u32>::new([SIDE; 3]);
    left.fill_box([3, 2, 2], [SIDE, 7, 7], 7);
    let mut right = Volume::<u32>::new([SIDE; 3]);
    right.fill_box([0, 2, 2], [6, 7, 7], 7);
    (left, right)
}

fn fragment_vertices(store: &ChunkStore, coord: ChunkCoord, id: u32) -> usize {
    store.read_fragment(coord, id).unwrap().vertex_count()
}

#[test]
fn test_unreadable_chunk_blocks_assembly_until_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(config(dir.path(), (2, 1, 1))).unwrap();
    let store = pipeline.store();
    let good = ChunkCoord::new(0, 0, 0);
    let broken = ChunkCoord::new(1, 0, 0);
    let (left, right) = object_halves();
    write_filled(store, good, left);
    let broken_path = store.chunk_path(Generation::Filled, broken);
    std::fs::write(&broken_path, b"garbage").unwrap();

    assert_eq!(pipeline.extract().unwrap().failure_count(), 1);
    let catalog = ObjectCatalog::load(&store.catalog_path()).unwrap();
    assert_eq!(catalog.unresolved().collect::<Vec<_>>(), vec![broken]);

    let first = pipeline.assemble(None).unwrap();
    match &first.outcomes[0].result {
        Err(PipelineError::IncompleteAssembly { object, missing }) => {
            assert_eq!(*object, 7);
            assert_eq!(missing, &vec![broken]);
        }
        other => panic!("expected incomplete assembly, got {other:?}"),
    }
    assert!(!store.assembled_exists(7));

    write_filled(store, broken, right);
    assert!(pipeline.extract().unwrap().is_success());
    let catalog = ObjectCatalog::load(&store.catalog_path()).unwrap();
    assert_eq!(catalog.unresolved().count(), 0);
    assert_eq!(catalog.chunks_for(7), &[good, broken]);

    let second = pipeline.assemble(None).unwrap();
    assert!(second.is_success(), "{:?}", second.failures().collect::<Vec<_>>());
    assert_eq!(
        store.read_assembled(7).unwrap().vertex_count(),
        fragment_vertices(store, good, 7) + fragment_vertices(store, broken, 7)
    );
}

#[test]
fn test_partial_mesh_is_rebuilt_once_chunk_is_repaired() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), (2, 1, 1));
    config.assembly.allow_partial = true;
    let pipeline = Pipeline::new(config).unwrap();
    let store = pipeline.store();
    let good = ChunkCoord::new(0, 0, 0);
    let broken = ChunkCoord::new(1, 0, 0);
    let (left, right) = object_halves();
    write_filled(store, good, left);
    std::fs::write(store.chunk_path(Generation::Filled, broken), b"garbage").unwrap();

    pipeline.extract().unwrap();
    let partial = pipeline.assemble(None).unwrap();
    let outcome = partial.successes().next().unwrap();
    assert_eq!(outcome.missing, vec![broken]);
    assert_eq!(
        store.read_assembled(7).unwrap().vertex_count(),
        fragment_vertices(store, good, 7)
    );
    assert!(pipeline.generate_lods(None).unwrap().is_success());
    assert!(store.lod_exists(7, 0));

    write_filled(store, broken, right);
    pipeline.extract().unwrap();
    let rebuilt = pipeline.assemble(None).unwrap();
    let outcome = rebuilt.successes().next().unwrap();
    assert_eq!(outcome.status, TaskStatus::Done);
    assert_eq!(outcome.fragments, 2);
    assert_eq!(
        store.read_assembled(7).unwrap().vertex_count(),
        fragment_vertices(store, good, 7) + fragment_vertices(store, broken, 7)
    );
    // Levels derived from the partial mesh are gone and get regenerated.
    assert!(!store.lod_exists(7, 0));
    let lods = pipeline.generate_lods(None).unwrap();
    assert_eq!(lods.successes().next().unwrap().status, TaskStatus::Done);
    assert!(store.lod_exists(7, 1));
}
