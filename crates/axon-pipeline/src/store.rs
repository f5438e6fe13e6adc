//! On-disk chunk store.
//!
//! ```text
//! <root>/
//!   unfilled/x{i}y{j}z{k}.nvc           raw chunks
//!   filled/x{i}y{j}z{k}.nvc             closed chunks
//!   fragments/x{i}y{j}z{k}_n{id:03}.nmsh
//!   assembled/n{id:02}.nmsh
//!   assembled/n{id:02}.sources.ron      fragments the mesh was built from
//!   lod/n{id:02}_LOD{level}.obj
//!   catalog.ron
//! ```
//!
//! Bytes go to a hidden temporary sibling that is then renamed into place, so
//! a file that exists is always complete. Artifacts are written once, except
//! assembled meshes, which are rebuilt when their fragments change.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use axon_geometry::{Mesh, read_obj, write_obj};
use axon_volume::{ChunkCoord, VolumeChunk};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::PipelineError;

/// Extension of chunk files.
pub const CHUNK_EXT: &str = "nvc";
/// Extension of binary mesh files.
pub const MESH_EXT: &str = "nmsh";
/// Extension of LOD files.
pub const LOD_EXT: &str = "obj";
/// File name of the object catalog in the store root.
pub const CATALOG_FILE: &str = "catalog.ron";

const FRAGMENT_DIR: &str = "fragments";
const ASSEMBLED_DIR: &str = "assembled";
const LOD_DIR: &str = "lod";

/// Identity of a fragment file at one point in time.
///
/// Fragments are replaced by atomic rename, so a rewrite changes the
/// modification time even when the length stays the same.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentStamp {
    /// Chunk the fragment came from.
    pub coord: ChunkCoord,
    /// File length in bytes.
    pub len: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: u64,
}

/// Which generation of a chunk to address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Raw chunks as delivered.
    Unfilled,
    /// Chunks after morphological closing.
    Filled,
}

impl Generation {
    fn dir(self) -> &'static str {
        match self {
            Generation::Unfilled => "unfilled",
            Generation::Filled => "filled",
        }
    }
}

/// File-system backed store for chunks and mesh artifacts.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Opens a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- Paths ---

    /// Path of chunk `coord` in `generation`.
    pub fn chunk_path(&self, generation: Generation, coord: ChunkCoord) -> PathBuf {
        self.root
            .join(generation.dir())
            .join(format!("{}.{CHUNK_EXT}", coord.file_stem()))
    }

    /// Path of the fragment of object `id` extracted from chunk `coord`.
    pub fn fragment_path(&self, coord: ChunkCoord, id: u32) -> PathBuf {
        self.root
            .join(FRAGMENT_DIR)
            .join(format!("{}_n{id:03}.{MESH_EXT}", coord.file_stem()))
    }

    /// Path of the assembled mesh of object `id`.
    pub fn assembled_path(&self, id: u32) -> PathBuf {
        self.root
            .join(ASSEMBLED_DIR)
            .join(format!("n{id:02}.{MESH_EXT}"))
    }

    /// Path of the record of fragments the assembled mesh of `id` was built from.
    pub fn sources_path(&self, id: u32) -> PathBuf {
        self.root
            .join(ASSEMBLED_DIR)
            .join(format!("n{id:02}.sources.ron"))
    }

    /// Path of LOD level `label` of object `id`.
    pub fn lod_path(&self, id: u32, label: i32) -> PathBuf {
        self.root
            .join(LOD_DIR)
            .join(format!("n{id:02}_LOD{label}.{LOD_EXT}"))
    }

    /// Path of the object catalog.
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    // --- Chunks ---

    /// Returns true if chunk `coord` exists in `generation`.
    pub fn chunk_exists(&self, generation: Generation, coord: ChunkCoord) -> bool {
        self.chunk_path(generation, coord).is_file()
    }

    /// Reads and decodes a chunk.
    pub fn read_chunk(
        &self,
        generation: Generation,
        coord: ChunkCoord,
    ) -> Result<VolumeChunk, PipelineError> {
        let path = self.chunk_path(generation, coord);
        let bytes = read_bytes(&path)?;
        VolumeChunk::deserialize(&bytes).map_err(|source| PipelineError::ChunkDecode { coord, source })
    }

    /// Encodes and writes a chunk.
    pub fn write_chunk(
        &self,
        generation: Generation,
        coord: ChunkCoord,
        chunk: &VolumeChunk,
    ) -> Result<(), PipelineError> {
        write_atomic(&self.chunk_path(generation, coord), &chunk.serialize())
    }

    /// Coordinates of every chunk file in `generation`, sorted.
    pub fn list_chunks(&self, generation: Generation) -> Result<Vec<ChunkCoord>, PipelineError> {
        let mut coords = Vec::new();
        for name in list_dir(&self.root.join(generation.dir()))? {
            if let Some(stem) = name.strip_suffix(&format!(".{CHUNK_EXT}"))
                && let Ok(coord) = stem.parse::<ChunkCoord>()
            {
                coords.push(coord);
            }
        }
        coords.sort_unstable();
        Ok(coords)
    }

    // --- Fragments ---

    /// Returns true if the fragment for `(coord, id)` exists.
    pub fn fragment_exists(&self, coord: ChunkCoord, id: u32) -> bool {
        self.fragment_path(coord, id).is_file()
    }

    /// Reads a fragment.
    pub fn read_fragment(&self, coord: ChunkCoord, id: u32) -> Result<Mesh, PipelineError> {
        read_mesh(&self.fragment_path(coord, id))
    }

    /// Writes a fragment.
    pub fn write_fragment(&self, coord: ChunkCoord, id: u32, mesh: &Mesh) -> Result<(), PipelineError> {
        write_atomic(&self.fragment_path(coord, id), &mesh.serialize())
    }

    /// Length and modification time of the fragment for `(coord, id)`.
    pub fn fragment_stamp(&self, coord: ChunkCoord, id: u32) -> Result<FragmentStamp, PipelineError> {
        let path = self.fragment_path(coord, id);
        let meta = fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::MissingInput(path.clone()),
            _ => PipelineError::io(&path, e),
        })?;
        let modified = meta.modified().map_err(|e| PipelineError::io(&path, e))?;
        let modified_ns = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Ok(FragmentStamp {
            coord,
            len: meta.len(),
            modified_ns,
        })
    }

    /// Chunks holding a fragment of object `id`, found by file name, sorted.
    pub fn discover_fragments(&self, id: u32) -> Result<Vec<ChunkCoord>, PipelineError> {
        let mut coords: Vec<ChunkCoord> = self
            .scan_fragments()?
            .into_iter()
            .filter(|&(_, object)| object == id)
            .map(|(coord, _)| coord)
            .collect();
        coords.sort_unstable();
        Ok(coords)
    }

    /// Every object id that has at least one fragment, sorted.
    pub fn discover_objects(&self) -> Result<Vec<u32>, PipelineError> {
        let mut ids: Vec<u32> = self.scan_fragments()?.into_iter().map(|(_, id)| id).collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn scan_fragments(&self) -> Result<Vec<(ChunkCoord, u32)>, PipelineError> {
        let suffix = format!(".{MESH_EXT}");
        let mut found = Vec::new();
        for name in list_dir(&self.root.join(FRAGMENT_DIR))? {
            let Some(stem) = name.strip_suffix(&suffix) else {
                continue;
            };
            let Ok((coord, rest)) = ChunkCoord::parse_stem(stem) else {
                continue;
            };
            if let Some(id) = rest.strip_prefix("_n").and_then(|n| n.parse::<u32>().ok()) {
                found.push((coord, id));
            }
        }
        Ok(found)
    }

    // --- Assembled meshes ---

    /// Returns true if the assembled mesh of `id` exists.
    pub fn assembled_exists(&self, id: u32) -> bool {
        self.assembled_path(id).is_file()
    }

    /// Reads an assembled mesh.
    pub fn read_assembled(&self, id: u32) -> Result<Mesh, PipelineError> {
        read_mesh(&self.assembled_path(id))
    }

    /// Writes an assembled mesh.
    pub fn write_assembled(&self, id: u32, mesh: &Mesh) -> Result<(), PipelineError> {
        write_atomic(&self.assembled_path(id), &mesh.serialize())
    }

    /// Ids of every assembled mesh, sorted.
    pub fn list_assembled(&self) -> Result<Vec<u32>, PipelineError> {
        let suffix = format!(".{MESH_EXT}");
        let mut ids: Vec<u32> = list_dir(&self.root.join(ASSEMBLED_DIR))?
            .iter()
            .filter_map(|name| name.strip_suffix(&suffix)?.strip_prefix('n')?.parse().ok())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    // --- LOD levels ---

    /// Returns true if LOD level `label` of `id` exists.
    pub fn lod_exists(&self, id: u32, label: i32) -> bool {
        self.lod_path(id, label).is_file()
    }

    /// Reads a LOD level.
    pub fn read_lod(&self, id: u32, label: i32) -> Result<Mesh, PipelineError> {
        let path = self.lod_path(id, label);
        let file = fs::File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
        read_obj(BufReader::new(file)).map_err(|source| PipelineError::MeshDecode { path, source })
    }

    /// Deletes every LOD level of `id` and returns how many were removed.
    pub fn remove_lods(&self, id: u32) -> Result<usize, PipelineError> {
        let prefix = format!("n{id:02}_LOD");
        let suffix = format!(".{LOD_EXT}");
        let dir = self.root.join(LOD_DIR);
        let mut removed = 0;
        for name in list_dir(&dir)? {
            let is_level = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
                .is_some_and(|label| label.parse::<i32>().is_ok());
            if is_level {
                let path = dir.join(&name);
                fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(object = id, removed, "Removed stale LOD levels");
        }
        Ok(removed)
    }

    /// Writes a LOD level as OBJ.
    pub fn write_lod(&self, id: u32, label: i32, mesh: &Mesh) -> Result<(), PipelineError> {
        let path = self.lod_path(id, label);
        let mut text = Vec::new();
        write_obj(mesh, &mut text).map_err(|source| PipelineError::MeshDecode {
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &text)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, PipelineError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(PipelineError::MissingInput(path.to_path_buf()))
        }
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

fn read_mesh(path: &Path) -> Result<Mesh, PipelineError> {
    let bytes = read_bytes(path)?;
    Mesh::deserialize(&bytes).map_err(|source| PipelineError::MeshDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `bytes` to a temporary sibling of `path` and renames it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp"));
    fs::write(&tmp, bytes).map_err(|e| PipelineError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))?;
    trace!(path = %path.display(), bytes = bytes.len(), "Wrote artifact");
    Ok(())
}

/// File names in `dir`; an absent directory is empty.
fn list_dir(dir: &Path) -> Result<Vec<String>, PipelineError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
