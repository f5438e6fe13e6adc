//! Object catalog: which chunks contain each object.
//!
//! The catalog is built from chunk labels during extraction and persisted in
//! the store root, so assembly knows every fragment an object should have
//! without globbing the fragment namespace. Chunks whose labels could not
//! be read are kept as unresolved: any object might live in them, so strict
//! assembly refuses to finish while one is outstanding.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use axon_volume::ChunkCoord;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::store::write_atomic;

/// Map from object id to the sorted chunk coordinates containing it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCatalog {
    objects: BTreeMap<u32, Vec<ChunkCoord>>,
    /// Chunks whose ids are unknown because they failed to load or close.
    #[serde(default)]
    unresolved: BTreeSet<ChunkCoord>,
}

impl ObjectCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that chunk `coord` contains every id in `ids`.
    ///
    /// This resolves `coord` if it was marked unresolved.
    pub fn insert_chunk(&mut self, coord: ChunkCoord, ids: &[u32]) {
        self.unresolved.remove(&coord);
        for &id in ids {
            let chunks = self.objects.entry(id).or_default();
            if let Err(pos) = chunks.binary_search(&coord) {
                chunks.insert(pos, coord);
            }
        }
    }

    /// Forgets everything recorded for chunk `coord`.
    pub fn remove_chunk(&mut self, coord: ChunkCoord) {
        self.objects.retain(|_, chunks| {
            chunks.retain(|&c| c != coord);
            !chunks.is_empty()
        });
    }

    /// Replaces whatever was recorded for `coord` with `ids`.
    pub fn replace_chunk(&mut self, coord: ChunkCoord, ids: &[u32]) {
        self.remove_chunk(coord);
        self.insert_chunk(coord, ids);
    }

    /// Marks chunk `coord` as holding unknown ids, forgetting earlier ones.
    pub fn mark_unresolved(&mut self, coord: ChunkCoord) {
        self.remove_chunk(coord);
        self.unresolved.insert(coord);
    }

    /// Chunks whose ids are unknown, in ascending order.
    pub fn unresolved(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.unresolved.iter().copied()
    }

    /// Chunks an assembly of `id` must account for: those known to contain
    /// it plus every unresolved chunk, sorted.
    pub fn expected_chunks(&self, id: u32) -> Vec<ChunkCoord> {
        let mut coords: BTreeSet<ChunkCoord> = self.chunks_for(id).iter().copied().collect();
        coords.extend(self.unresolved.iter().copied());
        coords.into_iter().collect()
    }

    /// Chunks containing object `id`; empty if unknown.
    pub fn chunks_for(&self, id: u32) -> &[ChunkCoord] {
        self.objects.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All object ids in ascending order.
    pub fn object_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.objects.keys().copied()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no object is recorded.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Writes the catalog as RON.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let text = ron::ser::to_string_pretty(self, pretty).map_err(|e| PipelineError::Catalog {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        write_atomic(path, text.as_bytes())
    }

    /// Reads a catalog written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::MissingInput(path.to_path_buf()));
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };
        ron::from_str(&text).map_err(|e| PipelineError::Catalog {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Like [`load`](Self::load) but returns `None` when no catalog exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, PipelineError> {
        match Self::load(path) {
            Ok(catalog) => Ok(Some(catalog)),
            Err(PipelineError::MissingInput(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_chunks_sorted_and_unique() {
        let mut catalog = ObjectCatalog::new();
        catalog.insert_chunk(ChunkCoord::new(1, 0, 0), &[7, 9]);
        catalog.insert_chunk(ChunkCoord::new(0, 0, 0), &[7]);
        catalog.insert_chunk(ChunkCoord::new(1, 0, 0), &[7]);
        assert_eq!(
            catalog.chunks_for(7),
            &[ChunkCoord::new(0, 0, 0), ChunkCoord::new(1, 0, 0)]
        );
        assert_eq!(catalog.chunks_for(9), &[ChunkCoord::new(1, 0, 0)]);
        assert!(catalog.chunks_for(3).is_empty());
        assert_eq!(catalog.object_ids().collect::<Vec<_>>(), vec![7, 9]);
    }

    #[test]
    fn test_remove_chunk_drops_empty_objects() {
        let mut catalog = ObjectCatalog::new();
        catalog.insert_chunk(ChunkCoord::new(0, 0, 0), &[1, 2]);
        catalog.insert_chunk(ChunkCoord::new(0, 0, 1), &[2]);
        catalog.remove_chunk(ChunkCoord::new(0, 0, 0));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.chunks_for(2), &[ChunkCoord::new(0, 0, 1)]);
    }

    #[test]
    fn test_unresolved_chunk_is_expected_for_every_object() {
        let mut catalog = ObjectCatalog::new();
        let good = ChunkCoord::new(0, 0, 0);
        let bad = ChunkCoord::new(1, 0, 0);
        catalog.insert_chunk(good, &[7]);
        catalog.insert_chunk(bad, &[9]);
        catalog.mark_unresolved(bad);

        assert!(catalog.chunks_for(9).is_empty());
        assert_eq!(catalog.unresolved().collect::<Vec<_>>(), vec![bad]);
        assert_eq!(catalog.expected_chunks(7), vec![good, bad]);

        catalog.replace_chunk(bad, &[7]);
        assert_eq!(catalog.unresolved().count(), 0);
        assert_eq!(catalog.expected_chunks(7), vec![good, bad]);
        assert!(catalog.expected_chunks(9).is_empty());
    }

    #[test]
    fn test_unresolved_chunks_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        let mut catalog = ObjectCatalog::new();
        catalog.insert_chunk(ChunkCoord::new(0, 0, 0), &[1]);
        catalog.mark_unresolved(ChunkCoord::new(0, 1, 0));
        catalog.save(&path).unwrap();
        assert_eq!(ObjectCatalog::load(&path).unwrap(), catalog);

        // Catalogs written before unresolved chunks were tracked still load.
        std::fs::write(&path, "(objects: {1: [(i: 0, j: 0, k: 0)]})").unwrap();
        let older = ObjectCatalog::load(&path).unwrap();
        assert_eq!(older.chunks_for(1), &[ChunkCoord::new(0, 0, 0)]);
        assert_eq!(older.unresolved().count(), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        assert_eq!(ObjectCatalog::load_optional(&path).unwrap(), None);

        let mut catalog = ObjectCatalog::new();
        catalog.insert_chunk(ChunkCoord::new(2, 3, 1), &[7, 300_001]);
        catalog.save(&path).unwrap();
        assert_eq!(ObjectCatalog::load(&path).unwrap(), catalog);
    }

    #[test]
    fn test_corrupt_catalog_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.ron");
        std::fs::write(&path, "not ron {").unwrap();
        assert!(matches!(
            ObjectCatalog::load(&path),
            Err(PipelineError::Catalog { .. })
        ));
    }
}
