//! Merging of per-chunk fragments into one mesh per object.

use std::path::Path;

use axon_config::{AssemblyConfig, SeamPolicy};
use axon_geometry::{Mesh, Vec3};
use axon_volume::ChunkCoord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::TaskStatus;
use crate::error::PipelineError;
use crate::store::{ChunkStore, FragmentStamp, write_atomic};

/// Positions closer than this (in assembled units) are merged by
/// [`SeamPolicy::Weld`].
const WELD_TOLERANCE: f32 = 1e-2;

/// What the assembler did for one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyOutcome {
    /// Object id.
    pub object: u32,
    /// Whether the assembled mesh was written or already up to date.
    pub status: TaskStatus,
    /// Fragments merged (zero when skipped).
    pub fragments: usize,
    /// Expected fragments that were absent, only non-empty in partial mode.
    pub missing: Vec<ChunkCoord>,
}

/// Places fragments into the shared frame and concatenates them.
#[derive(Debug, Clone)]
pub struct Assembler {
    extent: (f64, f64, f64),
    anisotropy: f64,
    seam_policy: SeamPolicy,
    allow_partial: bool,
}

impl Assembler {
    /// Creates an assembler from the assembly settings.
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            extent: config.chunk_extent,
            anisotropy: config.anisotropy,
            seam_policy: config.seam_policy,
            allow_partial: config.allow_partial,
        }
    }

    /// Offset of the chunk at `coord`: `(i*W, j*H, k*D*A)`.
    pub fn chunk_offset(&self, coord: ChunkCoord) -> Vec3 {
        let (w, h, d) = self.extent;
        Vec3::new(
            (coord.i as f64 * w) as f32,
            (coord.j as f64 * h) as f32,
            (coord.k as f64 * d * self.anisotropy) as f32,
        )
    }

    /// Translates each fragment by its chunk offset and merges them.
    pub fn merge(&self, fragments: &[(ChunkCoord, Mesh)]) -> Mesh {
        let mut combined = Mesh::default();
        for (coord, fragment) in fragments {
            let mut placed = fragment.clone();
            placed.translate(self.chunk_offset(*coord));
            combined.append(&placed);
        }
        match self.seam_policy {
            SeamPolicy::Duplicate => combined,
            SeamPolicy::Weld => combined.weld(WELD_TOLERANCE),
        }
    }

    /// Assembles object `id` and writes the result to the store.
    ///
    /// `expected` lists the chunks that may contain the object. Any of them
    /// without a fragment fails the object with
    /// [`PipelineError::IncompleteAssembly`] unless partial assembly is
    /// allowed. Without a catalog, fragments are discovered by file name.
    ///
    /// An existing mesh is kept only while the fragments it was built from
    /// are unchanged; otherwise it is rebuilt and its LOD levels removed.
    pub fn assemble(
        &self,
        store: &ChunkStore,
        id: u32,
        expected: Option<&[ChunkCoord]>,
    ) -> Result<AssemblyOutcome, PipelineError> {
        let _span = info_span!("assemble", object = id).entered();
        let (present, missing) = match expected {
            Some(coords) => coords
                .iter()
                .copied()
                .partition::<Vec<_>, _>(|&c| store.fragment_exists(c, id)),
            None => (store.discover_fragments(id)?, Vec::new()),
        };
        if !missing.is_empty() && !self.allow_partial {
            return Err(PipelineError::IncompleteAssembly {
                object: id,
                missing,
            });
        }
        if present.is_empty() {
            return Err(PipelineError::NoFragments(id));
        }

        let sources = AssemblySources {
            fragments: present
                .iter()
                .map(|&coord| store.fragment_stamp(coord, id))
                .collect::<Result<_, _>>()?,
            missing,
        };
        let sources_path = store.sources_path(id);
        if store.assembled_exists(id) {
            if AssemblySources::load(&sources_path).as_ref() == Some(&sources) {
                debug!("Assembled mesh is up to date, skipping");
                return Ok(AssemblyOutcome {
                    object: id,
                    status: TaskStatus::Skipped,
                    fragments: 0,
                    missing: sources.missing,
                });
            }
            info!("Fragments changed since the last assembly, rebuilding");
        }
        if !sources.missing.is_empty() {
            warn!(missing = sources.missing.len(), "Assembling without every fragment");
        }

        let fragments = present
            .iter()
            .map(|&coord| Ok((coord, store.read_fragment(coord, id)?)))
            .collect::<Result<Vec<_>, PipelineError>>()?;
        let combined = self.merge(&fragments);
        store.write_assembled(id, &combined)?;
        store.remove_lods(id)?;
        sources.save(&sources_path)?;

        info!(
            fragments = fragments.len(),
            vertices = combined.vertex_count(),
            triangles = combined.triangle_count(),
            "Object assembled"
        );
        Ok(AssemblyOutcome {
            object: id,
            status: TaskStatus::Done,
            fragments: fragments.len(),
            missing: sources.missing,
        })
    }
}

/// Fragments an assembled mesh was built from, kept beside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AssemblySources {
    fragments: Vec<FragmentStamp>,
    missing: Vec<ChunkCoord>,
}

impl AssemblySources {
    /// Reads a sources file; an absent or unreadable one counts as unknown.
    fn load(path: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(path).ok()?;
        match ron::from_str(&text) {
            Ok(sources) => Some(sources),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable assembly sources");
                None
            }
        }
    }

    fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::new().depth_limit(2))
            .map_err(|e| PipelineError::Sources {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        write_atomic(path, text.as_bytes())
    }
}
