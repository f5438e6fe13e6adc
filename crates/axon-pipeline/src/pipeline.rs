//! The staged pipeline: close, extract, assemble, generate LODs.

use std::fmt;
use std::sync::Arc;

use axon_config::Config;
use axon_geometry::{GeometryEngine, NativeGeometry};
use axon_volume::{ChunkCoord, GridDims};
use tracing::{error, info, warn};

use crate::TaskStatus;
use crate::assembler::{Assembler, AssemblyOutcome};
use crate::catalog::ObjectCatalog;
use crate::closer::Closer;
use crate::error::PipelineError;
use crate::extractor::{ChunkExtraction, ChunkSurfaceExtractor};
use crate::lod::{LodGenerator, LodOutcome};
use crate::scheduler::{StageReport, Task, WorkerPool};
use crate::store::{ChunkStore, Generation};

/// Counts and failures of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    /// Stage name.
    pub stage: &'static str,
    /// Tasks submitted.
    pub tasks: usize,
    /// Tasks that wrote output.
    pub done: usize,
    /// Tasks whose output already existed.
    pub skipped: usize,
    /// One line per failed task or object.
    pub failures: Vec<String>,
}

impl StageSummary {
    fn from_report<T>(report: &StageReport<T>, status: impl Fn(&T) -> TaskStatus) -> Self {
        let mut summary = Self {
            stage: report.stage,
            tasks: report.outcomes.len(),
            ..Self::default()
        };
        for value in report.successes() {
            match status(value) {
                TaskStatus::Done => summary.done += 1,
                TaskStatus::Skipped => summary.skipped += 1,
            }
        }
        summary.failures = report
            .failures()
            .map(|(task, e)| format!("{task}: {e}"))
            .collect();
        summary
    }
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} tasks, {} done, {} skipped, {} failed",
            self.stage,
            self.tasks,
            self.done,
            self.skipped,
            self.failures.len()
        )
    }
}

/// Summary of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Per-stage summaries in execution order.
    pub stages: Vec<StageSummary>,
}

impl RunReport {
    /// Total failures across all stages.
    pub fn failure_count(&self) -> usize {
        self.stages.iter().map(|s| s.failures.len()).sum()
    }

    /// Returns true if no task or object failed.
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Owns the store, geometry engine and worker pool for one run.
///
/// The pool lives as long as the pipeline and is joined when it drops.
pub struct Pipeline {
    config: Config,
    store: Arc<ChunkStore>,
    engine: Arc<dyn GeometryEngine>,
    pool: WorkerPool,
}

impl Pipeline {
    /// Creates a pipeline that uses the built-in geometry engine.
    pub fn new(config: Config) -> Result<Self, PipelineError> {
        Self::with_engine(config, Arc::new(NativeGeometry))
    }

    /// Creates a pipeline with a custom geometry engine.
    pub fn with_engine(
        config: Config,
        engine: Arc<dyn GeometryEngine>,
    ) -> Result<Self, PipelineError> {
        let pool = WorkerPool::new(config.workers.count)?;
        let store = Arc::new(ChunkStore::new(&config.storage.root));
        info!(
            root = %store.root().display(),
            workers = pool.worker_count(),
            "Pipeline ready"
        );
        Ok(Self {
            config,
            store,
            engine,
            pool,
        })
    }

    /// The chunk store the pipeline reads and writes.
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Chunks of `generation` present in the store and inside the grid.
    fn chunks(&self, generation: Generation) -> Result<Vec<ChunkCoord>, PipelineError> {
        let grid = GridDims::from(self.config.grid.dims);
        let (inside, outside): (Vec<_>, Vec<_>) = self
            .store
            .list_chunks(generation)?
            .into_iter()
            .partition(|&c| grid.contains(c));
        for coord in outside {
            warn!(chunk = %coord, "Chunk outside the configured grid, ignored");
        }
        Ok(inside)
    }

    /// Closes every raw chunk that has no filled version yet.
    pub fn close(&self) -> Result<StageReport<TaskStatus>, PipelineError> {
        let closer = Closer::new(Arc::clone(&self.engine), &self.config.closing);
        let tasks = self
            .chunks(Generation::Unfilled)?
            .into_iter()
            .map(|coord| {
                let closer = closer.clone();
                let store = Arc::clone(&self.store);
                Task::new(coord.file_stem(), move || closer.run(&store, coord))
            })
            .collect();
        Ok(self.pool.run_stage("close", tasks))
    }

    /// Raw chunks inside the grid that have no filled version.
    fn unclosed_chunks(&self, filled: &[ChunkCoord]) -> Result<Vec<ChunkCoord>, PipelineError> {
        Ok(self
            .chunks(Generation::Unfilled)?
            .into_iter()
            .filter(|c| filled.binary_search(c).is_err())
            .collect())
    }

    /// Records in `catalog` which chunks could not be read, so assembly
    /// does not mistake a gap for a complete object.
    fn mark_unresolved(
        &self,
        catalog: &mut ObjectCatalog,
        failed: impl IntoIterator<Item = ChunkCoord>,
        filled: &[ChunkCoord],
    ) -> Result<(), PipelineError> {
        for coord in failed.into_iter().chain(self.unclosed_chunks(filled)?) {
            warn!(chunk = %coord, "Object ids of chunk unknown");
            catalog.mark_unresolved(coord);
        }
        Ok(())
    }

    /// Extracts fragments from every filled chunk and updates the catalog.
    pub fn extract(&self) -> Result<StageReport<ChunkExtraction>, PipelineError> {
        let extractor = ChunkSurfaceExtractor::new(
            Arc::clone(&self.engine),
            &self.config.extraction,
            &self.config.assembly,
        );
        let coords = self.chunks(Generation::Filled)?;
        let tasks = coords
            .iter()
            .map(|&coord| {
                let extractor = extractor.clone();
                let store = Arc::clone(&self.store);
                Task::new(coord.file_stem(), move || {
                    extractor.extract_chunk(&store, coord)
                })
            })
            .collect();
        let report = self.pool.run_stage("extract", tasks);

        let catalog_path = self.store.catalog_path();
        let mut catalog = ObjectCatalog::load_optional(&catalog_path)?.unwrap_or_default();
        let mut failed = Vec::new();
        for (&coord, outcome) in coords.iter().zip(&report.outcomes) {
            match &outcome.result {
                Ok(extraction) => catalog.replace_chunk(coord, &extraction.object_ids),
                Err(_) => failed.push(coord),
            }
        }
        self.mark_unresolved(&mut catalog, failed, &coords)?;
        catalog.save(&catalog_path)?;
        info!(
            objects = catalog.len(),
            unresolved = catalog.unresolved().count(),
            "Catalog saved"
        );
        Ok(report)
    }

    /// Rebuilds the catalog from the labels of every filled chunk.
    pub fn build_catalog(&self) -> Result<ObjectCatalog, PipelineError> {
        let coords = self.chunks(Generation::Filled)?;
        let tasks = coords
            .iter()
            .map(|&coord| {
                let store = Arc::clone(&self.store);
                Task::new(coord.file_stem(), move || {
                    Ok(store.read_chunk(Generation::Filled, coord)?.object_ids())
                })
            })
            .collect();
        let report = self.pool.run_stage("catalog", tasks);

        let mut catalog = ObjectCatalog::new();
        let mut failed = Vec::new();
        for (&coord, outcome) in coords.iter().zip(&report.outcomes) {
            match &outcome.result {
                Ok(ids) => catalog.insert_chunk(coord, ids),
                Err(e) => {
                    error!(chunk = %coord, error = %e, "Chunk left out of catalog");
                    failed.push(coord);
                }
            }
        }
        self.mark_unresolved(&mut catalog, failed, &coords)?;
        catalog.save(&self.store.catalog_path())?;
        info!(objects = catalog.len(), "Catalog rebuilt");
        Ok(catalog)
    }

    /// Assembles one object, or every known object when `only` is `None`.
    ///
    /// Object ids and their expected chunks come from the catalog; without
    /// one they are discovered from fragment file names. Unresolved chunks
    /// are expected for every object.
    pub fn assemble(&self, only: Option<u32>) -> Result<StageReport<AssemblyOutcome>, PipelineError> {
        let catalog = ObjectCatalog::load_optional(&self.store.catalog_path())?;
        if catalog.is_none() {
            warn!("No catalog, discovering fragments by file name");
        }
        let ids = match (only, &catalog) {
            (Some(id), _) => vec![id],
            (None, Some(catalog)) => catalog.object_ids().collect(),
            (None, None) => self.store.discover_objects()?,
        };

        let assembler = Assembler::new(&self.config.assembly);
        let tasks = ids
            .into_iter()
            .map(|id| {
                let assembler = assembler.clone();
                let store = Arc::clone(&self.store);
                let expected = catalog.as_ref().map(|c| c.expected_chunks(id));
                Task::new(format!("n{id}"), move || {
                    assembler.assemble(&store, id, expected.as_deref())
                })
            })
            .collect();
        Ok(self.pool.run_stage("assemble", tasks))
    }

    /// Generates LOD levels for one object, or every assembled object.
    pub fn generate_lods(&self, only: Option<u32>) -> Result<StageReport<LodOutcome>, PipelineError> {
        let ids = match only {
            Some(id) => vec![id],
            None => self.store.list_assembled()?,
        };
        let generator = LodGenerator::new(Arc::clone(&self.engine), &self.config.lod);
        let tasks = ids
            .into_iter()
            .map(|id| {
                let generator = generator.clone();
                let store = Arc::clone(&self.store);
                Task::new(format!("n{id}"), move || generator.generate(&store, id))
            })
            .collect();
        Ok(self.pool.run_stage("lod", tasks))
    }

    /// Runs every stage in order, each after the previous one has finished.
    ///
    /// Failures are collected rather than stopping the run; later stages
    /// still process every object whose inputs are complete.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let closed = self.close()?;
        let close = StageSummary::from_report(&closed, |s| *s);

        let extracted = self.extract()?;
        let mut extract = StageSummary::from_report(&extracted, |e| {
            if e.written.is_empty() && e.failed.is_empty() {
                TaskStatus::Skipped
            } else {
                TaskStatus::Done
            }
        });
        for e in extracted.successes() {
            for (id, err) in &e.failed {
                extract.failures.push(format!("{}_n{id:03}: {err}", e.coord));
            }
        }

        let assembled = self.assemble(None)?;
        let assemble = StageSummary::from_report(&assembled, |a| a.status);

        let lods = self.generate_lods(None)?;
        let lod = StageSummary::from_report(&lods, |l| l.status);

        let report = RunReport {
            stages: vec![close, extract, assemble, lod],
        };
        for stage in &report.stages {
            info!("{stage}");
        }
        if !report.is_success() {
            warn!(failures = report.failure_count(), "Run finished with failures");
        }
        Ok(report)
    }
}
