//! Bounded worker pool that runs pipeline stages as barrier-terminated waves.
//!
//! Workers are long-lived OS threads fed through a `crossbeam-channel`
//! queue. [`WorkerPool::run_stage`] submits one wave of independent tasks and
//! blocks until every one of them has reported, which is the barrier between
//! stages. A failing or panicking task is recorded in the report and never
//! stops its siblings.

use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use tracing::{debug, error, info};

use crate::error::PipelineError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// One unit of work in a stage, with a human-readable label.
pub struct Task<T> {
    label: String,
    work: Box<dyn FnOnce() -> Result<T, PipelineError> + Send + 'static>,
}

impl<T> Task<T> {
    /// Wraps `work` as a task named `label`.
    pub fn new(
        label: impl Into<String>,
        work: impl FnOnce() -> Result<T, PipelineError> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            work: Box::new(work),
        }
    }
}

/// The result of one task.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    /// Label of the task.
    pub task: String,
    /// What the task returned.
    pub result: Result<T, PipelineError>,
}

/// Results of one stage, in submission order.
#[derive(Debug)]
pub struct StageReport<T> {
    /// Stage name.
    pub stage: &'static str,
    /// One outcome per submitted task.
    pub outcomes: Vec<TaskOutcome<T>>,
}

impl<T> StageReport<T> {
    /// Successful task results.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Failed tasks with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.task.as_str(), e)))
    }

    /// Number of failed tasks.
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Returns true if every task succeeded.
    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }
}

/// Runs `work`, converting a panic into [`PipelineError::TaskPanicked`].
pub(crate) fn catch_task<T>(
    label: &str,
    work: impl FnOnce() -> Result<T, PipelineError>,
) -> Result<T, PipelineError> {
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(task = label, %message, "Task panicked");
            Err(PipelineError::TaskPanicked {
                task: label.to_string(),
                message,
            })
        }
    }
}

/// A fixed set of single-threaded workers.
///
/// Dropping the pool closes the queue and joins every worker.
pub struct WorkerPool {
    sender: Option<crossbeam_channel::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers (at least one), named `axon-worker-N`.
    pub fn new(count: usize) -> Result<Self, PipelineError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let count = count.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let rx = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("axon-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(PipelineError::Spawn)?;
            workers.push(handle);
        }
        debug!(workers = count, "Worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs every task of one stage and waits for all of them.
    ///
    /// Tasks may execute in any order and in parallel; outcomes are returned
    /// in submission order.
    pub fn run_stage<T: Send + 'static>(
        &self,
        stage: &'static str,
        tasks: Vec<Task<T>>,
    ) -> StageReport<T> {
        let total = tasks.len();
        info!(stage, tasks = total, "Stage started");

        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let mut labels = Vec::with_capacity(total);
        for (index, Task { label, work }) in tasks.into_iter().enumerate() {
            labels.push(label.clone());
            let tx = result_tx.clone();
            let job: Job = Box::new(move || {
                let result = catch_task(&label, work);
                let _ = tx.send((index, result));
            });
            if let Some(sender) = &self.sender {
                // A send error hands the job back; dropping it releases its
                // result sender so the barrier below still completes.
                let _ = sender.send(job);
            }
        }
        drop(result_tx);

        let mut results: Vec<Option<Result<T, PipelineError>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        while let Ok((index, result)) = result_rx.recv() {
            results[index] = Some(result);
        }

        let outcomes: Vec<TaskOutcome<T>> = labels
            .into_iter()
            .zip(results)
            .map(|(task, result)| {
                let result = result.unwrap_or_else(|| Err(PipelineError::PoolClosed(task.clone())));
                TaskOutcome { task, result }
            })
            .collect();

        let report = StageReport { stage, outcomes };
        info!(
            stage,
            tasks = total,
            failed = report.failure_count(),
            "Stage finished"
        );
        report
    }

    /// Closes the queue and joins every worker.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
