//! Background job primitives
//!
//! Jobs are grouped by category. Each category has one `WorkerSlot`: starting
//! a job cancels and joins the previous one of the same category first, so at
//! most one worker per category is ever in flight. Workers poll a
//! `CancelToken`; results carry `(category, job_id)` so the owner can drop
//! anything produced by a superseded job.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::{OfflineError, OfflineResult};

/// Unique job identifier
pub type JobId = u64;

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next process-wide job id (monotonic)
pub fn next_job_id() -> JobId {
    JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Logical job category. One worker per category at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobCategory {
    /// File decode or host buffer, followed by full analysis
    Load,
    /// Re-analysis of the current project
    Analyze,
    /// Re-segmentation of the current project
    Segment,
    /// Full-project vocoder render
    Render,
    /// Incremental resynthesis of dirty regions
    Resynthesize,
    ModelReload,
}

impl JobCategory {
    pub const ALL: [JobCategory; 6] = [
        JobCategory::Load,
        JobCategory::Analyze,
        JobCategory::Segment,
        JobCategory::Render,
        JobCategory::Resynthesize,
        JobCategory::ModelReload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobCategory::Load => "load",
            JobCategory::Analyze => "analyze",
            JobCategory::Segment => "segment",
            JobCategory::Render => "render",
            JobCategory::Resynthesize => "resynthesize",
            JobCategory::ModelReload => "model-reload",
        }
    }

    /// Categories that occupy the inference models
    pub fn uses_inference(&self) -> bool {
        !matches!(self, JobCategory::Render)
    }
}

impl fmt::Display for JobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> OfflineResult<()> {
        if self.is_cancelled() {
            Err(OfflineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Progress report: fraction in `[0, 1]` plus a stage label
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub fraction: f64,
    pub stage: String,
}

impl Progress {
    pub fn new(fraction: f64, stage: impl Into<String>) -> Self {
        Self {
            fraction: fraction.clamp(0.0, 1.0),
            stage: stage.into(),
        }
    }
}

/// Drops progress updates that would move backwards
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressGate {
    last: Option<f64>,
}

impl ProgressGate {
    /// Returns the clamped fraction if it does not regress
    pub fn admit(&mut self, fraction: f64) -> Option<f64> {
        let value = fraction.clamp(0.0, 1.0);
        match self.last {
            Some(last) if value < last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

struct RunningJob {
    id: JobId,
    token: CancelToken,
    handle: JoinHandle<()>,
}

/// Single-flight worker for one category
pub struct WorkerSlot {
    category: JobCategory,
    current: Option<RunningJob>,
}

impl WorkerSlot {
    pub fn new(category: JobCategory) -> Self {
        Self {
            category,
            current: None,
        }
    }

    pub fn category(&self) -> JobCategory {
        self.category
    }

    /// Cancel the previous job of this category, wait for it, then spawn
    /// `body` on a fresh thread with a fresh token.
    pub fn start<F>(&mut self, id: JobId, body: F) -> OfflineResult<CancelToken>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        self.cancel_and_join();

        let token = CancelToken::new();
        let worker_token = token.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rf-{}-{}", self.category, id))
            .spawn(move || body(worker_token))?;

        log::debug!("Started {} job {}", self.category, id);
        self.current = Some(RunningJob {
            id,
            token: token.clone(),
            handle,
        });
        Ok(token)
    }

    /// Request cancellation without waiting. Returns the affected job id.
    pub fn cancel(&self) -> Option<JobId> {
        self.current.as_ref().map(|job| {
            job.token.cancel();
            job.id
        })
    }

    /// Cancel the running job and wait for its thread
    pub fn cancel_and_join(&mut self) -> Option<JobId> {
        let job = self.current.take()?;
        job.token.cancel();
        if job.handle.join().is_err() {
            log::error!("{} job {} panicked", self.category, job.id);
        }
        Some(job.id)
    }

    /// Join the worker if its thread already finished
    pub fn reap(&mut self) {
        if self.current.as_ref().is_some_and(|j| j.handle.is_finished()) {
            self.cancel_and_join();
        }
    }

    /// Worker thread still running
    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|j| !j.handle.is_finished())
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.current.as_ref().map(|j| j.id)
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.cancel_and_join();
    }
}
