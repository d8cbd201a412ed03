//! Background jobs with explicit handles.
//!
//! Each logical stream (`enrich`, `sync`) runs at most one job at a time.
//! Starting a job cancels the stream's previous job through its token,
//! waits a short grace period, and then spawns the new job with a fresh
//! token. Cancellation is cooperative: jobs check their token between pages
//! or groups and never abort an in-flight upstream call.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStream {
    Enrich,
    Sync,
}

impl fmt::Display for JobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStream::Enrich => write!(f, "enrich"),
            JobStream::Sync => write!(f, "sync"),
        }
    }
}

impl FromStr for JobStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrich" => Ok(Self::Enrich),
            "sync" => Ok(Self::Sync),
            other => Err(format!("unknown job stream: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub id: Uuid,
    pub stream: JobStream,
    pub state: JobState,
    pub processed: usize,
    pub total: usize,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Write side of a job's progress, handed to the job body.
#[derive(Debug, Clone)]
pub struct JobReporter {
    tx: Arc<watch::Sender<JobProgress>>,
}

impl JobReporter {
    pub fn set_total(&self, total: usize) {
        self.tx.send_modify(|p| p.total = total);
    }

    pub fn advance(&self, n: usize) {
        self.tx.send_modify(|p| p.processed += n);
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|p| p.message = Some(message));
    }

    fn finish(&self, state: JobState, message: Option<String>) {
        self.tx.send_modify(|p| {
            p.state = state;
            p.finished_at = Some(Utc::now());
            if message.is_some() {
                p.message = message;
            }
        });
    }
}

/// Read side of a running or finished job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    stream: JobStream,
    token: CancellationToken,
    progress: watch::Receiver<JobProgress>,
}

impl JobHandle {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn stream(&self) -> JobStream {
        self.stream
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.progress.borrow().state == JobState::Running
    }

    /// Waits for the job to reach a final state and returns its last progress.
    pub async fn wait(&self) -> JobProgress {
        let mut rx = self.progress.clone();
        if let Ok(p) = rx.wait_for(|p| p.state != JobState::Running).await {
            return p.clone();
        }
        // The job task went away without reporting (panic or runtime shutdown).
        let mut last = rx.borrow().clone();
        last.state = JobState::Failed;
        last.message = Some("job ended without reporting a result".to_string());
        last
    }
}

#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobStream, JobHandle>>,
    grace: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE)
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            grace,
        }
    }

    /// Starts `job` on `stream`, cancelling the stream's running job first.
    ///
    /// The job body receives its own cancellation token and a progress
    /// reporter. `Ok` finishes the job as completed (or cancelled, when its
    /// token was cancelled); `Err` finishes it as failed with the message.
    pub async fn start<F, Fut>(&self, stream: JobStream, job: F) -> JobHandle
    where
        F: FnOnce(CancellationToken, JobReporter) -> Fut,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        if let Some(prior) = jobs.get(&stream).filter(|h| h.is_running()) {
            tracing::info!(%stream, job_id = %prior.id, "cancelling prior job");
            prior.cancel();
            tokio::time::sleep(self.grace).await;
        }

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (tx, rx) = watch::channel(JobProgress {
            id,
            stream,
            state: JobState::Running,
            processed: 0,
            total: 0,
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        let reporter = JobReporter { tx: Arc::new(tx) };

        let body = job(token.clone(), reporter.clone());
        let task_token = token.clone();
        tokio::spawn(async move {
            let result = body.await;
            match result {
                Ok(()) if task_token.is_cancelled() => {
                    tracing::info!(%stream, job_id = %id, "job cancelled");
                    reporter.finish(JobState::Cancelled, None);
                }
                Ok(()) => {
                    tracing::info!(%stream, job_id = %id, "job completed");
                    reporter.finish(JobState::Completed, None);
                }
                Err(message) => {
                    tracing::warn!(%stream, job_id = %id, error = %message, "job failed");
                    reporter.finish(JobState::Failed, Some(message));
                }
            }
        });

        let handle = JobHandle {
            id,
            stream,
            token,
            progress: rx,
        };
        jobs.insert(stream, handle.clone());
        tracing::info!(%stream, job_id = %id, "job started");
        handle
    }

    /// Latest handle for `stream`, running or finished.
    pub async fn handle(&self, stream: JobStream) -> Option<JobHandle> {
        self.jobs.lock().await.get(&stream).cloned()
    }

    pub async fn status(&self, stream: JobStream) -> Option<JobProgress> {
        self.handle(stream).await.map(|h| h.progress())
    }

    /// Signals every running job to stop. Used on shutdown.
    pub async fn cancel_all(&self) {
        for handle in self.jobs.lock().await.values() {
            if handle.is_running() {
                handle.cancel();
            }
        }
    }
}
