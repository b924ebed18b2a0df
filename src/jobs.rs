//! In-process background job queue.
//!
//! A fixed number of workers pull job IDs from a FIFO channel; one worker
//! drives a job end-to-end. Progress is single-writer (only the owning
//! worker updates it). A handler error marks the job failed with the
//! captured message — there is no auto-retry and no mid-job cancellation;
//! the only exits are the terminal completed/failed states.
//!
//! Analysis handlers serialize per company through [`JobQueue::company_lock`]
//! so two concurrent runs for one company cannot interleave initiative
//! matching and creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ProcessDocument,
    RunAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;
    async fn execute(&self, job: &Job, queue: &JobQueue) -> anyhow::Result<()>;
}

struct QueueInner {
    jobs: Mutex<HashMap<String, Job>>,
    handlers: Mutex<HashMap<JobKind, Arc<dyn JobHandler>>>,
    tx: mpsc::UnboundedSender<String>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    company_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    changed: Notify,
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(QueueInner {
                jobs: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                company_locks: Mutex::new(HashMap::new()),
                changed: Notify::new(),
            }),
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        self.inner
            .handlers
            .lock()
            .unwrap()
            .insert(handler.kind(), handler);
    }

    /// Add a job to the FIFO queue.
    pub fn enqueue(&self, kind: JobKind, payload: serde_json::Value) -> Job {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            status: JobStatus::Pending,
            progress: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.inner
            .jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        // Receiver lives as long as the queue, so send cannot fail.
        let _ = self.inner.tx.send(job.id.clone());
        info!(job_id = %job.id, kind = ?kind, "job enqueued");
        job
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner.jobs.lock().unwrap().get(job_id).cloned()
    }

    /// Update a job's progress percentage (clamped to 0-100).
    pub fn update_progress(&self, job_id: &str, percent: u8) {
        if let Some(job) = self.inner.jobs.lock().unwrap().get_mut(job_id) {
            job.progress = percent.min(100);
        }
        self.inner.changed.notify_waiters();
    }

    /// The per-company mutex used to serialize analysis jobs.
    pub fn company_lock(&self, company_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .company_locks
            .lock()
            .unwrap()
            .entry(company_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Spawn `count` workers pulling from the queue.
    pub fn start_workers(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let queue = self.clone();
                tokio::spawn(async move {
                    queue.worker_loop(worker_id).await;
                })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: usize) {
        loop {
            let job_id = {
                let mut rx = self.inner.rx.lock().await;
                match rx.recv().await {
                    Some(id) => id,
                    None => break,
                }
            };

            let Some(job) = self.get(&job_id) else {
                continue;
            };

            let handler = {
                let handlers = self.inner.handlers.lock().unwrap();
                handlers.get(&job.kind).cloned()
            };
            let Some(handler) = handler else {
                error!(job_id = %job.id, kind = ?job.kind, "no handler registered");
                self.finish(&job_id, JobStatus::Failed, Some("no handler for job kind"));
                continue;
            };

            info!(worker_id, job_id = %job.id, kind = ?job.kind, "job started");
            self.mark_started(&job_id);

            match handler.execute(&job, self).await {
                Ok(()) => {
                    self.finish(&job_id, JobStatus::Completed, None);
                    info!(worker_id, job_id = %job.id, "job completed");
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(worker_id, job_id = %job.id, error = %message, "job failed");
                    self.finish(&job_id, JobStatus::Failed, Some(&message));
                }
            }
        }
    }

    fn mark_started(&self, job_id: &str) {
        if let Some(job) = self.inner.jobs.lock().unwrap().get_mut(job_id) {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
        }
        self.inner.changed.notify_waiters();
    }

    fn finish(&self, job_id: &str, status: JobStatus, error_message: Option<&str>) {
        if let Some(job) = self.inner.jobs.lock().unwrap().get_mut(job_id) {
            job.status = status;
            job.error_message = error_message.map(str::to_string);
            job.completed_at = Some(Utc::now());
            if status == JobStatus::Completed {
                job.progress = 100;
            }
        }
        self.inner.changed.notify_waiters();
    }

    /// Wait until a job reaches a terminal status.
    pub async fn wait(&self, job_id: &str) -> Option<Job> {
        loop {
            // Register interest before checking state so a notification
            // between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.inner.changed.notified());
            notified.as_mut().enable();
            match self.get(job_id) {
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) => notified.await,
                None => return None,
            }
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FlakyHandler;

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn kind(&self) -> JobKind {
            JobKind::ProcessDocument
        }

        async fn execute(&self, job: &Job, queue: &JobQueue) -> anyhow::Result<()> {
            queue.update_progress(&job.id, 50);
            if job.payload["fail"].as_bool().unwrap_or(false) {
                anyhow::bail!("simulated failure")
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn jobs_complete_and_fail_with_messages() {
        let queue = JobQueue::new();
        queue.register_handler(Arc::new(FlakyHandler));
        let workers = queue.start_workers(2);

        let ok = queue.enqueue(JobKind::ProcessDocument, serde_json::json!({"fail": false}));
        let bad = queue.enqueue(JobKind::ProcessDocument, serde_json::json!({"fail": true}));

        let ok_done = queue.wait(&ok.id).await.unwrap();
        assert_eq!(ok_done.status, JobStatus::Completed);
        assert_eq!(ok_done.progress, 100);
        assert!(ok_done.started_at.is_some());
        assert!(ok_done.completed_at.is_some());

        let bad_done = queue.wait(&bad.id).await.unwrap();
        assert_eq!(bad_done.status, JobStatus::Failed);
        assert!(bad_done.error_message.as_deref().unwrap().contains("simulated failure"));

        for w in workers {
            w.abort();
        }
    }

    #[tokio::test]
    async fn unhandled_kind_fails_job() {
        let queue = JobQueue::new();
        let workers = queue.start_workers(1);
        let job = queue.enqueue(JobKind::RunAnalysis, serde_json::json!({}));
        let done = queue.wait(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Failed);
        for w in workers {
            w.abort();
        }
    }

    /// Handler that takes the per-company lock and tracks concurrent entry.
    struct SerializedHandler {
        active: Arc<AtomicUsize>,
        max_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for SerializedHandler {
        fn kind(&self) -> JobKind {
            JobKind::RunAnalysis
        }

        async fn execute(&self, job: &Job, queue: &JobQueue) -> anyhow::Result<()> {
            let company = job.payload["company_id"].as_str().unwrap().to_string();
            let lock = queue.company_lock(&company);
            let _guard = lock.lock().await;

            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn same_company_jobs_serialize() {
        let queue = JobQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        queue.register_handler(Arc::new(SerializedHandler {
            active: active.clone(),
            max_seen: max_seen.clone(),
        }));
        let workers = queue.start_workers(3);

        let jobs: Vec<Job> = (0..3)
            .map(|_| queue.enqueue(JobKind::RunAnalysis, serde_json::json!({"company_id": "co1"})))
            .collect();
        for job in &jobs {
            let done = queue.wait(&job.id).await.unwrap();
            assert_eq!(done.status, JobStatus::Completed);
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "same-company jobs overlapped");
        for w in workers {
            w.abort();
        }
    }
}
