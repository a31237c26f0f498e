//! Bounded worker pool for download jobs.
//!
//! Every accepted submission is executed on the pool; `submit` never runs a
//! fetch on the caller's task. Catalog calls run on the blocking pool. A single dispatch loop takes jobs off an
//! unbounded channel in submission order and waits for a worker slot (a
//! semaphore permit) before starting each one, so start order always matches
//! submission order while at most `pool_size` fetches run at once.
//!
//! ```text
//! submit ──► store.enqueue ──► channel ──► dispatch loop ──permit──► worker
//!                                                                    │
//!                    store.record_attempt ◄── extractor.fetch ◄──────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use super::job::{Completion, JobState, JobTable};
use crate::adapters::Extractor;
use crate::domain::{DownloadRequest, FetchOutcome, RecordId, SettingsOverrides};
use crate::store::{blocking, effective_settings, CatalogStore, StoreError};

/// Dispatcher settings fixed at startup
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum concurrent fetches (values below 1 are raised to 1)
    pub pool_size: usize,

    /// Optional limit on a single fetch; the fetch fails when exceeded
    pub fetch_timeout: Option<Duration>,

    /// Directory the output template is resolved against
    pub downloads_dir: PathBuf,

    /// Setting overrides captured from the environment
    pub overrides: SettingsOverrides,

    /// Session id stamped on queued records (see [`crate::store::Session`])
    pub owner: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            fetch_timeout: None,
            downloads_dir: PathBuf::from("downloads"),
            overrides: SettingsOverrides::default(),
            owner: None,
        }
    }
}

/// Result of handing a request to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmitResult {
    /// Queued record created; the job will run on the pool
    Accepted { id: RecordId },

    /// Nothing was created
    Rejected { reason: String },
}

impl SubmitResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// A job travelling from `submit` to a worker
#[derive(Debug)]
struct Job {
    id: RecordId,
    request: DownloadRequest,
}

/// Counters and job states shared by the dispatcher handle and its workers
#[derive(Debug)]
struct Shared {
    permits: Arc<Semaphore>,
    jobs: JobTable,
    pending: AtomicUsize,
    running: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn job_finished(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Decrements the pending count however the worker exits
struct PendingGuard(Arc<Shared>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.job_finished();
    }
}

/// Tracks the running count for the lifetime of a worker slot
struct RunningGuard(Arc<Shared>);

impl RunningGuard {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Everything a worker needs
struct WorkerContext {
    store: Arc<dyn CatalogStore>,
    extractor: Arc<dyn Extractor>,
    config: DispatcherConfig,
    shared: Arc<Shared>,
}

/// Owns the worker pool and the dispatch loop
pub struct WorkDispatcher {
    store: Arc<dyn CatalogStore>,
    shared: Arc<Shared>,
    pool_size: usize,
    owner: Option<String>,

    /// Taken on shutdown; `None` means no new jobs are accepted
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,

    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

impl WorkDispatcher {
    /// Start the dispatch loop. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn CatalogStore>,
        extractor: Arc<dyn Extractor>,
        mut config: DispatcherConfig,
    ) -> Self {
        if config.pool_size == 0 {
            warn!("Pool size 0 is not usable, using 1");
            config.pool_size = 1;
        }
        let pool_size = config.pool_size;
        let owner = config.owner.clone();

        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(pool_size)),
            jobs: JobTable::new(),
            pending: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            store: Arc::clone(&store),
            extractor,
            config,
            shared: Arc::clone(&shared),
        });
        let dispatch_loop = tokio::spawn(dispatch_loop(receiver, context));

        info!(pool_size, "Work dispatcher started");

        Self {
            store,
            shared,
            pool_size,
            owner,
            sender: Mutex::new(Some(sender)),
            dispatch_loop: Mutex::new(Some(dispatch_loop)),
        }
    }

    /// Accept a request and hand it to the pool.
    ///
    /// Returns as soon as the queued record exists. Store failures while
    /// creating that record are returned as errors; malformed requests and
    /// submissions after shutdown are `Rejected`.
    #[instrument(skip(self, request), fields(url = %request.url))]
    pub async fn submit(&self, request: DownloadRequest) -> Result<SubmitResult, StoreError> {
        if let Err(e) = request.validate() {
            warn!("Rejected submission: {}", e);
            return Ok(SubmitResult::Rejected {
                reason: e.to_string(),
            });
        }

        // The clone keeps the loop draining until this job is sent, even if
        // shutdown starts while the record is written
        let Some(sender) = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return Ok(SubmitResult::Rejected {
                reason: "dispatcher is shutting down".to_string(),
            });
        };

        let owner = self.owner.clone();
        let queued = request.clone();
        let record = blocking(&self.store, move |store| {
            store.enqueue(&queued, owner.as_deref())
        })
        .await?;
        let id = record.id;
        self.shared.jobs.submit(id);
        self.shared.pending.fetch_add(1, Ordering::SeqCst);

        if sender.send(Job { id, request: request.clone() }).is_err() {
            // Dispatch loop is gone: resolve the record instead of leaving it queued
            error!(id, "Dispatch loop stopped, failing job");
            self.shared.jobs.forget(id);
            self.shared.job_finished();
            let outcome = FetchOutcome::failure("dispatcher stopped before the job could run");
            blocking(&self.store, move |store| {
                store.record_attempt(id, &request, &outcome)
            })
            .await?;
            return Ok(SubmitResult::Rejected {
                reason: "dispatcher is not running".to_string(),
            });
        }

        info!(id, "Download accepted");
        Ok(SubmitResult::Accepted { id })
    }

    /// Maximum number of concurrent fetches
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Jobs currently holding a worker slot
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Accepted jobs not yet completed (waiting or running)
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Worker slots not currently in use
    pub fn available_slots(&self) -> usize {
        self.shared.permits.available_permits()
    }

    /// State of a job by its queued record id (recent jobs only)
    pub fn job_state(&self, id: RecordId) -> Option<JobState> {
        self.shared.jobs.get(id)
    }

    /// Catalog record holding a finished job's outcome.
    ///
    /// Differs from the job id when the download merged into an existing
    /// record with the same extractor key.
    pub fn resolved_record(&self, id: RecordId) -> Option<RecordId> {
        self.shared.jobs.record(id)
    }

    /// Wait until every accepted job has completed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, finish queued and running ones, join the loop
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(sender);

        let handle = self
            .dispatch_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            info!(pending = self.pending(), "Draining work dispatcher");
            if let Err(e) = handle.await {
                error!("Dispatch loop ended abnormally: {}", e);
            }
        }
        info!("Work dispatcher stopped");
    }
}

/// Start jobs in arrival order, one permit each
async fn dispatch_loop(mut receiver: mpsc::UnboundedReceiver<Job>, context: Arc<WorkerContext>) {
    let mut workers = JoinSet::new();

    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&context.shared.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Worker semaphore closed, stopping dispatch loop");
                break;
            }
        };

        while let Some(finished) = workers.try_join_next() {
            log_worker_exit(finished);
        }

        workers.spawn(run_job(Arc::clone(&context), job, permit));
    }

    while let Some(finished) = workers.join_next().await {
        log_worker_exit(finished);
    }
    debug!("Dispatch loop drained");
}

fn log_worker_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Worker task ended abnormally: {}", e);
    }
}

/// Execute one job inside its worker slot
#[instrument(skip_all, fields(job = job.id, url = %job.request.url))]
async fn run_job(context: Arc<WorkerContext>, job: Job, permit: OwnedSemaphorePermit) {
    // Dropped in reverse: slot, running count, then pending (wakes idle waiters)
    let _pending = PendingGuard(Arc::clone(&context.shared));
    let _running = RunningGuard::enter(&context.shared);
    let _permit = permit;

    if let Err(e) = context.shared.jobs.advance(job.id, JobState::Running) {
        warn!("{}", e);
    }

    let started = Instant::now();
    let outcome = fetch_with_limits(&context, &job.request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let completion = match &outcome {
        FetchOutcome::Success { entries } if !entries.is_empty() => {
            let first = &entries[0];
            info!(
                extractor = %first.extractor,
                online_id = %first.online_id,
                entries = entries.len(),
                elapsed_ms,
                "Download succeeded"
            );
            Completion::Success
        }
        FetchOutcome::Success { .. } => {
            warn!(elapsed_ms, "Download produced no entries");
            Completion::Failure
        }
        FetchOutcome::Failure { message } => {
            warn!(elapsed_ms, "Download failed: {}", message);
            Completion::Failure
        }
    };

    let (id, request) = (job.id, job.request);
    let recorded = blocking(&context.store, move |store| {
        store.record_attempt(id, &request, &outcome)
    })
    .await;

    match recorded {
        Ok(record) => {
            context.shared.jobs.link_record(id, record.id);
            debug!(record = record.id, status = %record.status, "Outcome recorded");
        }
        Err(e) => error!("Failed to record outcome: {}", e),
    }

    if let Err(e) = context
        .shared
        .jobs
        .advance(id, JobState::Completed(completion))
    {
        warn!("{}", e);
    }
}

/// Resolve options, run the extractor in its own task, apply the timeout.
///
/// Panics and timeouts inside the extractor become failure outcomes.
async fn fetch_with_limits(context: &WorkerContext, request: &DownloadRequest) -> FetchOutcome {
    let overrides = context.config.overrides.clone();
    let settings = blocking(&context.store, move |store| effective_settings(store, &overrides)).await;
    let options = match settings {
        Ok((settings, _)) => {
            settings.fetch_options(request.format.as_deref(), &context.config.downloads_dir)
        }
        Err(e) => return FetchOutcome::failure(format!("could not load settings: {}", e)),
    };

    let extractor = Arc::clone(&context.extractor);
    let url = request.url.clone();
    let mut task = tokio::spawn(async move { extractor.fetch(&url, &options).await });

    let joined = match context.config.fetch_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                // Dropping the extractor future kills its subprocess
                task.abort();
                return FetchOutcome::failure(format!(
                    "fetch timed out after {}s",
                    limit.as_secs_f64()
                ));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => FetchOutcome::failure("extractor task panicked"),
        Err(e) => FetchOutcome::failure(format!("extractor task was cancelled: {}", e)),
    }
}
