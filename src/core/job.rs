//! Per-job state machine.
//!
//! ```text
//! Submitted ──► Running ──► Completed(Success | Failure)
//! ```
//!
//! No cancellation, pause or resume; a completed job never changes again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RecordId;

/// How many completed jobs stay queryable in memory
const COMPLETED_HISTORY: usize = 1024;

/// How a completed job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Success,
    Failure,
}

/// Lifecycle state of one dispatched job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted and waiting for a worker slot
    Submitted,

    /// Holding a worker slot, extractor running
    Running,

    /// Outcome recorded, slot released
    Completed(Completion),
}

impl JobState {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Submitted, JobState::Running) | (JobState::Running, JobState::Completed(_))
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobState::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Unknown job: {0}")]
    NotFound(RecordId),

    #[error("Invalid job transition for {id}: {from:?} → {to:?}")]
    InvalidTransition {
        id: RecordId,
        from: JobState,
        to: JobState,
    },
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<RecordId, JobState>,

    /// Catalog record holding each job's outcome, once written
    records: HashMap<RecordId, RecordId>,

    completed: VecDeque<RecordId>,
}

/// In-memory table of job states, keyed by the job's queued record id
#[derive(Debug, Default)]
pub struct JobTable {
    inner: Mutex<Inner>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // State updates are single assignments; a poisoned table is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly submitted job
    pub fn submit(&self, id: RecordId) {
        self.lock().states.insert(id, JobState::Submitted);
    }

    /// Advance a job, enforcing the state machine
    pub fn advance(&self, id: RecordId, next: JobState) -> Result<(), JobError> {
        let mut inner = self.lock();
        let current = *inner.states.get(&id).ok_or(JobError::NotFound(id))?;

        if !current.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                id,
                from: current,
                to: next,
            });
        }

        inner.states.insert(id, next);

        if next.is_completed() {
            inner.completed.push_back(id);
            while inner.completed.len() > COMPLETED_HISTORY {
                if let Some(oldest) = inner.completed.pop_front() {
                    inner.states.remove(&oldest);
                    inner.records.remove(&oldest);
                }
            }
        }

        Ok(())
    }

    /// Note which catalog record holds the job's outcome. It differs from
    /// the job id when the outcome merged into an existing record.
    pub fn link_record(&self, id: RecordId, record: RecordId) {
        let mut inner = self.lock();
        if inner.states.contains_key(&id) {
            inner.records.insert(id, record);
        }
    }

    /// Drop a job that never reached a worker
    pub fn forget(&self, id: RecordId) {
        let mut inner = self.lock();
        inner.states.remove(&id);
        inner.records.remove(&id);
    }

    pub fn get(&self, id: RecordId) -> Option<JobState> {
        self.lock().states.get(&id).copied()
    }

    /// Catalog record holding the job's outcome, if written
    pub fn record(&self, id: RecordId) -> Option<RecordId> {
        self.lock().records.get(&id).copied()
    }
}
