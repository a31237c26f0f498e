//! Job execution: the work dispatcher and per-job state.

pub mod dispatcher;
pub mod job;

pub use dispatcher::{DispatcherConfig, SubmitResult, WorkDispatcher};
pub use job::{Completion, JobError, JobState, JobTable};
