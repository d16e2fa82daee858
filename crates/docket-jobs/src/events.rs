//! Worker notifications.

use crate::error::JobError;
use crate::job::JobRecord;
use std::sync::Arc;
use std::time::Duration;

/// Event emitted by a [`Worker`](crate::Worker).
///
/// For every claimed job the worker emits `Dequeued`, then exactly one of
/// `Complete`, `Failed` or `Retried` (or `Error` if persisting that outcome
/// failed), then exactly one `Done`.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and dispatched.
    Dequeued { queue: String, job: JobRecord },

    /// A poll found no ready job.
    Empty { queue: String },

    /// A poll or a persistence step failed. Polling continues.
    Error { queue: String, error: Arc<JobError> },

    /// The handler succeeded and the job is complete.
    Complete { queue: String, job: JobRecord },

    /// The job failed with no retries left.
    Failed {
        queue: String,
        job: JobRecord,
        error: Arc<JobError>,
    },

    /// The job failed and was re-enqueued after `wait`.
    Retried {
        queue: String,
        job: JobRecord,
        wait: Duration,
        error: Arc<JobError>,
    },

    /// Resolution finished. Fires once per claimed job.
    Done { queue: String, job: JobRecord },

    /// A poll ran after the worker stopped, or the worker finished stopping.
    Stopped,
}

impl WorkerEvent {
    /// Event name as hosts know it.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Dequeued { .. } => "dequeued",
            WorkerEvent::Empty { .. } => "empty",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::Complete { .. } => "complete",
            WorkerEvent::Failed { .. } => "failed",
            WorkerEvent::Retried { .. } => "retried",
            WorkerEvent::Done { .. } => "done",
            WorkerEvent::Stopped => "stopped",
        }
    }

    /// Queue the event concerns.
    pub fn queue(&self) -> Option<&str> {
        match self {
            WorkerEvent::Dequeued { queue, .. }
            | WorkerEvent::Empty { queue }
            | WorkerEvent::Error { queue, .. }
            | WorkerEvent::Complete { queue, .. }
            | WorkerEvent::Failed { queue, .. }
            | WorkerEvent::Retried { queue, .. }
            | WorkerEvent::Done { queue, .. } => Some(queue),
            WorkerEvent::Stopped => None,
        }
    }

    /// Job snapshot carried by the event.
    pub fn job(&self) -> Option<&JobRecord> {
        match self {
            WorkerEvent::Dequeued { job, .. }
            | WorkerEvent::Complete { job, .. }
            | WorkerEvent::Failed { job, .. }
            | WorkerEvent::Retried { job, .. }
            | WorkerEvent::Done { job, .. } => Some(job),
            WorkerEvent::Empty { .. } | WorkerEvent::Error { .. } | WorkerEvent::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_event_accessors() {
        let job = JobRecord::new("mail", "send", Value::Null);
        let event = WorkerEvent::Done {
            queue: "mail".into(),
            job: job.clone(),
        };
        assert_eq!(event.name(), "done");
        assert_eq!(event.queue(), Some("mail"));
        assert_eq!(event.job(), Some(&job));

        let stopped = WorkerEvent::Stopped;
        assert_eq!(stopped.name(), "stopped");
        assert!(stopped.queue().is_none());
        assert!(stopped.job().is_none());
    }
}
