//! The `Function` entity (spec.md §3 "Function").

use std::collections::{HashSet, VecDeque};

use bytes::Bytes;

use super::job::JobId;
use crate::connection::ConnectionId;
use crate::wire::message::Priority;

#[derive(Debug, Default)]
pub struct Function {
    pub name: Bytes,
    /// One FIFO per priority; index via `Priority::as_index`.
    queues: [VecDeque<JobId>; Priority::COUNT],
    /// Connections that have sent `CAN_DO` for this function, for the
    /// admin `workers` listing. Acquisition order is tracked per-connection
    /// (see `connection::Connection::registrations`), not here.
    pub workers: HashSet<ConnectionId>,
    /// Workers currently in `PRE_SLEEP` waiting on this function.
    pub sleeping: HashSet<ConnectionId>,
    pub total_jobs: u64,
    pub cmd_delete: u64,
    pub pause_until: Option<tokio::time::Instant>,
    /// Set by the admin `maxqueue` command; informational only (surfaced
    /// via `status`), not enforced against `push` — spec.md names no
    /// rejection behavior for an over-cap submission.
    pub max_queue: Option<usize>,
}

impl Function {
    pub fn new(name: Bytes) -> Self {
        Function {
            name,
            ..Default::default()
        }
    }

    pub fn push(&mut self, priority: Priority, job: JobId) {
        self.queues[priority.as_index()].push_back(job);
    }

    /// Removes and returns the highest-priority job ready to run, honoring
    /// pause (spec.md admin `pause-tube`-equivalent semantics carried over
    /// from the ambient admin console).
    pub fn pop(&mut self) -> Option<JobId> {
        if self.is_paused() {
            return None;
        }
        for pri in Priority::ALL {
            if let Some(job) = self.queues[pri.as_index()].pop_front() {
                return Some(job);
            }
        }
        None
    }

    /// Re-inserts a job at the tail of its priority sublist, as happens
    /// when a worker holding it disconnects (spec.md §4.3 "Loss of a worker
    /// holding a job").
    pub fn requeue(&mut self, priority: Priority, job: JobId) {
        self.queues[priority.as_index()].push_back(job);
    }

    /// Removes a specific job from whichever priority sublist holds it,
    /// used to undo a submission when persisting it failed. Returns
    /// whether the job was found.
    pub fn remove_queued(&mut self, job: JobId) -> bool {
        for queue in &mut self.queues {
            if let Some(pos) = queue.iter().position(|&j| j == job) {
                queue.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn queue_len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn len_at(&self, priority: Priority) -> usize {
        self.queues[priority.as_index()].len()
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.pause_until, Some(until) if until > tokio::time::Instant::now())
    }
}
