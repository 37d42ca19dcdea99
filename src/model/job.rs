//! The `Job` entity (spec.md §3 "Job").

use bytes::Bytes;
use tokio::time::Instant;

use crate::connection::ConnectionId;
use crate::wire::message::Priority;

/// Internal arena key for a job. Distinct from the wire-visible handle
/// string (`H:<prefix>:<counter>`), which is derived from this id plus the
/// server's handle prefix — see `model::Model::handle_for`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Placement {
    /// Sitting in its function's priority sublist, not yet grabbed.
    Queued,
    /// Handed to a worker; its progress counters are live.
    Assigned { worker: ConnectionId },
}

#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    /// The wire-visible `H:<prefix>:<counter>` string, computed once at
    /// creation time and carried alongside the arena key so responses never
    /// need to re-derive it.
    pub handle: Bytes,
    pub function: Bytes,
    /// Empty when the client submitted no de-dup key.
    pub unique: Bytes,
    pub priority: Priority,
    pub data: Bytes,
    pub background: bool,
    pub placement: Placement,
    /// Foreground subscribers; always empty for background jobs.
    pub subscribers: Vec<ConnectionId>,
    pub numerator: u32,
    pub denominator: u32,
    pub created: Instant,

    pub reserves: u64,
    pub timeouts: u64,
    pub releases: u64,
    pub buries: u64,
    pub kicks: u64,

    /// Set when this job was submitted through a configured persistence
    /// backend, so `WORK_COMPLETE`/`WORK_FAIL` know to call `done`.
    pub persisted: bool,
}

impl Job {
    pub fn is_queued(&self) -> bool {
        matches!(self.placement, Placement::Queued)
    }

    pub fn assigned_worker(&self) -> Option<ConnectionId> {
        match self.placement {
            Placement::Assigned { worker } => Some(worker),
            Placement::Queued => None,
        }
    }
}
