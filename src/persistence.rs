//! Persistent-queue plugin interface (spec.md §4.5).
//!
//! The C source wires this up as four function-pointer fields; per §9's
//! "replace function-pointer fields with a trait" guidance this is a Rust
//! trait instead. `replay`'s callback argument (`add_fn`) becomes a plain
//! return value (`Vec<ReplayedJob>`) rather than a callback invoked once per
//! row — a server with a million queued jobs is expected to size its
//! startup replay accordingly, the same way the source's `add_fn` is called
//! once per row into the same in-memory table either way.
//!
//! Trait methods return boxed futures explicitly (no `async-trait`
//! dependency) so `Arc<dyn PersistentQueue>` stays object-safe; `async fn`
//! in a trait cannot be called through a trait object without this.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::Error;
use crate::wire::message::Priority;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// One row recovered by `replay`, reinstated into the model exactly as a
/// fresh `SUBMIT_JOB` would have created it (minus the submitting client,
/// which is long gone by restart).
#[derive(Clone, Debug)]
pub struct ReplayedJob {
    pub function: Bytes,
    pub unique: Bytes,
    pub data: Bytes,
    pub priority: Priority,
}

pub trait PersistentQueue: Send + Sync {
    /// Called after a SUBMIT succeeds and before JOB_CREATED is sent.
    /// Failure means the server must not create the job (§7: reply
    /// `QueueError`, drop the submission, keep the connection).
    fn add<'a>(
        &'a self,
        function: &'a [u8],
        unique: &'a [u8],
        data: &'a [u8],
        priority: Priority,
    ) -> BoxFuture<'a, ()>;

    /// Called on WORK_COMPLETE for a persisted job. Idempotent on the
    /// storage side per spec.md §4.5.
    fn done<'a>(&'a self, function: &'a [u8], unique: &'a [u8]) -> BoxFuture<'a, ()>;

    /// Reserved for batching backends; most implementations no-op.
    fn flush(&self) -> BoxFuture<'_, ()>;

    /// Called once at startup, after the in-memory model is empty. A
    /// failure here aborts startup (§7: "refusing to serve a partial queue
    /// silently").
    fn replay(&self) -> BoxFuture<'_, Vec<ReplayedJob>>;
}

/// The no-op backend used when no persistence backend is configured.
#[derive(Debug, Default)]
pub struct NullQueue;

impl PersistentQueue for NullQueue {
    fn add<'a>(
        &'a self,
        _function: &'a [u8],
        _unique: &'a [u8],
        _data: &'a [u8],
        _priority: Priority,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn done<'a>(&'a self, _function: &'a [u8], _unique: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn replay(&self) -> BoxFuture<'_, Vec<ReplayedJob>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_queue_add_and_replay_are_noops() {
        let q = NullQueue;
        q.add(b"f", b"u", b"d", Priority::Normal).await.unwrap();
        q.done(b"f", b"u").await.unwrap();
        q.flush().await.unwrap();
        assert!(q.replay().await.unwrap().is_empty());
    }
}
