//! The core job-lifecycle engine (spec.md §4.3): submission, acquisition,
//! pre-sleep/wake, progress fan-out, and the connection-loss cleanups.
//!
//! Split into two layers the way the component table separates "Server job
//! model" from persistence: [`Model`] is the plain, synchronous data
//! structure (functions, jobs, the unique index, connections) — every
//! method on it completes without an `.await`, so a lock guard around it
//! is never held across I/O (§I8). [`Engine`] wraps a `Model` behind a
//! `tokio::sync::Mutex` and owns the `PersistentQueue`, and is the thing
//! `dispatch` actually calls: its async methods lock, mutate, unlock, then
//! await persistence outside the lock.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::function::Function;
use super::job::{Job, JobId, Placement};
use crate::connection::{Connection, ConnectionId};
use crate::error::Error;
use crate::persistence::{PersistentQueue, ReplayedJob};
use crate::wire::message::{Priority, Response};

/// Outcome of a submission, before persistence is consulted.
pub enum SubmitOutcome {
    /// The (function, unique) pair already had a live job; the caller is
    /// now a subscriber of it. No persistence call is needed.
    Coalesced { handle: Bytes },
    /// A new job was created and enqueued. The caller must await
    /// `PersistentQueue::add` before replying `JOB_CREATED`.
    Created { job_id: JobId, handle: Bytes },
}

/// The synchronous job-model state. See module docs for why no method here
/// is `async`.
#[derive(Debug)]
pub struct Model {
    functions: HashMap<Bytes, Function>,
    jobs: HashMap<JobId, Job>,
    unique_index: HashMap<(Bytes, Bytes), JobId>,
    /// O(1) handle → id lookup for `GET_STATUS` and the `WORK_*` family,
    /// which all address a job by its wire-visible handle string.
    handle_index: HashMap<Bytes, JobId>,
    connections: HashMap<ConnectionId, Connection>,
    next_seq: u64,
    handle_prefix: String,
    draining: bool,
}

impl Model {
    pub fn new(handle_prefix: impl Into<String>) -> Self {
        Model {
            functions: HashMap::new(),
            jobs: HashMap::new(),
            unique_index: HashMap::new(),
            handle_index: HashMap::new(),
            connections: HashMap::new(),
            next_seq: 1,
            handle_prefix: handle_prefix.into(),
            draining: false,
        }
    }

    fn next_handle(&mut self) -> (JobId, Bytes) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = JobId(seq);
        let handle = Bytes::from(format!("H:{}:{}", self.handle_prefix, seq));
        (id, handle)
    }

    fn function_mut(&mut self, name: &Bytes) -> &mut Function {
        self.functions
            .entry(name.clone())
            .or_insert_with(|| Function::new(name.clone()))
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Jobs still tracked (queued or assigned) — zero means a graceful
    /// drain has nothing left in flight.
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Stops accepting new submissions (§I5 graceful shutdown). Already
    /// queued and assigned work is left untouched; `dispatch` is
    /// responsible for rejecting further `SUBMIT_JOB*` while this is set.
    pub fn begin_drain(&mut self) {
        self.draining = true;
    }

    pub fn register_connection(&mut self, conn: Connection) {
        self.connections.insert(conn.id, conn);
    }

    /// Releases everything a connection owned: requeues any job it held as
    /// a worker (§4.3 "Loss of a worker holding a job"), drops it as a
    /// subscriber of anything it was watching as a client (§4.3 "Loss of a
    /// subscribing client"), and removes its worker registrations.
    pub fn release_connection(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };

        for job_id in &conn.assigned_jobs {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.placement = Placement::Queued;
                job.numerator = 0;
                job.denominator = 0;
                if let Some(function) = self.functions.get_mut(&job.function) {
                    // I6: requeue at the tail, ahead of anything submitted
                    // afterwards — ordering among already-queued work is
                    // what matters, not physical head-of-list position.
                    function.requeue(job.priority, *job_id);
                }
            }
        }

        for job_id in &conn.watched_jobs {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.subscribers.retain(|&c| c != id);
            }
        }

        for function_name in &conn.registrations {
            if let Some(function) = self.functions.get_mut(function_name) {
                function.workers.remove(&id);
                function.sleeping.remove(&id);
            }
        }
    }

    pub fn can_do(&mut self, from: ConnectionId, function: Bytes) {
        self.function_mut(&function).workers.insert(from);
        if let Some(conn) = self.connections.get_mut(&from) {
            if !conn.registrations.iter().any(|f| f == &function) {
                conn.registrations.push(function);
            }
        }
    }

    pub fn can_do_timeout(&mut self, from: ConnectionId, function: Bytes, timeout: u32) {
        self.can_do(from, function.clone());
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.timeouts.insert(function, timeout);
        }
    }

    pub fn cant_do(&mut self, from: ConnectionId, function: Bytes) {
        if let Some(f) = self.functions.get_mut(&function) {
            f.workers.remove(&from);
            f.sleeping.remove(&from);
        }
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.registrations.retain(|f| f != &function);
            conn.timeouts.remove(&function);
        }
    }

    pub fn reset_abilities(&mut self, from: ConnectionId) {
        let functions = self
            .connections
            .get(&from)
            .map(|c| c.registrations.clone())
            .unwrap_or_default();
        for function in functions {
            self.cant_do(from, function);
        }
    }

    pub fn set_client_id(&mut self, from: ConnectionId, id: Bytes) {
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.client_id = Some(id);
        }
    }

    pub fn option_req(&mut self, from: ConnectionId, option: Bytes) -> Response {
        if option.as_ref() != b"exceptions" {
            return Response::Error {
                code: "unknown option",
                message: Bytes::copy_from_slice(&option),
            };
        }
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.options.insert(option.clone());
        }
        Response::OptionRes { option }
    }

    /// A worker announcing it has nothing left to do. Recorded per its
    /// registered functions so a later submission can wake it with `NOOP`.
    pub fn pre_sleep(&mut self, from: ConnectionId) {
        let functions = match self.connections.get_mut(&from) {
            Some(conn) => {
                conn.sleeping = true;
                conn.registrations.clone()
            },
            None => return,
        };
        for function in functions {
            self.function_mut(&function).sleeping.insert(from);
        }
    }

    pub fn submit(
        &mut self,
        from: ConnectionId,
        function: Bytes,
        unique: Bytes,
        data: Bytes,
        priority: Priority,
        background: bool,
    ) -> SubmitOutcome {
        if !unique.is_empty() {
            if let Some(&job_id) = self.unique_index.get(&(function.clone(), unique.clone())) {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    if !background {
                        job.subscribers.push(from);
                        if let Some(conn) = self.connections.get_mut(&from) {
                            conn.watched_jobs.insert(job_id);
                        }
                    }
                    return SubmitOutcome::Coalesced { handle: job.handle.clone() };
                }
            }
        }

        let (job_id, handle) = self.next_handle();
        let job = Job {
            id: job_id,
            handle: handle.clone(),
            function: function.clone(),
            unique: unique.clone(),
            priority,
            data,
            background,
            placement: Placement::Queued,
            subscribers: if background { Vec::new() } else { vec![from] },
            numerator: 0,
            denominator: 0,
            created: Instant::now(),
            reserves: 0,
            timeouts: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
            persisted: false,
        };
        self.handle_index.insert(handle.clone(), job_id);
        self.jobs.insert(job_id, job);
        if !unique.is_empty() {
            self.unique_index.insert((function.clone(), unique), job_id);
        }
        if !background {
            if let Some(conn) = self.connections.get_mut(&from) {
                conn.watched_jobs.insert(job_id);
            }
        }

        // Not enqueued yet: the job is visible for unique-coalescing but not
        // grabbable until `activate` runs, which the caller (`Engine::
        // submit_job`) only does once `PersistentQueue::add` has succeeded
        // (spec.md §4.5 — a job must not be live before it is durable).
        SubmitOutcome::Created { job_id, handle }
    }

    pub fn mark_persisted(&mut self, job_id: JobId) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.persisted = true;
        }
    }

    /// Makes a newly-created job grabbable: pushes it onto its function's
    /// priority queue and wakes any worker sleeping on that function. Called
    /// only after the job's durability is settled (§4.5) — never from
    /// `submit` itself, so a job can't be grabbed (or completed) while its
    /// `PersistentQueue::add` is still in flight.
    pub fn activate(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get(&job_id) else { return };
        let function = job.function.clone();
        let priority = job.priority;

        let function_entry = self.function_mut(&function);
        function_entry.push(priority, job_id);
        function_entry.total_jobs += 1;

        // Wake every worker sleeping on this function; each wakeup clears
        // that worker's sleeping bit, so a worker is never NOOPed twice for
        // jobs that arrive before it next calls GRAB_JOB.
        let sleepers: Vec<ConnectionId> = self
            .functions
            .get_mut(&function)
            .map(|f| f.sleeping.drain().collect())
            .unwrap_or_default();
        for worker in sleepers {
            if let Some(conn) = self.connections.get_mut(&worker) {
                conn.sleeping = false;
                let _ = conn.outbound.send(Response::Noop);
            }
        }
    }

    /// Undoes a submission whose `PersistentQueue::add` failed: removes the
    /// job from the unique index and tells any subscriber that attached
    /// while the add was in flight that the job is gone. The job was never
    /// `activate`d, so it was never grabbable; `remove_queued` is called
    /// anyway as a defensive no-op in case that ever changes. The original
    /// submitter's own reply is sent by the caller (`Engine::submit_job`),
    /// not from here.
    pub fn fail_submission(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.remove(&job_id) else {
            return;
        };
        if !job.unique.is_empty() {
            self.unique_index.remove(&(job.function.clone(), job.unique.clone()));
        }
        if let Some(function) = self.functions.get_mut(&job.function) {
            function.remove_queued(job_id);
        }
        self.handle_index.remove(&job.handle);
        for subscriber in &job.subscribers {
            if let Some(conn) = self.connections.get(subscriber) {
                let _ = conn.outbound.send(Response::Error {
                    code: "queue",
                    message: Bytes::from_static(b"could not persist job"),
                });
            }
        }
    }

    /// Reinstates a job recovered by `PersistentQueue::replay` at startup
    /// (spec.md §4.5, I7). Replayed jobs have no connected subscribers —
    /// their only observers from here on are future `GET_STATUS` calls and
    /// whichever worker next grabs them.
    pub fn reinstate(&mut self, row: ReplayedJob) {
        let (job_id, handle) = self.next_handle();
        let job = Job {
            id: job_id,
            handle,
            function: row.function.clone(),
            unique: row.unique.clone(),
            priority: row.priority,
            data: row.data,
            background: true,
            placement: Placement::Queued,
            subscribers: Vec::new(),
            numerator: 0,
            denominator: 0,
            created: Instant::now(),
            reserves: 0,
            timeouts: 0,
            releases: 0,
            buries: 0,
            kicks: 0,
            persisted: true,
        };
        self.handle_index.insert(job.handle.clone(), job_id);
        self.jobs.insert(job_id, job);
        if !row.unique.is_empty() {
            self.unique_index.insert((row.function.clone(), row.unique), job_id);
        }
        self.function_mut(&row.function).push(row.priority, job_id);
    }

    /// `GRAB_JOB`/`GRAB_JOB_UNIQ`: scans the worker's registrations in
    /// order and hands it the head job of the first non-empty queue.
    pub fn grab(&mut self, from: ConnectionId, with_unique: bool) -> Response {
        let registrations = match self.connections.get(&from) {
            Some(conn) => conn.registrations.clone(),
            None => return Response::NoJob,
        };

        for function_name in &registrations {
            let Some(job_id) = self.functions.get_mut(function_name).and_then(Function::pop)
            else {
                continue;
            };

            let job = self.jobs.get_mut(&job_id).expect("queued job must exist");
            job.placement = Placement::Assigned { worker: from };
            job.reserves += 1;
            if let Some(conn) = self.connections.get_mut(&from) {
                conn.assigned_jobs.insert(job_id);
                conn.sleeping = false;
            }

            return if with_unique {
                Response::JobAssignUniq {
                    handle: job.handle.clone(),
                    function: job.function.clone(),
                    unique: job.unique.clone(),
                    data: job.data.clone(),
                }
            } else {
                Response::JobAssign {
                    handle: job.handle.clone(),
                    function: job.function.clone(),
                    data: job.data.clone(),
                }
            };
        }

        Response::NoJob
    }

    fn job_by_handle(&self, handle: &[u8]) -> Option<JobId> {
        self.handle_index.get(handle).copied()
    }

    /// Forwards a progress/result message to every current subscriber.
    /// Unknown handles (job already gone — completed, or a stale
    /// background handle) are dropped silently, per spec.md §4.3.
    fn fan_out(&self, job_id: JobId, response: Response) {
        if let Some(job) = self.jobs.get(&job_id) {
            for subscriber in &job.subscribers {
                if let Some(conn) = self.connections.get(subscriber) {
                    let _ = conn.outbound.send(response.clone());
                }
            }
        }
    }

    pub fn work_status(&mut self, handle: Bytes, numerator: u32, denominator: u32) {
        let Some(job_id) = self.job_by_handle(&handle) else {
            return;
        };
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.numerator = numerator;
            job.denominator = denominator;
        }
        self.fan_out(job_id, Response::WorkStatus { handle, numerator, denominator });
    }

    pub fn work_data(&mut self, handle: Bytes, data: Bytes) {
        if let Some(job_id) = self.job_by_handle(&handle) {
            self.fan_out(job_id, Response::WorkData { handle, data });
        }
    }

    pub fn work_warning(&mut self, handle: Bytes, data: Bytes) {
        if let Some(job_id) = self.job_by_handle(&handle) {
            self.fan_out(job_id, Response::WorkWarning { handle, data });
        }
    }

    /// `exceptions` are only forwarded to subscribers that opted in via
    /// `OPTION_REQ`; others are left to observe the eventual `WORK_FAIL`.
    pub fn work_exception(&mut self, handle: Bytes, data: Bytes) {
        let Some(job_id) = self.job_by_handle(&handle) else {
            return;
        };
        if let Some(job) = self.jobs.get(&job_id) {
            for subscriber in &job.subscribers {
                if let Some(conn) = self.connections.get(subscriber) {
                    if conn.wants_exceptions() {
                        let _ = conn.outbound.send(Response::WorkException {
                            handle: handle.clone(),
                            data: data.clone(),
                        });
                    }
                }
            }
        }
    }

    /// Removes a finished job from the model and reports whether its
    /// creation was durably persisted, so the caller knows to call
    /// `PersistentQueue::done`.
    fn remove_completed(&mut self, job_id: JobId) -> Option<(Bytes, Bytes)> {
        let job = self.jobs.remove(&job_id)?;
        self.handle_index.remove(&job.handle);
        if !job.unique.is_empty() {
            self.unique_index.remove(&(job.function.clone(), job.unique.clone()));
        }
        if let Some(worker) = job.assigned_worker() {
            if let Some(conn) = self.connections.get_mut(&worker) {
                conn.assigned_jobs.remove(&job_id);
            }
        }
        for subscriber in &job.subscribers {
            if let Some(conn) = self.connections.get_mut(subscriber) {
                conn.watched_jobs.remove(&job_id);
            }
        }
        job.persisted.then_some((job.function, job.unique))
    }

    /// `WORK_COMPLETE`: fans out then removes the job. Returns
    /// `(function, unique)` when the job was persisted, so `Engine` knows
    /// to call `PersistentQueue::done` after unlocking.
    pub fn complete(&mut self, handle: Bytes, data: Bytes) -> Option<(Bytes, Bytes)> {
        let job_id = self.job_by_handle(&handle)?;
        self.fan_out(job_id, Response::WorkComplete { handle, data });
        self.remove_completed(job_id)
    }

    pub fn fail(&mut self, handle: Bytes) {
        if let Some(job_id) = self.job_by_handle(&handle) {
            self.fan_out(job_id, Response::WorkFail { handle });
            self.remove_completed(job_id);
        }
    }

    pub fn get_status(&self, handle: Bytes) -> Response {
        match self.job_by_handle(&handle) {
            Some(job_id) => {
                let job = &self.jobs[&job_id];
                Response::StatusRes {
                    handle,
                    known: true,
                    running: job.assigned_worker().is_some(),
                    numerator: job.numerator,
                    denominator: job.denominator,
                }
            },
            None => Response::StatusRes {
                handle,
                known: false,
                running: false,
                numerator: 0,
                denominator: 0,
            },
        }
    }

    pub fn function_names(&self) -> Vec<Bytes> {
        self.functions.keys().cloned().collect()
    }

    pub fn function_stats(&self, name: &Bytes) -> Option<(usize, usize, usize)> {
        self.functions.get(name).map(|f| (f.queue_len(), f.workers.len(), f.sleeping.len()))
    }

    pub fn set_max_queue(&mut self, name: &Bytes, max: Option<usize>) {
        self.function_mut(name).max_queue = max;
    }

    pub fn worker_summaries(&self) -> Vec<(ConnectionId, Option<Bytes>, Vec<Bytes>)> {
        self.connections
            .values()
            .map(|c| (c.id, c.client_id.clone(), c.registrations.clone()))
            .collect()
    }
}

/// Wraps [`Model`] behind an async mutex and owns the persistence backend,
/// so every public method here is the unit of work `dispatch` calls for one
/// incoming request (spec.md §5: lock held only across synchronous model
/// mutation, never across I/O).
pub struct Engine {
    model: Mutex<Model>,
    persistence: Arc<dyn PersistentQueue>,
    /// Fires once, when `begin_drain` runs, so the accept loop can stop
    /// taking new connections without polling `is_draining` (§I5, §4.4).
    drain_notify: Notify,
}

impl Engine {
    pub fn new(handle_prefix: impl Into<String>, persistence: Arc<dyn PersistentQueue>) -> Self {
        Engine {
            model: Mutex::new(Model::new(handle_prefix)),
            persistence,
            drain_notify: Notify::new(),
        }
    }

    /// Recovers persisted jobs at startup (I7). Must run before the listen
    /// socket starts accepting connections. A replay failure aborts
    /// startup per spec.md §7, so this returns `Result` rather than
    /// swallowing the error.
    pub async fn replay(&self) -> Result<(), Error> {
        let rows = self.persistence.replay().await?;
        let mut model = self.model.lock().await;
        for row in rows {
            model.reinstate(row);
        }
        Ok(())
    }

    pub async fn register_connection(&self, conn: Connection) {
        self.model.lock().await.register_connection(conn);
    }

    pub async fn release_connection(&self, id: ConnectionId) {
        self.model.lock().await.release_connection(id);
    }

    pub async fn begin_drain(&self) {
        self.model.lock().await.begin_drain();
        self.drain_notify.notify_one();
    }

    pub async fn is_draining(&self) -> bool {
        self.model.lock().await.is_draining()
    }

    /// Resolves once `begin_drain` has run. The accept loop awaits this
    /// alongside `listener.accept()` to stop taking new connections the
    /// moment a graceful shutdown starts.
    pub async fn wait_for_drain_started(&self) {
        self.drain_notify.notified().await;
    }

    /// Number of jobs the model is still tracking (queued or assigned).
    /// Used to detect when a graceful drain has finished and the process
    /// can exit.
    pub async fn job_count(&self) -> usize {
        self.model.lock().await.job_count()
    }

    /// Polls until every job has been completed or failed off, i.e. until
    /// draining has nothing left to wait for.
    pub async fn wait_until_drained(&self) {
        while self.job_count().await > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Rejects new work once `begin_drain` has run (§I5): no job should
    /// become newly live while the server is shutting down, even though
    /// already-queued and already-assigned work is left to finish.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit_job(
        &self,
        from: ConnectionId,
        function: Bytes,
        unique: Bytes,
        data: Bytes,
        priority: Priority,
        background: bool,
    ) -> Result<Response, Error> {
        let outcome = {
            let mut model = self.model.lock().await;
            if model.is_draining() {
                return Ok(Response::Error {
                    code: "queue",
                    message: Bytes::from_static(b"server is shutting down"),
                });
            }
            model.submit(from, function.clone(), unique.clone(), data.clone(), priority, background)
        };

        match outcome {
            SubmitOutcome::Coalesced { handle } => Ok(Response::JobCreated { handle }),
            SubmitOutcome::Created { job_id, handle } => {
                match self.persistence.add(&function, &unique, &data, priority).await {
                    Ok(()) => {
                        let mut model = self.model.lock().await;
                        model.mark_persisted(job_id);
                        model.activate(job_id);
                        Ok(Response::JobCreated { handle })
                    },
                    Err(_) => {
                        self.model.lock().await.fail_submission(job_id);
                        Ok(Response::Error {
                            code: "queue",
                            message: Bytes::from_static(b"could not persist job"),
                        })
                    },
                }
            },
        }
    }

    pub async fn grab(&self, from: ConnectionId, with_unique: bool) -> Response {
        self.model.lock().await.grab(from, with_unique)
    }

    pub async fn pre_sleep(&self, from: ConnectionId) {
        self.model.lock().await.pre_sleep(from);
    }

    pub async fn can_do(&self, from: ConnectionId, function: Bytes) {
        self.model.lock().await.can_do(from, function);
    }

    pub async fn can_do_timeout(&self, from: ConnectionId, function: Bytes, timeout: u32) {
        self.model.lock().await.can_do_timeout(from, function, timeout);
    }

    pub async fn cant_do(&self, from: ConnectionId, function: Bytes) {
        self.model.lock().await.cant_do(from, function);
    }

    pub async fn reset_abilities(&self, from: ConnectionId) {
        self.model.lock().await.reset_abilities(from);
    }

    pub async fn set_client_id(&self, from: ConnectionId, id: Bytes) {
        self.model.lock().await.set_client_id(from, id);
    }

    pub async fn option_req(&self, from: ConnectionId, option: Bytes) -> Response {
        self.model.lock().await.option_req(from, option)
    }

    pub async fn work_status(&self, handle: Bytes, numerator: u32, denominator: u32) {
        self.model.lock().await.work_status(handle, numerator, denominator);
    }

    pub async fn work_data(&self, handle: Bytes, data: Bytes) {
        self.model.lock().await.work_data(handle, data);
    }

    pub async fn work_warning(&self, handle: Bytes, data: Bytes) {
        self.model.lock().await.work_warning(handle, data);
    }

    pub async fn work_exception(&self, handle: Bytes, data: Bytes) {
        self.model.lock().await.work_exception(handle, data);
    }

    pub async fn work_complete(&self, handle: Bytes, data: Bytes) -> Result<(), Error> {
        let persisted = self.model.lock().await.complete(handle, data);
        if let Some((function, unique)) = persisted {
            self.persistence.done(&function, &unique).await?;
        }
        Ok(())
    }

    pub async fn work_fail(&self, handle: Bytes) {
        self.model.lock().await.fail(handle);
    }

    pub async fn get_status(&self, handle: Bytes) -> Response {
        self.model.lock().await.get_status(handle)
    }

    pub async fn function_names(&self) -> Vec<Bytes> {
        self.model.lock().await.function_names()
    }

    pub async fn function_stats(&self, name: &Bytes) -> Option<(usize, usize, usize)> {
        self.model.lock().await.function_stats(name)
    }

    pub async fn set_max_queue(&self, name: &Bytes, max: Option<usize>) {
        self.model.lock().await.set_max_queue(name, max);
    }

    pub async fn worker_summaries(&self) -> Vec<(ConnectionId, Option<Bytes>, Vec<Bytes>)> {
        self.model.lock().await.worker_summaries()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::persistence::NullQueue;

    fn wire(id: ConnectionId) -> (Connection, mpsc::UnboundedReceiver<Response>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(id, tx), rx)
    }

    #[tokio::test]
    async fn submit_assign_complete_round_trip() {
        let engine = Engine::new("test", Arc::new(NullQueue));

        let client = ConnectionId::next();
        let (client_conn, mut client_rx) = wire(client);
        engine.register_connection(client_conn).await;

        let worker = ConnectionId::next();
        let (worker_conn, _worker_rx) = wire(worker);
        engine.register_connection(worker_conn).await;
        engine.can_do(worker, Bytes::from("reverse")).await;
        engine.pre_sleep(worker).await;

        let created = engine
            .submit_job(
                client,
                Bytes::from("reverse"),
                Bytes::new(),
                Bytes::from("abc"),
                Priority::Normal,
                false,
            )
            .await
            .unwrap();
        let handle = match created {
            Response::JobCreated { handle } => handle,
            other => panic!("unexpected {other:?}"),
        };

        let assigned = engine.grab(worker, false).await;
        let (h2, function, data) = match assigned {
            Response::JobAssign { handle, function, data } => (handle, function, data),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(h2, handle);
        assert_eq!(function, Bytes::from("reverse"));
        assert_eq!(data, Bytes::from("abc"));

        engine.work_complete(handle.clone(), Bytes::from("cba")).await.unwrap();

        let got = client_rx.try_recv().unwrap();
        assert_eq!(got, Response::WorkComplete { handle, data: Bytes::from("cba") });
    }

    #[tokio::test]
    async fn unique_coalescing_attaches_second_client() {
        let engine = Engine::new("test", Arc::new(NullQueue));

        let c1 = ConnectionId::next();
        let (conn1, _rx1) = wire(c1);
        engine.register_connection(conn1).await;
        let c2 = ConnectionId::next();
        let (conn2, _rx2) = wire(c2);
        engine.register_connection(conn2).await;

        let r1 = engine
            .submit_job(c1, Bytes::from("f"), Bytes::from("u"), Bytes::from("x"), Priority::Normal, false)
            .await
            .unwrap();
        let r2 = engine
            .submit_job(c2, Bytes::from("f"), Bytes::from("u"), Bytes::from("x"), Priority::Normal, false)
            .await
            .unwrap();

        match (r1, r2) {
            (Response::JobCreated { handle: h1 }, Response::JobCreated { handle: h2 }) => {
                assert_eq!(h1, h2);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn priority_ordering_high_before_normal_before_low() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (conn, _rx) = wire(client);
        engine.register_connection(conn).await;
        let worker = ConnectionId::next();
        let (wconn, _wrx) = wire(worker);
        engine.register_connection(wconn).await;
        engine.can_do(worker, Bytes::from("f")).await;

        engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("j1"), Priority::Normal, true)
            .await
            .unwrap();
        engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("j2"), Priority::Low, true)
            .await
            .unwrap();
        engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("j3"), Priority::High, true)
            .await
            .unwrap();

        let order = [
            engine.grab(worker, false).await,
            engine.grab(worker, false).await,
            engine.grab(worker, false).await,
        ]
        .map(|r| match r {
            Response::JobAssign { data, .. } => data,
            other => panic!("unexpected {other:?}"),
        });
        assert_eq!(order, [Bytes::from("j3"), Bytes::from("j1"), Bytes::from("j2")]);
    }

    #[tokio::test]
    async fn worker_loss_requeues_job() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (conn, _rx) = wire(client);
        engine.register_connection(conn).await;
        let worker_a = ConnectionId::next();
        let (wa, _wa_rx) = wire(worker_a);
        engine.register_connection(wa).await;
        engine.can_do(worker_a, Bytes::from("f")).await;

        engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("j"), Priority::Normal, true)
            .await
            .unwrap();
        let assigned = engine.grab(worker_a, false).await;
        assert!(matches!(assigned, Response::JobAssign { .. }));

        engine.release_connection(worker_a).await;

        let worker_b = ConnectionId::next();
        let (wb, _wb_rx) = wire(worker_b);
        engine.register_connection(wb).await;
        engine.can_do(worker_b, Bytes::from("f")).await;

        let reassigned = engine.grab(worker_b, false).await;
        assert!(matches!(reassigned, Response::JobAssign { .. }));
    }

    #[tokio::test]
    async fn background_job_status_transitions() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (conn, _rx) = wire(client);
        engine.register_connection(conn).await;

        let created = engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("x"), Priority::Normal, true)
            .await
            .unwrap();
        let handle = match created {
            Response::JobCreated { handle } => handle,
            other => panic!("unexpected {other:?}"),
        };

        let status = engine.get_status(handle.clone()).await;
        assert_eq!(
            status,
            Response::StatusRes { handle: handle.clone(), known: true, running: false, numerator: 0, denominator: 0 }
        );

        engine.work_complete(handle.clone(), Bytes::new()).await.unwrap();

        let status = engine.get_status(handle.clone()).await;
        assert_eq!(
            status,
            Response::StatusRes { handle, known: false, running: false, numerator: 0, denominator: 0 }
        );
    }

    /// A `PersistentQueue` whose `add` always fails, for exercising the
    /// submit-then-persist-then-activate ordering.
    struct FailingQueue;

    impl PersistentQueue for FailingQueue {
        fn add<'a>(
            &'a self,
            _function: &'a [u8],
            _unique: &'a [u8],
            _data: &'a [u8],
            _priority: Priority,
        ) -> crate::persistence::BoxFuture<'a, ()> {
            Box::pin(async { Err(Error::QueueError("simulated backend failure".into())) })
        }

        fn done<'a>(&'a self, _function: &'a [u8], _unique: &'a [u8]) -> crate::persistence::BoxFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn flush(&self) -> crate::persistence::BoxFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }

        fn replay(&self) -> crate::persistence::BoxFuture<'_, Vec<ReplayedJob>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn failed_persistence_leaves_no_grabbable_job() {
        let engine = Engine::new("test", Arc::new(FailingQueue));
        let client = ConnectionId::next();
        let (conn, mut client_rx) = wire(client);
        engine.register_connection(conn).await;
        let worker = ConnectionId::next();
        let (wconn, _wrx) = wire(worker);
        engine.register_connection(wconn).await;
        engine.can_do(worker, Bytes::from("f")).await;

        let reply = engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("x"), Priority::Normal, false)
            .await
            .unwrap();
        assert!(matches!(reply, Response::Error { code: "queue", .. }));

        // A worker racing to grab during the failed `add` never sees the job
        // at all — it was never enqueued, so there's nothing to grab and
        // nothing left over for `fail_submission` to have to unwind.
        assert!(matches!(engine.grab(worker, false).await, Response::NoJob));
        assert_eq!(engine.job_count().await, 0);
        assert!(client_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn draining_rejects_new_submissions() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (conn, _rx) = wire(client);
        engine.register_connection(conn).await;

        engine.begin_drain().await;
        assert!(engine.is_draining().await);

        let reply = engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("x"), Priority::Normal, false)
            .await
            .unwrap();
        assert!(matches!(reply, Response::Error { code: "queue", .. }));
        assert_eq!(engine.job_count().await, 0);
    }

    #[tokio::test]
    async fn drain_completes_once_jobs_finish() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (conn, _rx) = wire(client);
        engine.register_connection(conn).await;

        let created = engine
            .submit_job(client, Bytes::from("f"), Bytes::new(), Bytes::from("x"), Priority::Normal, true)
            .await
            .unwrap();
        let handle = match created {
            Response::JobCreated { handle } => handle,
            other => panic!("unexpected {other:?}"),
        };

        engine.begin_drain().await;
        assert_eq!(engine.job_count().await, 1);

        engine.work_complete(handle, Bytes::new()).await.unwrap();
        assert_eq!(engine.job_count().await, 0);
    }
}
