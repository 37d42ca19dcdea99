//! Per-peer connection state (spec.md §3 "Connection", §4.2).
//!
//! The send/receive FSMs from spec.md §4.2 collapse onto
//! `tokio_util::codec::Framed`'s `Sink`/`Stream` the way the teacher's
//! `wire::framed` already does; what remains here is the state a connection
//! carries across commands (registrations, sleep state, assigned jobs) and
//! the explicit outbound connect FSM for the library-side drivers, since
//! `TcpStream::connect` hides the ADDRINFO/CONNECT/CONNECTING states that
//! §9 asks to keep visible.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::model::job::JobId;
use crate::wire::Response;

/// Identifies a connection for the lifetime of the process. Allocated by
/// `ConnectionId::next`, a process-wide counter — never reused, so a stale
/// id found in, say, a job's `subscribers` list after disconnect is simply
/// absent from the live connection table rather than aliasing a new peer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Server-side state for one connection, shared between the per-connection
/// dispatch task and the job model it mutates. The `Framed` stream/sink
/// itself stays local to the dispatch task; this struct holds only what the
/// model needs to reach a connection asynchronously (via `outbound`) or
/// reason about when the connection drops.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// Pushes a `Response` straight to the dispatch task's write half, for
    /// server-initiated sends (`JOB_ASSIGN`/`NOOP` wakeups) that happen
    /// outside that connection's own request/response turn. Unbounded so a
    /// push from inside the model's lock never awaits (§I8).
    pub outbound: mpsc::UnboundedSender<Response>,
    /// Functions registered via `CAN_DO`, in registration order — GRAB_JOB
    /// scans a worker's functions in this order per spec.md §4.3.
    pub registrations: Vec<Bytes>,
    /// Per-function advisory timeout from `CAN_DO_TIMEOUT` (§9 Open
    /// Question 3: advisory only, surfaced via `workers`, never enforced).
    pub timeouts: HashMap<Bytes, u32>,
    /// Set between `PRE_SLEEP` and the next wakeup (a job becoming
    /// available, or any command that isn't `GRAB_JOB`/`GRAB_JOB_UNIQ`).
    pub sleeping: bool,
    /// Jobs this connection currently holds as a worker.
    pub assigned_jobs: HashSet<JobId>,
    /// Jobs this connection is a foreground subscriber of, as a client.
    pub watched_jobs: HashSet<JobId>,
    /// Set via `SET_CLIENT_ID`; diagnostics only (admin `workers` listing).
    pub client_id: Option<Bytes>,
    /// Options enabled via `OPTION_REQ`, e.g. `b"exceptions"`. Cleared on
    /// disconnect per §9 Open Question 1 — never persisted by client id.
    pub options: HashSet<Bytes>,
}

impl Connection {
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Response>) -> Self {
        Connection {
            id,
            outbound,
            registrations: Vec::new(),
            timeouts: HashMap::new(),
            sleeping: false,
            assigned_jobs: HashSet::new(),
            watched_jobs: HashSet::new(),
            client_id: None,
            options: HashSet::new(),
        }
    }

    pub fn can_do(&self, function: &[u8]) -> bool {
        self.registrations.iter().any(|f| f.as_ref() == function)
    }

    pub fn wants_exceptions(&self) -> bool {
        self.options.contains(b"exceptions".as_slice())
    }
}

/// Outbound connect FSM for library-side client/worker drivers (spec.md
/// §4.2). On `tokio::net::TcpStream`, `connect` itself performs ADDRINFO
/// resolution and the CONNECT/CONNECTING handshake atomically, so this enum
/// exists to give a caller driving a custom (e.g. in-memory, for tests)
/// transport the same visible states rather than a single opaque future.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectState {
    /// Resolving the target host to a connectable address.
    AddrInfo,
    /// An address is known; the transport-specific connect call has not
    /// been issued yet.
    Connect,
    /// The connect call is in flight (`IO_WAIT` in spec.md's terms).
    Connecting,
    /// The transport is connected and ready for `Framed` to take over.
    Connected,
}

impl ConnectState {
    /// Advances to the next state given whether the current one's work has
    /// completed. Callers loop `state = state.advance(ready)` until
    /// `Connected`; `ready` is ignored once already `Connected`.
    pub fn advance(self, ready: bool) -> ConnectState {
        match self {
            ConnectState::AddrInfo if ready => ConnectState::Connect,
            ConnectState::Connect => ConnectState::Connecting,
            ConnectState::Connecting if ready => ConnectState::Connected,
            other => other,
        }
    }

    pub fn is_connected(self) -> bool {
        matches!(self, ConnectState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_distinct_and_monotonic() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn can_do_checks_registration_membership() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(ConnectionId::next(), tx);
        conn.registrations.push(Bytes::from("reverse"));
        assert!(conn.can_do(b"reverse"));
        assert!(!conn.can_do(b"sort"));
    }

    #[test]
    fn connect_state_walks_to_connected() {
        let mut state = ConnectState::AddrInfo;
        state = state.advance(true);
        assert_eq!(state, ConnectState::Connect);
        state = state.advance(true);
        assert_eq!(state, ConnectState::Connecting);
        assert!(!state.is_connected());
        state = state.advance(true);
        assert!(state.is_connected());
    }
}
