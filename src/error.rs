//! Crate-wide error type.
//!
//! Modeled on the teacher's `wire::decoder::Error` / `wire::encoder::Error`
//! split (a small enum plus `Display`, no external error-derive crate), but
//! unified into a single type since every error kind below can surface from
//! more than one layer (codec, model, connection, persistence).

use std::{error, fmt, io};

/// Every error kind the core can produce, per spec.md §7. `IoWait` is
/// intentionally absent: in this async rewrite, cooperative suspension is
/// expressed as `.await`, never as a returned error value.
#[derive(Debug)]
pub enum Error {
    /// Peer went away mid-operation (EOF on read, or a write failed because
    /// the peer reset/closed the connection). Transient: the connection is
    /// torn down but the server keeps serving other peers.
    LostConnection,
    /// Every resolved address for an outbound connect was exhausted.
    CouldNotConnect,
    /// Packet framing was invalid: bad magic bytes.
    InvalidMagic,
    /// Packet framing named a command code that doesn't exist, or is `0`
    /// (TEXT) on a binary connection.
    InvalidCommand,
    /// Packet framing had the wrong argument count for its command.
    InvalidPacket,
    /// A caller tried to append an argument past what the command's
    /// descriptor allows and the command doesn't carry a trailing data
    /// payload.
    TooManyArgs,
    /// A persistence plugin's `add`, `done`, or `replay` callback failed.
    QueueError(String),
    /// No file descriptors are registered with the reactor (nothing to
    /// poll).
    NoActiveFds,
    /// A caller-supplied wait budget elapsed with no result.
    Timeout,
    /// Packet/payload allocation failed.
    MemoryAllocationFailure,
    /// The FSM observed a state transition that cannot happen if the code
    /// is correct. Always a programmer error, never triggered by peer input.
    UnknownState(&'static str),
    /// An ECHO_REQ/ECHO_RES round trip didn't return identical bytes.
    EchoDataCorruption,
    /// Underlying transport I/O failure not otherwise classified above.
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LostConnection => write!(f, "lost connection"),
            Error::CouldNotConnect => write!(f, "could not connect"),
            Error::InvalidMagic => write!(f, "invalid packet magic"),
            Error::InvalidCommand => write!(f, "invalid packet command"),
            Error::InvalidPacket => write!(f, "invalid packet"),
            Error::TooManyArgs => write!(f, "too many arguments"),
            Error::QueueError(msg) => write!(f, "queue error: {msg}"),
            Error::NoActiveFds => write!(f, "no active file descriptors"),
            Error::Timeout => write!(f, "timeout"),
            Error::MemoryAllocationFailure => write!(f, "memory allocation failure"),
            Error::UnknownState(ctx) => write!(f, "unknown state: {ctx}"),
            Error::EchoDataCorruption => write!(f, "echo data corruption"),
            Error::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted => Error::LostConnection,
            _ => Error::Io(value),
        }
    }
}

/// The two-argument wire form of an ERROR packet: `(code, message)`.
impl Error {
    pub fn wire_code(&self) -> &'static str {
        match self {
            Error::LostConnection => "lost_connection",
            Error::CouldNotConnect => "could_not_connect",
            Error::InvalidMagic => "invalid_magic",
            Error::InvalidCommand => "unknown command",
            Error::InvalidPacket => "invalid_packet",
            Error::TooManyArgs => "too_many_args",
            Error::QueueError(_) => "queue",
            Error::NoActiveFds => "no_active_fds",
            Error::Timeout => "timeout",
            Error::MemoryAllocationFailure => "memory_allocation",
            Error::UnknownState(_) => "unknown_state",
            Error::EchoDataCorruption => "echo_data_corruption",
            Error::Io(_) => "io",
        }
    }
}
