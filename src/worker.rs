//! Library-side worker driver (spec.md §2 "Worker/client drivers (library
//! side)"): registers abilities, sleeps, grabs jobs, and reports progress
//! — the same protocol a `jobforged` client speaks, from the other side.

use bytes::Bytes;
use futures::sink::SinkExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::connection::ConnectState;
use crate::error::Error;
use crate::wire::events::ProtocolEvent;
use crate::wire::{self, Codec, Request, Response};

/// A job this worker was just handed by `grab`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssignedJob {
    pub handle: Bytes,
    pub function: Bytes,
    pub unique: Option<Bytes>,
    pub data: Bytes,
}

pub struct Worker {
    framed: Framed<TcpStream, Codec>,
    state: ConnectState,
}

impl Worker {
    pub async fn connect(addr: impl ToSocketAddrs, max_body_size: usize) -> Result<Self, Error> {
        let mut state = ConnectState::AddrInfo;
        state = state.advance(true);

        let stream = TcpStream::connect(addr).await.map_err(|_| Error::CouldNotConnect)?;
        stream.set_nodelay(true)?;

        state = state.advance(true);
        state = state.advance(true);
        debug_assert!(state.is_connected());

        Ok(Worker { framed: wire::framed(stream, max_body_size), state })
    }

    pub fn connect_state(&self) -> ConnectState {
        self.state
    }

    /// Commands that receive no reply (`CAN_DO`, `CANT_DO`,
    /// `RESET_ABILITIES`, `PRE_SLEEP`, `WORK_*`) are simply pushed onto the
    /// wire — there is nothing to await.
    async fn send(&mut self, request: Request) -> Result<(), Error> {
        self.framed.send(request.into()).await
    }

    pub async fn can_do(&mut self, function: impl Into<Bytes>) -> Result<(), Error> {
        self.send(Request::CanDo { function: function.into() }).await
    }

    pub async fn can_do_timeout(&mut self, function: impl Into<Bytes>, timeout: u32) -> Result<(), Error> {
        self.send(Request::CanDoTimeout { function: function.into(), timeout }).await
    }

    pub async fn cant_do(&mut self, function: impl Into<Bytes>) -> Result<(), Error> {
        self.send(Request::CantDo { function: function.into() }).await
    }

    pub async fn reset_abilities(&mut self) -> Result<(), Error> {
        self.send(Request::ResetAbilities).await
    }

    pub async fn pre_sleep(&mut self) -> Result<(), Error> {
        self.send(Request::PreSleep).await
    }

    /// Sends `GRAB_JOB` and waits for the reply. `None` means `NO_JOB`; the
    /// caller is expected to `pre_sleep` and wait for the server's `NOOP`
    /// wakeup before grabbing again.
    pub async fn grab(&mut self, with_unique: bool) -> Result<Option<AssignedJob>, Error> {
        let request = if with_unique { Request::GrabJobUniq } else { Request::GrabJob };
        self.send(request).await?;

        loop {
            match self.framed.next().await {
                Some(Ok(ProtocolEvent::Packet(packet))) => {
                    return match packet.try_into()? {
                        Response::NoJob => Ok(None),
                        Response::JobAssign { handle, function, data } => {
                            Ok(Some(AssignedJob { handle, function, unique: None, data }))
                        },
                        Response::JobAssignUniq { handle, function, unique, data } => {
                            Ok(Some(AssignedJob { handle, function, unique: Some(unique), data }))
                        },
                        _ => Err(Error::UnknownState("unexpected reply to GRAB_JOB")),
                    };
                },
                Some(Ok(ProtocolEvent::Discarded | ProtocolEvent::AdminLine(_))) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(Error::LostConnection),
            }
        }
    }

    /// Waits for the server's wakeup `NOOP` after `pre_sleep`. Spurious
    /// wakeups are legal per spec.md §4.3 — the caller should always
    /// follow up with `grab` and treat `NO_JOB` as benign.
    pub async fn wait_for_wakeup(&mut self) -> Result<(), Error> {
        loop {
            match self.framed.next().await {
                Some(Ok(ProtocolEvent::Packet(packet))) => match packet.try_into()? {
                    Response::Noop => return Ok(()),
                    _ => continue,
                },
                Some(Ok(ProtocolEvent::Discarded | ProtocolEvent::AdminLine(_))) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(Error::LostConnection),
            }
        }
    }

    pub async fn work_status(&mut self, handle: Bytes, numerator: u32, denominator: u32) -> Result<(), Error> {
        self.send(Request::WorkStatus { handle, numerator, denominator }).await
    }

    pub async fn work_data(&mut self, handle: Bytes, data: Bytes) -> Result<(), Error> {
        self.send(Request::WorkData { handle, data }).await
    }

    pub async fn work_warning(&mut self, handle: Bytes, data: Bytes) -> Result<(), Error> {
        self.send(Request::WorkWarning { handle, data }).await
    }

    pub async fn work_exception(&mut self, handle: Bytes, data: Bytes) -> Result<(), Error> {
        self.send(Request::WorkException { handle, data }).await
    }

    pub async fn work_complete(&mut self, handle: Bytes, data: Bytes) -> Result<(), Error> {
        self.send(Request::WorkComplete { handle, data }).await
    }

    pub async fn work_fail(&mut self, handle: Bytes) -> Result<(), Error> {
        self.send(Request::WorkFail { handle }).await
    }
}
