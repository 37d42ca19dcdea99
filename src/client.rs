//! Library-side client driver (spec.md §2 "Worker/client drivers (library
//! side)"). A thin facade over the same `Framed` codec the server uses,
//! driving the outbound `ConnectState` FSM from §4.2 before handing off to
//! `Sink`/`Stream`.

use bytes::Bytes;
use futures::sink::SinkExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::connection::ConnectState;
use crate::error::Error;
use crate::wire::events::ProtocolEvent;
use crate::wire::message::Priority;
use crate::wire::{self, Codec, Request, Response};

/// A connected client peer: submits jobs, polls status, and exercises
/// `ECHO_REQ`/`OPTION_REQ`. Does not register as a worker — see
/// [`crate::worker::Worker`] for that side of the protocol.
pub struct Client {
    framed: Framed<TcpStream, Codec>,
    state: ConnectState,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs, max_body_size: usize) -> Result<Self, Error> {
        let mut state = ConnectState::AddrInfo;
        state = state.advance(true);

        let stream = TcpStream::connect(addr).await.map_err(|_| Error::CouldNotConnect)?;
        stream.set_nodelay(true)?;

        state = state.advance(true);
        state = state.advance(true);
        debug_assert!(state.is_connected());

        Ok(Client { framed: wire::framed(stream, max_body_size), state })
    }

    pub fn connect_state(&self) -> ConnectState {
        self.state
    }

    async fn roundtrip(&mut self, request: Request) -> Result<Response, Error> {
        self.framed.send(request.into()).await?;
        loop {
            match self.framed.next().await {
                Some(Ok(ProtocolEvent::Packet(packet))) => return packet.try_into(),
                Some(Ok(ProtocolEvent::Discarded | ProtocolEvent::AdminLine(_))) => continue,
                Some(Err(e)) => return Err(e),
                None => return Err(Error::LostConnection),
            }
        }
    }

    /// Submits a job and waits for `JOB_CREATED`. Returns the assigned
    /// handle; a non-empty `unique` may coalesce onto an existing job
    /// (spec.md §4.3, I2).
    pub async fn submit(
        &mut self,
        function: impl Into<Bytes>,
        unique: impl Into<Bytes>,
        data: impl Into<Bytes>,
        priority: Priority,
        background: bool,
    ) -> Result<Bytes, Error> {
        let response = self
            .roundtrip(Request::SubmitJob {
                function: function.into(),
                unique: unique.into(),
                data: data.into(),
                priority,
                background,
            })
            .await?;
        match response {
            Response::JobCreated { handle } => Ok(handle),
            Response::Error { code, message } => {
                Err(Error::QueueError(format!("{code}: {}", String::from_utf8_lossy(&message))))
            },
            _ => Err(Error::UnknownState("unexpected reply to SUBMIT_JOB")),
        }
    }

    pub async fn get_status(&mut self, handle: impl Into<Bytes>) -> Result<Response, Error> {
        self.roundtrip(Request::GetStatus { handle: handle.into() }).await
    }

    pub async fn echo(&mut self, payload: impl Into<Bytes>) -> Result<Bytes, Error> {
        let data = payload.into();
        match self.roundtrip(Request::EchoReq { data: data.clone() }).await? {
            Response::Echo { data: echoed } if echoed == data => Ok(echoed),
            Response::Echo { .. } => Err(Error::EchoDataCorruption),
            _ => Err(Error::UnknownState("unexpected reply to ECHO_REQ")),
        }
    }

    pub async fn request_option(&mut self, option: impl Into<Bytes>) -> Result<Bytes, Error> {
        match self.roundtrip(Request::OptionReq { option: option.into() }).await? {
            Response::OptionRes { option } => Ok(option),
            Response::Error { code, message } => {
                Err(Error::QueueError(format!("{code}: {}", String::from_utf8_lossy(&message))))
            },
            _ => Err(Error::UnknownState("unexpected reply to OPTION_REQ")),
        }
    }

    /// Waits for the next server-pushed message on this connection —
    /// `WORK_DATA`/`WORK_WARNING`/`WORK_STATUS`/`WORK_COMPLETE`/
    /// `WORK_EXCEPTION`/`WORK_FAIL` relayed from a worker, for a job this
    /// client subscribed to via `submit`. Returns `None` on disconnect.
    pub async fn next_update(&mut self) -> Result<Option<Response>, Error> {
        loop {
            match self.framed.next().await {
                Some(Ok(ProtocolEvent::Packet(packet))) => return Ok(Some(packet.try_into()?)),
                Some(Ok(ProtocolEvent::Discarded | ProtocolEvent::AdminLine(_))) => continue,
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}
