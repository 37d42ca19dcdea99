//! Dispatch / wakeup loop (spec.md §4.4): one `tokio::spawn`ed task per
//! connection, mirroring the teacher's `do_client_loop` in `main.rs` —
//! `select!` between the framed stream and a `CancellationToken`, except
//! this version also selects on the connection's outbound channel so the
//! model can push `NOOP`/`JOB_ASSIGN`-class wakeups and fan-out messages
//! outside the connection's own request/response turn.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::sink::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn, Level};

use crate::admin;
use crate::connection::{Connection, ConnectionId};
use crate::error::Error;
use crate::model::server::Engine;
use crate::wire::events::ProtocolEvent;
use crate::wire::{self, Outbound, Packet, Request, Response};

/// Drives one connection until it disconnects or `cancel` fires. Runs the
/// connection through the codec in whichever mode the peer opens with
/// (binary or admin TEXT), and always releases the connection's model
/// state (requeue/unsubscribe, §4.3) before returning.
#[instrument(name = "connection", skip_all, err(level = Level::WARN))]
pub async fn run<T>(
    engine: Arc<Engine>,
    cancel: CancellationToken,
    stream: T,
    max_body_size: usize,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let id = ConnectionId::next();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    engine.register_connection(Connection::new(id, outbound_tx)).await;
    debug!(?id, "accepted connection");

    let mut framed = wire::framed(stream, max_body_size);

    let result: Result<()> = loop {
        select! {
            incoming = framed.next() => {
                match incoming {
                    None => break Ok(()),
                    Some(Ok(ProtocolEvent::Discarded)) => continue,
                    Some(Ok(ProtocolEvent::AdminLine(tokens))) => {
                        let reply = admin::handle(&engine, &tokens, &cancel).await;
                        if let Err(e) = framed.send(Outbound::Text(reply.into())).await {
                            break Err(e).context("writing admin reply");
                        }
                    },
                    Some(Ok(ProtocolEvent::Packet(packet))) => {
                        match dispatch_packet(&engine, id, packet).await {
                            Ok(Some(resp)) => {
                                if let Err(e) = framed.send(Outbound::Packet(resp.into())).await {
                                    break Err(e).context("writing response");
                                }
                            },
                            Ok(None) => {},
                            Err(e) => {
                                let _ = framed.send(Outbound::Packet(error_packet(&e))).await;
                                break Err(e).context("protocol violation");
                            },
                        }
                    },
                    Some(Err(e)) => {
                        let _ = framed.send(Outbound::Packet(error_packet(&e))).await;
                        break Err(e).context("decoding packet");
                    },
                }
            },
            pushed = outbound_rx.recv() => {
                let Some(resp) = pushed else { continue };
                if let Err(e) = framed.send(Outbound::Packet(resp.into())).await {
                    break Err(e).context("writing pushed response");
                }
            },
            _ = cancel.cancelled() => break Ok(()),
        }
    };

    engine.release_connection(id).await;

    if let Err(e) = framed.into_inner().shutdown().await {
        warn!(error = %e, "error shutting down connection");
    }

    result
}

/// Converts one decoded [`Packet`] into a [`Request`] and runs it against
/// the engine, returning the direct reply (if the command has one).
async fn dispatch_packet(
    engine: &Engine,
    from: ConnectionId,
    packet: Packet,
) -> Result<Option<Response>, Error> {
    let request: Request = packet.try_into()?;

    Ok(match request {
        Request::CanDo { function } => {
            engine.can_do(from, function).await;
            None
        },
        Request::CantDo { function } => {
            engine.cant_do(from, function).await;
            None
        },
        Request::ResetAbilities => {
            engine.reset_abilities(from).await;
            None
        },
        Request::CanDoTimeout { function, timeout } => {
            engine.can_do_timeout(from, function, timeout).await;
            None
        },
        Request::PreSleep => {
            engine.pre_sleep(from).await;
            None
        },
        Request::AllYours => None,
        Request::SetClientId { id } => {
            engine.set_client_id(from, id).await;
            None
        },
        Request::OptionReq { option } => Some(engine.option_req(from, option).await),

        Request::SubmitJob { function, unique, data, priority, background } => {
            Some(engine.submit_job(from, function, unique, data, priority, background).await?)
        },
        Request::SubmitJobSched | Request::SubmitJobEpoch => Some(Response::Error {
            code: "unsupported",
            message: bytes::Bytes::from_static(b"unsupported submit variant"),
        }),

        Request::GrabJob => Some(engine.grab(from, false).await),
        Request::GrabJobUniq => Some(engine.grab(from, true).await),

        Request::WorkStatus { handle, numerator, denominator } => {
            engine.work_status(handle, numerator, denominator).await;
            None
        },
        Request::WorkData { handle, data } => {
            engine.work_data(handle, data).await;
            None
        },
        Request::WorkWarning { handle, data } => {
            engine.work_warning(handle, data).await;
            None
        },
        Request::WorkException { handle, data } => {
            engine.work_exception(handle, data).await;
            None
        },
        Request::WorkComplete { handle, data } => {
            engine.work_complete(handle, data).await?;
            None
        },
        Request::WorkFail { handle } => {
            engine.work_fail(handle).await;
            None
        },

        Request::GetStatus { handle } => Some(engine.get_status(handle).await),
        Request::EchoReq { data } => Some(Response::Echo { data }),
    })
}

fn error_packet(error: &Error) -> Packet {
    Response::Error {
        code: error.wire_code(),
        message: bytes::Bytes::from(error.to_string()),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::persistence::NullQueue;

    #[tokio::test]
    async fn echo_round_trips() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let id = ConnectionId::next();
        let (tx, _rx) = mpsc::unbounded_channel();
        engine.register_connection(Connection::new(id, tx)).await;

        let packet = Packet::new(
            crate::wire::Magic::Request,
            crate::wire::Command::EchoReq,
            vec![Bytes::from("hello")],
        )
        .unwrap();

        let reply = dispatch_packet(&engine, id, packet).await.unwrap();
        assert_eq!(reply, Some(Response::Echo { data: Bytes::from("hello") }));
    }

    #[tokio::test]
    async fn submit_then_grab_assigns_job() {
        let engine = Engine::new("test", Arc::new(NullQueue));
        let client = ConnectionId::next();
        let (tx, _rx) = mpsc::unbounded_channel();
        engine.register_connection(Connection::new(client, tx)).await;
        let worker = ConnectionId::next();
        let (wtx, _wrx) = mpsc::unbounded_channel();
        engine.register_connection(Connection::new(worker, wtx)).await;
        engine.can_do(worker, Bytes::from("reverse")).await;

        let submit = Packet::new(
            crate::wire::Magic::Request,
            crate::wire::Command::SubmitJob,
            vec![Bytes::from("reverse"), Bytes::new(), Bytes::from("abc")],
        )
        .unwrap();
        let created = dispatch_packet(&engine, client, submit).await.unwrap().unwrap();
        assert!(matches!(created, Response::JobCreated { .. }));

        let assigned = engine.grab(worker, false).await;
        assert!(matches!(assigned, Response::JobAssign { .. }));
    }
}
