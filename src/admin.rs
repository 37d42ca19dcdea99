//! Admin TEXT console (spec.md §6: "deliberately peripheral", but carried
//! as ambient surface area the way a real daemon ships one). Supports
//! `status`, `workers`, `maxqueue <func> <n>`, `shutdown [graceful]`,
//! `version`. Structured bodies (`status`) are serialized with
//! `serde_yaml`, mirroring the teacher's `encoder::pack_yaml` used for
//! beanstalkd's `stats`/`stats-tube` bodies.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::model::server::Engine;

#[derive(Debug, Serialize)]
struct FunctionStatus {
    name: String,
    #[serde(rename = "queued-jobs")]
    queued_jobs: usize,
    workers: usize,
    sleeping: usize,
}

/// Handles one already-tokenized admin line and returns the bytes to write
/// back, always ending in the `.\n` terminator spec.md names. Takes the
/// engine as an `Arc` (rather than a borrow) because a graceful `shutdown`
/// spawns a task that outlives this call.
pub async fn handle(engine: &Arc<Engine>, tokens: &[Vec<u8>], cancel: &CancellationToken) -> Vec<u8> {
    let Some(command) = tokens.first() else {
        return b"ERROR unknown command\r\n.\n".to_vec();
    };

    match command.as_slice() {
        b"version" => format!("OK {}\r\n.\n", env!("CARGO_PKG_VERSION")).into_bytes(),

        b"status" => {
            let mut statuses = Vec::new();
            for name in engine.function_names().await {
                if let Some((queued, workers, sleeping)) = engine.function_stats(&name).await {
                    statuses.push(FunctionStatus {
                        name: String::from_utf8_lossy(&name).into_owned(),
                        queued_jobs: queued,
                        workers,
                        sleeping,
                    });
                }
            }
            match serde_yaml::to_string(&statuses) {
                Ok(yaml) => format!("OK\r\n{yaml}.\n").into_bytes(),
                Err(_) => b"ERROR could not serialize status\r\n.\n".to_vec(),
            }
        },

        b"workers" => {
            let mut out = String::from("OK\r\n");
            for (id, client_id, registrations) in engine.worker_summaries().await {
                let functions: Vec<String> =
                    registrations.iter().map(|f| String::from_utf8_lossy(f).into_owned()).collect();
                let label = client_id
                    .map(|c| String::from_utf8_lossy(&c).into_owned())
                    .unwrap_or_else(|| format!("{id:?}"));
                out.push_str(&format!("{label} {}\r\n", functions.join(",")));
            }
            out.push_str(".\n");
            out.into_bytes()
        },

        b"maxqueue" => {
            let (Some(function), Some(n)) = (tokens.get(1), tokens.get(2)) else {
                return b"ERROR usage: maxqueue <func> <n>\r\n.\n".to_vec();
            };
            let max = std::str::from_utf8(n).ok().and_then(|s| s.parse::<usize>().ok());
            match max {
                Some(max) => {
                    engine.set_max_queue(&Bytes::copy_from_slice(function), Some(max)).await;
                    b"OK\r\n.\n".to_vec()
                },
                None => b"ERROR invalid count\r\n.\n".to_vec(),
            }
        },

        b"shutdown" => {
            let graceful = tokens.get(1).map(|t| t.as_slice()) == Some(b"graceful");
            if graceful {
                engine.begin_drain().await;
                // Stops new SUBMIT_JOBs (Engine::submit_job checks
                // is_draining) and tells the accept loop to stop taking new
                // connections (wait_for_drain_started). Once whatever work
                // was already in flight finishes, tear down the remaining
                // connections so the process can actually exit (§I5).
                let engine = engine.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    engine.wait_until_drained().await;
                    cancel.cancel();
                });
            } else {
                cancel.cancel();
            }
            b"OK\r\n.\n".to_vec()
        },

        _ => b"ERROR unknown command\r\n.\n".to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::NullQueue;

    #[tokio::test]
    async fn version_reports_crate_version() {
        let engine = Arc::new(Engine::new("test", Arc::new(NullQueue)));
        let cancel = CancellationToken::new();
        let reply = handle(&engine, &[b"version".to_vec()], &cancel).await;
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("OK "));
        assert!(text.ends_with(".\n"));
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let engine = Arc::new(Engine::new("test", Arc::new(NullQueue)));
        let cancel = CancellationToken::new();
        let reply = handle(&engine, &[b"bogus".to_vec()], &cancel).await;
        assert!(String::from_utf8(reply).unwrap().starts_with("ERROR"));
    }

    #[tokio::test]
    async fn graceful_shutdown_begins_draining_without_cancelling() {
        let engine = Arc::new(Engine::new("test", Arc::new(NullQueue)));
        let cancel = CancellationToken::new();
        let _ = handle(&engine, &[b"shutdown".to_vec(), b"graceful".to_vec()], &cancel).await;
        assert!(engine.is_draining().await);
        assert!(!cancel.is_cancelled());
    }
}
