mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Level};

use crate::args::Args;
use jobforge::config::{PersistenceConfig, ServerConfig};
use jobforge::model::Engine;
use jobforge::persistence::{NullQueue, PersistentQueue};

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.threads.max(1))
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("failed to start runtime: {error}");
            return ExitCode::from(111);
        },
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let config = ServerConfig {
        listen: args.listen,
        port: args.port,
        reactor_threads: args.threads,
        default_worker_timeout: args.worker_timeout,
        persistence: PersistenceConfig {
            backend: args.queue_backend,
            options: args
                .queue_options
                .iter()
                .filter_map(|kv| kv.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
        max_packet_size: args.max_packet_size,
    };

    let persistence: Arc<dyn PersistentQueue> = match &config.persistence.backend {
        None => Arc::new(NullQueue),
        Some(backend) => {
            // No concrete backend ships in this crate (spec.md names
            // persistence backends as pluggable, external collaborators) —
            // refuse to start rather than silently running in-memory-only
            // under a config that promised durability.
            error!(%backend, "no persistence backend compiled into this binary");
            return ExitCode::from(2);
        },
    };

    let engine = Arc::new(Engine::new(hostname_prefix(), persistence));

    if let Err(error) = engine.replay().await {
        error!(%error, "persistence replay failed, refusing to start");
        return ExitCode::from(1);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    let listener = match TcpListener::bind((config.listen, config.port)).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, "failed to listen for connections");
            return ExitCode::from(111);
        },
    };

    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    let exit_code = match accept_loop(
        engine,
        cancel,
        shutdown_hold,
        listener,
        config.max_packet_size as usize,
    )
    .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    };

    // Dropped once every spawned connection task has finished (each holds a
    // clone), so this only resolves once in-flight work has drained.
    shutdown_wait.recv().await;

    exit_code
}

fn hostname_prefix() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "jobforged".to_string())
}

async fn accept_loop(
    engine: Arc<Engine>,
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
    listener: TcpListener,
    max_packet_size: usize,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        match select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => return Ok(()),
            _ = engine.wait_for_drain_started() => {
                info!("graceful shutdown: no longer accepting new connections");
                return Ok(());
            },
        } {
            Ok((conn, peer)) => {
                let engine = engine.clone();
                let cancel = cancel.clone();
                let shutdown_hold = shutdown_hold.clone();
                tokio::spawn(serve_connection(engine, cancel, shutdown_hold, conn, peer, max_packet_size));
            },
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        };
    }
}

#[instrument(name = "client_loop", skip_all, fields(%peer))]
async fn serve_connection(
    engine: Arc<Engine>,
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    conn: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    max_packet_size: usize,
) {
    if let Err(error) = conn.set_nodelay(true) {
        warn!(%error, "setting NODELAY");
    }

    debug!("accepted connection");

    if let Err(error) = jobforge::dispatch::run(engine, cancel, conn, max_packet_size).await {
        warn!(%error, "connection ended with error");
    }
}
