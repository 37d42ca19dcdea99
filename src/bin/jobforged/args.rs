use std::net::{IpAddr, Ipv4Addr};

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = jobforge::config::DEFAULT_PORT)]
    pub port: u16,
    /// Number of reactor (tokio worker) threads.
    #[arg(short = 'T', long, default_value_t = 1)]
    pub threads: usize,
    /// Advisory per-function worker timeout in seconds, handed to workers
    /// that register without their own `CAN_DO_TIMEOUT`.
    #[arg(short = 't', long)]
    pub worker_timeout: Option<u32>,
    /// Persistence backend identifier (e.g. "sqlite"); omit for in-memory
    /// only. No concrete backend ships in this crate, so setting this
    /// refuses to start rather than silently falling back.
    #[arg(short = 'q', long)]
    pub queue_backend: Option<String>,
    /// `key=value` options passed through to the persistence backend.
    #[arg(short = 'Q', long = "queue-option")]
    pub queue_options: Vec<String>,
    /// Hard cap on a single packet's argument region, in bytes.
    #[arg(short = 'z', long, default_value_t = 1024 * 1024)]
    pub max_packet_size: u32,
    /// Enables human-friendly logging.
    #[arg(short, long, default_value_t)]
    pub debug: bool,
}
