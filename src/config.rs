//! Configuration consumed by the core. Per spec.md §6, the core only cares
//! about bind host/port, reactor thread count, default per-function worker
//! timeout, and the chosen persistence backend's identifier plus opaque
//! options. Everything else (daemon flags, logging format, ...) lives in the
//! `jobforged` binary's `Args`.

use std::net::{IpAddr, Ipv4Addr};

/// Default Gearman-compatible port (spec.md §6).
pub const DEFAULT_PORT: u16 = 4730;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: IpAddr,
    pub port: u16,
    /// Number of tokio worker threads backing the reactor. One is a valid
    /// choice (single-threaded cooperative core); more gives shared-nothing
    /// parallel reactors per spec.md §5.
    pub reactor_threads: usize,
    /// Advisory per-function worker timeout used when a worker doesn't
    /// specify one via CAN_DO_TIMEOUT.
    pub default_worker_timeout: Option<u32>,
    /// Selected persistence backend, if any.
    pub persistence: PersistenceConfig,
    /// Hard cap on a single packet's argument region, per spec.md §6.
    pub max_packet_size: u32,
}

#[derive(Clone, Debug, Default)]
pub struct PersistenceConfig {
    /// Opaque backend identifier (e.g. `"sqlite"`, `"memcached"`); `None`
    /// means the in-memory-only `NullQueue` is used.
    pub backend: Option<String>,
    /// Backend-specific options, passed through uninterpreted by the core.
    pub options: Vec<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: DEFAULT_PORT,
            reactor_threads: 1,
            default_worker_timeout: None,
            persistence: PersistenceConfig::default(),
            max_packet_size: 1024 * 1024,
        }
    }
}
