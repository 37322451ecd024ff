//! CLI / configuration surface.
//!
//! An external collaborator per the design this crate follows: its shape is
//! pinned (the core needs these six knobs), but the parsing logic itself is
//! not part of the algorithmic core and is kept deliberately small.

use std::path::PathBuf;

use clap::Parser;

/// Configuration consumed once at startup.
#[derive(Debug, Clone, Parser)]
#[command(name = "scatterweb", about = "A single-process static file server")]
pub struct Config {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 9090)]
    pub port: u16,

    /// Directory under which requested paths are resolved.
    #[arg(long)]
    pub docroot: PathBuf,

    /// Idle timeout, in milliseconds, before a quiet connection is closed.
    #[arg(long = "idle-timeout-ms", default_value_t = 60_000)]
    pub idle_timeout_ms: u64,

    /// Number of worker threads draining the task queue.
    #[arg(long, default_value_t = 8)]
    pub workers: usize,

    /// Capacity of the worker task queue before new tasks are rejected.
    #[arg(long = "queue-capacity", default_value_t = 4096)]
    pub queue_capacity: usize,

    /// Use level-triggered readiness instead of the default edge-triggered,
    /// one-shot mode. Still correct, but loses the single-wakeup-drains-all
    /// guarantee the scatter-read buffer is built to exploit.
    #[arg(long = "level-triggered", default_value_t = false)]
    pub level_triggered: bool,

    /// Log level passed through to `env_logger`.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Path to use when the request path is `/`.
    pub fn index_path(&self) -> &'static str {
        "/index.html"
    }
}
