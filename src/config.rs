//! Server configuration
//!
//! Every flag also reads an environment variable, so deployments can stay
//! env-only while local runs use the CLI.

use std::time::Duration;

use anyhow::ensure;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "pairlink-signaling", version, about = "Rendezvous + WebRTC signaling server")]
pub struct Config {
    /// Bind host.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Rendezvous code lifetime in seconds.
    #[arg(long, default_value_t = 600, env = "CODE_TTL_SECS")]
    pub code_ttl_secs: u64,

    /// Janitor sweep interval in seconds.
    #[arg(long, default_value_t = 60, env = "JANITOR_INTERVAL_SECS")]
    pub janitor_interval_secs: u64,

    /// Heartbeat interval in milliseconds; pings go out at 0.9x this.
    #[arg(long, default_value_t = 60_000, env = "WS_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// Read deadline for a connection that has just been accepted, in
    /// milliseconds.
    #[arg(long, default_value_t = 10_000, env = "WS_HANDSHAKE_MS")]
    pub handshake_ms: u64,

    /// Permissive development mode: skips the origin allowlist.
    #[arg(long, env = "DEV")]
    pub dev: bool,

    /// Allowed browser origins (exact origin or bare hostname), CSV.
    #[arg(long, value_delimiter = ',', env = "ALLOWED_ORIGINS")]
    pub allowed_origins: Vec<String>,

    /// Maximum inbound WS message size in bytes.
    #[arg(long, default_value_t = 1 << 20, env = "WS_MAX_MSG")]
    pub ws_max_msg: usize,

    /// Per-IP WS upgrades per minute; 0 disables.
    #[arg(long, default_value_t = 0, env = "WS_RATE_PER_MIN")]
    pub ws_rate_per_min: u32,

    /// Per-IP rendezvous HTTP requests per minute; 0 disables.
    #[arg(long, default_value_t = 0, env = "HTTP_RATE_PER_MIN")]
    pub http_rate_per_min: u32,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.heartbeat_ms > 0, "WS_HEARTBEAT_MS must be > 0");
        ensure!(self.code_ttl_secs > 0, "CODE_TTL_SECS must be > 0");
        ensure!(
            self.ws_max_msg > 1024,
            "WS_MAX_MSG too small: {}",
            self.ws_max_msg
        );
        Ok(())
    }
}
