use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::http::parser::DEFAULT_MAX_BODY_SIZE;
use crate::proxy::{MatchPolicy, UpstreamSettings};

/// Forwards requests to local backends by path prefix.
#[derive(Debug, Clone, Parser)]
#[command(name = "waypoint", version)]
pub struct Config {
    /// JSON file mapping path prefixes to backend ports
    #[arg(short = 'f', long, env = "WAYPOINT_MAPPING_FILE")]
    pub mapping_file: PathBuf,

    /// Port to listen on
    #[arg(short = 'p', long, env = "WAYPOINT_PORT")]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "WAYPOINT_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Host the backend ports are reached on
    #[arg(long, default_value = "localhost")]
    pub upstream_host: String,

    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Idle limit for each backend read; 0 waits forever
    #[arg(long, default_value_t = 60)]
    pub read_timeout_secs: u64,

    /// Largest request body accepted, in bytes; larger requests get 413
    #[arg(long, env = "WAYPOINT_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_SIZE)]
    pub max_body_bytes: usize,

    /// Which route wins when several prefixes match
    #[arg(long, value_enum, default_value_t = MatchPolicy::LongestPrefix)]
    pub match_policy: MatchPolicy,
}

impl Config {
    /// Parses the process arguments; prints usage and exits on error.
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }

    pub fn upstream_settings(&self) -> UpstreamSettings {
        UpstreamSettings {
            host: self.upstream_host.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: (self.read_timeout_secs > 0)
                .then(|| Duration::from_secs(self.read_timeout_secs)),
        }
    }
}
