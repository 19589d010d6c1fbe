//! C10: environment-driven configuration via plain `env::var` lookups with
//! sane defaults, no config-file parser.

use std::env;
use std::time::Duration;

use nexo_core::SweepConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp_addr: String,
    pub dashboard_addr: String,
    pub max_payload_len: u32,
    pub writer_queue_capacity: usize,
    pub sweep: SweepConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let port = env::var("SERVER_PORT").unwrap_or_else(|_| "7878".to_owned());
        let dashboard_port = env::var("SERVER_DASHBOARD_PORT").unwrap_or_else(|_| "7879".to_owned());
        let sweep_cadence_ms: u64 =
            env::var("NEXO_SWEEP_CADENCE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(1_000);
        let sweep_batch: usize = env::var("NEXO_SWEEP_BATCH").ok().and_then(|v| v.parse().ok()).unwrap_or(256);

        Self {
            tcp_addr: format!("{host}:{port}"),
            dashboard_addr: format!("{host}:{dashboard_port}"),
            max_payload_len: nexo_protocol::DEFAULT_MAX_PAYLOAD_LEN,
            writer_queue_capacity: 1024,
            sweep: SweepConfig { cadence: Duration::from_millis(sweep_cadence_ms), batch: sweep_batch },
        }
    }

    /// A config suitable for tests: ephemeral ports on loopback and a fast
    /// sweep cadence so visibility/delay/TTL tests don't need to wait a
    /// full second per tick.
    pub fn for_test() -> Self {
        Self {
            tcp_addr: "127.0.0.1:0".to_owned(),
            dashboard_addr: "127.0.0.1:0".to_owned(),
            max_payload_len: nexo_protocol::DEFAULT_MAX_PAYLOAD_LEN,
            writer_queue_capacity: 1024,
            sweep: SweepConfig { cadence: Duration::from_millis(20), batch: 256 },
        }
    }
}

pub fn log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned())
}
