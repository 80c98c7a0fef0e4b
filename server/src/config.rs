use crate::accounts::DEFAULT_ACCOUNTS_FILE;
use crate::connection_table::DEFAULT_MAX_CONNECTIONS;
use crate::transport::udp::DEFAULT_CONNECTION_TIMEOUT;
use shared::DEFAULT_PORT;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    pub host: String,
    pub port: u16,
    /// Ticks per second
    pub tick_rate: u32,
    /// Account record file
    pub accounts_path: PathBuf,
    pub max_connections: usize,
    /// Silence after which the UDP transport drops a peer
    pub connection_timeout: Duration,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Time between ticks; a zero tick rate is treated as one tick per second
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tick_rate: 30,
            accounts_path: PathBuf::from(DEFAULT_ACCOUNTS_FILE),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }
}
