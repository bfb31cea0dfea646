use std::net::SocketAddr;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::Parser;

/// Fleeting paste server.
#[derive(Parser, Debug)]
#[command(name = "fleeting-server", version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Where pastes live: `memory:`, `rocksdb:<path>`, `sqlite:<path>` or a
    /// `postgres://` url.
    #[arg(long, env = "DATABASE_URL", default_value = "rocksdb:database")]
    pub database_url: String,

    /// Connection pool size for the SQL backends.
    #[arg(long, env = "DATABASE_POOL_SIZE", default_value_t = 5)]
    pub pool_size: u32,

    /// Seconds between sweeps of dead pastes. 0 disables sweeping.
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 5 * 60)]
    pub sweep_interval_secs: u64,

    /// Honour the `x-test-now-ms` header. Never enable in production.
    #[arg(long, env = "TEST_MODE", value_parser = BoolishValueParser::new())]
    pub test_mode: bool,
}

impl Config {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
