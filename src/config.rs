//! Configuration parsing.
//!
//! Every setting is a command-line flag with an environment variable
//! fallback; a flag given on the command line wins over the environment.

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::buildinfo::VERSION;
use crate::db::TracerConfig;
use crate::logger::{parse_timezone, LogLevel, LogOutput, LogTimezone, LoggerConfig};

/// Web application server over an embedded SQLite store.
#[derive(Parser, Debug, Clone)]
#[command(name = "adequate", version = VERSION, about, long_about = None)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "HTTP_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub http_listen_addr: SocketAddr,

    /// SQLite database file path
    #[arg(long, env = "STORE_SQLITE_PATH", default_value = "data/db")]
    pub store_sqlite_path: PathBuf,

    /// Static files directory (for serving UI assets)
    #[arg(long, env = "HTTP_STATIC_DIR")]
    pub http_static_dir: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "LOGGER_LEVEL", value_enum, ignore_case = true, default_value = "info")]
    pub logger_level: LogLevel,

    /// Log output stream
    #[arg(long, env = "LOGGER_OUTPUT", value_enum, ignore_case = true, default_value = "stdout")]
    pub logger_output: LogOutput,

    /// Timezone for log timestamps: an IANA zone name, UTC or Local
    #[arg(long, env = "LOGGER_TIMEZONE", value_parser = parse_timezone, default_value = "UTC")]
    pub logger_timezone: LogTimezone,

    /// Report successful SQL calls slower than this many milliseconds (0 disables)
    #[arg(long, env = "DB_SLOW_THRESHOLD_MS", default_value_t = 50)]
    pub db_slow_threshold_ms: u64,

    /// Hide SQL argument values in error logs
    #[arg(long, env = "DB_MASK_ARGS", default_value_t = true, action = ArgAction::Set)]
    pub db_mask_args: bool,

    /// Report one in every N slow SQL calls per connection (0 or 1 reports all)
    #[arg(long, env = "DB_SAMPLE_EVERY", default_value_t = 1)]
    pub db_sample_every: u32,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn logger(&self) -> LoggerConfig {
        LoggerConfig {
            level: self.logger_level,
            output: self.logger_output,
            timezone: self.logger_timezone,
        }
    }

    pub fn tracer(&self) -> TracerConfig {
        TracerConfig {
            slow_threshold: Duration::from_millis(self.db_slow_threshold_ms),
            mask_args: self.db_mask_args,
            sample_every: self.db_sample_every,
        }
    }
}
