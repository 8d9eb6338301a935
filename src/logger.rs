//! Log output setup.
//!
//! [`build`] assembles a `tracing` subscriber around an explicit writer, so
//! tests and the database tracer can be pointed at an in-memory sink instead
//! of a process-wide stream.

use chrono::{Local, Utc};
use chrono_tz::Tz;
use clap::ValueEnum;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::dispatcher::SetGlobalDefaultError;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

/// Minimum level written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

impl LogLevel {
    /// `tracing` has nothing above ERROR, so fatal and panic share its filter.
    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

/// Zone log timestamps are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTimezone {
    /// The host's local zone.
    Local,
    /// An IANA zone such as `Europe/Paris`.
    Zone(Tz),
}

impl LogTimezone {
    pub const UTC: LogTimezone = LogTimezone::Zone(Tz::UTC);
}

/// Parse `local`, `utc` (any case) or an IANA zone name.
pub fn parse_timezone(s: &str) -> Result<LogTimezone, String> {
    if s.eq_ignore_ascii_case("local") {
        return Ok(LogTimezone::Local);
    }
    if s.eq_ignore_ascii_case("utc") {
        return Ok(LogTimezone::UTC);
    }
    s.parse::<Tz>()
        .map(LogTimezone::Zone)
        .map_err(|_| format!("unknown time zone {:?}", s))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub output: LogOutput,
    pub timezone: LogTimezone,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Stdout,
            timezone: LogTimezone::UTC,
        }
    }
}

struct Timestamp(LogTimezone);

impl FormatTime for Timestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        match self.0 {
            LogTimezone::Local => write!(w, "{}", Local::now().format(TIMESTAMP_FORMAT)),
            LogTimezone::Zone(tz) => write!(
                w,
                "{}",
                Utc::now().with_timezone(&tz).format(TIMESTAMP_FORMAT)
            ),
        }
    }
}

/// Build a subscriber writing to `writer`. `RUST_LOG` directives are layered
/// on top of the configured level.
pub fn build<W>(config: &LoggerConfig, writer: W) -> Dispatch
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.filter().into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(Timestamp(config.timezone))
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(writer)
        .finish();

    Dispatch::new(subscriber)
}

/// Install the process-wide subscriber for the configured output stream and
/// return it, so other components can be handed the same sink.
pub fn init(config: &LoggerConfig) -> Result<Dispatch, SetGlobalDefaultError> {
    match config.output {
        LogOutput::Stdout => install(config, io::stdout),
        LogOutput::Stderr => install(config, io::stderr),
    }
}

/// Build a subscriber around `writer` and make it the global default.
pub fn install<W>(config: &LoggerConfig, writer: W) -> Result<Dispatch, SetGlobalDefaultError>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let dispatch = build(config, writer);
    tracing::dispatcher::set_global_default(dispatch.clone())?;
    Ok(dispatch)
}

/// In-memory log destination.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

pub struct MemorySinkWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for MemorySinkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemorySink {
    type Writer = MemorySinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MemorySinkWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(level: LogLevel, f: impl FnOnce()) -> MemorySink {
        capture_in(LoggerConfig { level, ..LoggerConfig::default() }, f)
    }

    fn capture_in(config: LoggerConfig, f: impl FnOnce()) -> MemorySink {
        let sink = MemorySink::new();
        let dispatch = build(&config, sink.clone());
        tracing::dispatcher::with_default(&dispatch, f);
        sink
    }

    #[test]
    fn test_writes_message_and_fields() {
        let sink = capture(LogLevel::Info, || {
            tracing::info!(addr = "127.0.0.1:8080", "listening");
        });
        let out = sink.contents();
        assert!(out.contains("INFO"), "{}", out);
        assert!(out.contains("listening"), "{}", out);
        assert!(out.contains("addr=\"127.0.0.1:8080\""), "{}", out);
        assert!(out.contains("logger.rs"), "{}", out);
    }

    #[test]
    fn test_level_filtering() {
        let sink = capture(LogLevel::Warn, || {
            tracing::info!("hidden");
            tracing::warn!("shown");
        });
        let out = sink.contents();
        assert!(!out.contains("hidden"));
        assert!(out.contains("shown"));

        let sink = capture(LogLevel::Fatal, || {
            tracing::warn!("hidden");
            tracing::error!("shown");
        });
        let out = sink.contents();
        assert!(!out.contains("hidden"));
        assert!(out.contains("shown"));
    }

    #[test]
    fn test_utc_timestamp_format() {
        let sink = capture(LogLevel::Info, || tracing::info!("tick"));
        let line = sink.lines().remove(0);
        let ts = line.split_whitespace().next().unwrap();
        // 2024-01-02T03:04:05.678+00:00
        assert_eq!(ts.len(), 29, "{}", ts);
        assert!(ts.ends_with("+00:00"), "{}", ts);
        assert_eq!(&ts[10..11], "T");
    }

    fn first_timestamp(sink: &MemorySink) -> String {
        let line = sink.lines().remove(0);
        line.split_whitespace().next().unwrap().to_string()
    }

    #[test]
    fn test_named_zone_offset() {
        // Kolkata has no daylight saving time.
        let config = LoggerConfig {
            timezone: parse_timezone("Asia/Kolkata").unwrap(),
            ..LoggerConfig::default()
        };
        let sink = capture_in(config, || tracing::info!("tick"));
        let ts = first_timestamp(&sink);
        assert_eq!(ts.len(), 29, "{}", ts);
        assert!(ts.ends_with("+05:30"), "{}", ts);
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("local").unwrap(), LogTimezone::Local);
        assert_eq!(parse_timezone("UTC").unwrap(), LogTimezone::UTC);
        assert_eq!(parse_timezone("utc").unwrap(), LogTimezone::UTC);
        assert_eq!(
            parse_timezone("Europe/Paris").unwrap(),
            LogTimezone::Zone(Tz::Europe__Paris)
        );
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
        assert!(parse_timezone("").is_err());
    }

    #[test]
    fn test_install_shares_sink_with_returned_dispatch() {
        let sink = MemorySink::new();
        let dispatch = install(&LoggerConfig::default(), sink.clone()).unwrap();

        // No scoped default on a fresh thread: this goes through the global one.
        std::thread::spawn(|| tracing::info!("from global"))
            .join()
            .unwrap();
        tracing::dispatcher::with_default(&dispatch, || tracing::warn!("from handle"));

        let out = sink.contents();
        assert!(out.contains("from global"), "{}", out);
        assert!(out.contains("from handle"), "{}", out);
        assert!(install(&LoggerConfig::default(), MemorySink::new()).is_err());
    }

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Info.filter(), LevelFilter::INFO);
        assert_eq!(LogLevel::Warn.filter(), LevelFilter::WARN);
        assert_eq!(LogLevel::Panic.filter(), LevelFilter::ERROR);
    }
}
