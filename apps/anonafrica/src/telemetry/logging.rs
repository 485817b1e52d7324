//! Process-wide `tracing` setup for the terminal client.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;

/// Full `EnvFilter` directive string; replaces the level-derived default.
const FILTER_ENV: &str = "ANONAFRICA_LOG_FILTER";
/// Let transport crates log at debug/trace too.
const TRACE_DEPS_ENV: &str = "ANONAFRICA_TRACE_DEPS";

const CHATTY_DEPENDENCIES: &[&str] = &[
    "tokio_tungstenite",
    "tungstenite",
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_sctp",
    "webrtc_srtp",
    "webrtc_mdns",
    "native_tls",
    "mio",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
#[error("cannot open log file {}: {source}", path.display())]
pub struct LogFileError {
    path: PathBuf,
    #[source]
    source: io::Error,
}

static WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route `tracing` output to stderr or the configured file.
///
/// Only the first successful call installs a subscriber. If another one is
/// already global (tests, embedders) it is left alone.
pub fn init(config: &LogConfig) -> Result<(), LogFileError> {
    if WRITER_GUARD.get().is_some() {
        return Ok(());
    }
    let (writer, guard) = writer_for(config.file.as_deref())?;
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config.level))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level == LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .try_init()
        .is_ok();
    if installed {
        let _ = WRITER_GUARD.set(guard);
    }
    Ok(())
}

fn writer_for(file: Option<&Path>) -> Result<(NonBlocking, WorkerGuard), LogFileError> {
    let Some(path) = file else {
        return Ok(tracing_appender::non_blocking(io::stderr()));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LogFileError {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(tracing_appender::non_blocking(file))
}

fn env_filter(level: LogLevel) -> EnvFilter {
    match std::env::var(FILTER_ENV) {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(default_directives(level, trace_dependencies())),
    }
}

/// Debug and trace apply to this crate; dependencies stay at info unless
/// `trace_deps` is set.
fn default_directives(level: LogLevel, trace_deps: bool) -> String {
    if level < LogLevel::Debug {
        return level.directive().to_owned();
    }
    let own = level.directive();
    let deps = if trace_deps { own } else { "info" };
    let mut directives = format!("info,anonafrica_client_core={own},anonafrica={own}");
    for target in CHATTY_DEPENDENCIES {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(deps);
    }
    directives
}

fn trace_dependencies() -> bool {
    std::env::var(TRACE_DEPS_ENV).is_ok_and(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
