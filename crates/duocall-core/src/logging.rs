//! Logging setup and privacy helpers.
//!
//! One-shot [`init`] installs a `tracing` subscriber with a reloadable level
//! filter; [`set_log_level`] retunes it at runtime. Call [`init`] once at
//! process startup, before constructing the first engine.
//!
//! Tokens must only ever reach log payloads through [`redacted`]; view
//! handles are never logged at all.

use std::sync::OnceLock;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

/// Log verbosity, coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

static RELOAD_HANDLE: OnceLock<reload::Handle<LevelFilter, Registry>> = OnceLock::new();

/// Install the global subscriber at `Info`.
pub fn init() {
    init_with_level(LogLevel::Info);
}

/// Install the global subscriber at the given level.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_with_level(level: LogLevel) {
    let (filter, handle) = reload::Layer::new(LevelFilter::from(level));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        let _ = RELOAD_HANDLE.set(handle);
    }
}

/// Retune the level of the subscriber installed by [`init`].
///
/// A no-op when some other subscriber owns the process.
pub fn set_log_level(level: LogLevel) {
    if let Some(handle) = RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = LevelFilter::from(level));
    }
}

/// Redact a secret for logging: a short prefix plus the total length.
pub fn redacted(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}…({} chars)", prefix, secret.chars().count())
}
