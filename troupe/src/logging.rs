// Logging bootstrap for the troupe runtime, built on the `tracing`
// ecosystem. Collaborators that configure verbosity in terms of the
// severity model map it to a tracing level through `severity_level`.

use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter};

use troupe_api::verbosity::{Severity, UnsupportedSeverity, Verbosity};

/// Configuration for the logging bootstrap.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level to display.
    pub level: Level,
    /// Include file and line information.
    pub show_file_line: bool,
    /// Include thread name/id.
    pub show_thread_info: bool,
    /// Include uptime timestamps.
    pub show_time: bool,
    /// Target filter expressions, "target=level,target2=level2,...".
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

/// Initializes the global subscriber once; later calls are ignored.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let mut env_filter = EnvFilter::from_default_env().add_directive(config.level.into());
        if let Some(filters) = &config.target_filters {
            for filter in filters.split(',') {
                if let Ok(directive) = filter.parse() {
                    env_filter = env_filter.add_directive(directive);
                }
            }
        }

        let ansi = atty::is(atty::Stream::Stdout);
        let layer = fmt::layer()
            .with_ansi(ansi)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        if config.show_time {
            install(
                Registry::default()
                    .with(env_filter)
                    .with(layer.with_timer(fmt::time::uptime())),
            );
        } else {
            install(Registry::default().with(env_filter).with(layer.without_time()));
        }
    });
}

fn install<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("error setting global tracing subscriber: {}", err);
    }
}

/// Reasonable defaults for most binaries.
pub fn init_default() {
    init(LogConfig::default());
}

/// Quiet configuration for test binaries: warnings and errors only.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Maps a log severity to the tracing level records are emitted at.
pub fn severity_level(severity: Severity) -> Result<Level, UnsupportedSeverity> {
    Ok(match severity {
        Severity::Crash | Severity::Critical | Severity::Error => Level::ERROR,
        Severity::Warning => Level::WARN,
        Severity::Processing | Severity::Status | Severity::Info => Level::INFO,
        Severity::Debug => Level::DEBUG,
        Severity::Unsupported => return Err(UnsupportedSeverity),
    })
}

/// Maps an operator verbosity straight to a tracing level.
pub fn verbosity_level(verbosity: Verbosity) -> Level {
    // The severity table never yields Unsupported here.
    severity_level(verbosity.severity()).unwrap_or(Level::INFO)
}
