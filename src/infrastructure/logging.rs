//! Logging system configuration and initialization
//!
//! - Console and file output, each optional
//! - Structured JSON for the file output (optional)
//! - Level control from config, overridable with `RUST_LOG`
//! - Timestamps in WIB (Western Indonesia Time, UTC+7)
//! - The previous log file is renamed with its timestamp on startup

#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Subscriber, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const WIB_OFFSET_SECS: i32 = 7 * 3600;

// Keeps the non-blocking file writers alive for the whole process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

fn wib() -> FixedOffset {
    FixedOffset::east_opt(WIB_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Log timestamps in UTC+7
struct WibTimeFormatter;

impl FormatTime for WibTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&wib());
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Log directory next to the executable, or under the working directory.
pub fn get_log_directory() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
        .join("logs")
}

pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Renames an existing log file to `<stem>.<timestamp>.log`.
fn rotate_existing_log_file(log_dir: &Path, log_file_name: &str) -> Result<()> {
    let log_file_path = log_dir.join(log_file_name);
    if !log_file_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::metadata(&log_file_path).map_err(|e| anyhow!("Failed to get log file metadata: {}", e))?;
    let file_time = metadata
        .modified()
        .or_else(|_| metadata.created())
        .unwrap_or_else(|_| std::time::SystemTime::now());

    let datetime: chrono::DateTime<Utc> = file_time.into();
    let stamped = datetime.with_timezone(&wib());
    let file_stem = log_file_name.trim_end_matches(".log");
    let timestamped_name = format!("{}.{}.log", file_stem, stamped.format("%Y%m%dT%H%M%S"));

    std::fs::rename(&log_file_path, log_dir.join(&timestamped_name))
        .map_err(|e| anyhow!("Failed to rotate log file {}: {}", log_file_path.display(), e))?;
    Ok(())
}

/// Builds the filter from `RUST_LOG` or, failing that, from the configured level
/// with HTTP and runtime internals quieted unless tracing.
fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::new(level);
    if !level.to_lowercase().contains("trace") {
        for directive in [
            "reqwest=info".to_string(),
            "hyper=warn".to_string(),
            "hyper_util=warn".to_string(),
            "h2=warn".to_string(),
            "tokio=info".to_string(),
            "runtime=warn".to_string(),
            format!("checklist_crawler_lib={}", level),
            format!("checklist_crawler={}", level),
        ] {
            filter = filter.add_directive(directive.parse().map_err(|e| anyhow!("Invalid log directive {}: {}", directive, e))?);
        }
    }
    Ok(filter)
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::Layer::new()
        .with_writer(std::io::stdout)
        .with_timer(WibTimeFormatter)
        .with_target(false)
}

fn keep_guard(guard: tracing_appender::non_blocking::WorkerGuard) -> Result<()> {
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("Log guard registry poisoned"))?
        .push(guard);
    Ok(())
}

pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let log_dir = config.log_dir.clone().unwrap_or_else(get_log_directory);
    let env_filter = build_env_filter(&config.level)?;
    let registry = Registry::default().with(env_filter);

    if config.file_output {
        std::fs::create_dir_all(&log_dir).map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        rotate_existing_log_file(&log_dir, &config.file_name)?;
    }

    match (config.file_output, config.console_output) {
        (true, console) => {
            let (file_writer, file_guard) = non_blocking(rolling::never(&log_dir, &config.file_name));
            keep_guard(file_guard)?;

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);
                let console_out = console.then(console_layer);
                registry.with(file_layer).with(console_out).try_init()?;
            } else {
                // time + level + message only
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(WibTimeFormatter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false);
                let console_out = console.then(console_layer);
                registry.with(file_layer).with(console_out).try_init()?;
            }
        }
        (false, true) => {
            registry.with(console_layer()).try_init()?;
        }
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("📝 Logging system initialized");
    info!("Log level: {}", config.level);
    if config.file_output {
        info!("Log file: {:?}", log_dir.join(&config.file_name));
    }
    Ok(())
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Checklist Crawler System Information ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
    info!("=============================================");
}
