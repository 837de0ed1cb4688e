use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub const LOG_FILE_PREFIX: &str = "subpayd.log";

pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
    pub rotation: Rotation,
    pub file_permissions: u32,
    pub max_log_files: Option<usize>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: true,
            log_dir: PathBuf::from("./logs"),
            rotation: Rotation::DAILY,
            file_permissions: 0o640, // rw-r-----: owner read/write, group read, no others
            max_log_files: Some(30), // Keep 30 days of logs by default
        }
    }
}

impl LoggingConfig {
    /// Default configuration writing under `<data_dir>/logs`
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            log_dir: data_dir.join("logs"),
            ..Self::default()
        }
    }
}

pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow::anyhow!(
            "At least one output (console or file) must be enabled"
        ));
    }

    if config.file_output {
        fs::create_dir_all(&config.log_dir)?;

        // rwxr-x---
        fs::set_permissions(&config.log_dir, Permissions::from_mode(0o750))?;

        if let Some(max_files) = config.max_log_files {
            cleanup_old_log_files(&config.log_dir, max_files)?;
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = if config.file_output {
        let file_appender =
            RollingFileAppender::new(config.rotation.clone(), &config.log_dir, LOG_FILE_PREFIX);
        Some(
            fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_current_span(true)
                .with_span_list(true),
        )
    } else {
        None
    };

    let console_layer = if config.console_output {
        Some(
            fmt::layer()
                .pretty()
                .with_thread_ids(true)
                .with_target(true),
        )
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    if config.file_output {
        restrict_log_file_permissions(&config.log_dir, config.file_permissions);
    }

    Ok(())
}

/// Clean up old log files based on retention policy
pub(crate) fn cleanup_old_log_files(log_dir: &Path, max_files: usize) -> anyhow::Result<()> {
    let mut log_files: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let path = entry.path();

            let is_log = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.starts_with(LOG_FILE_PREFIX));

            if path.is_file() && is_log {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            } else {
                None
            }
        })
        .collect();

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(max_files) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to remove old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

/// Best effort: the appender creates files lazily with the process umask
fn restrict_log_file_permissions(log_dir: &Path, mode: u32) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };

    for path in entries.flatten().map(|entry| entry.path()) {
        let is_log = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(false, |name| name.starts_with(LOG_FILE_PREFIX));
        if path.is_file() && is_log {
            if let Err(e) = fs::set_permissions(&path, Permissions::from_mode(mode)) {
                eprintln!("Failed to set permissions on log file {:?}: {}", path, e);
            }
        }
    }
}
