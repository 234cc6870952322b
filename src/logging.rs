//! Tracing setup plus read-back of the JSON log file that backs the log viewer.

use crate::config::LoggingSettings;
use crate::prelude::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use utoipa::ToSchema;

pub const DEFAULT_RECENT_LOGS: usize = 100;

/// Installs the global subscriber: human-readable output on stdout and one JSON
/// object per line appended to `settings.file`. `RUST_LOG` overrides the level.
pub fn init_tracing(settings: &LoggingSettings) -> Result<LogSink> {
    if let Some(parent) = settings.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .try_init();
    if installed.is_err() {
        debug!("Tracing subscriber already installed");
    }

    Ok(LogSink::new(&settings.file))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

#[derive(Deserialize)]
struct JsonLine {
    timestamp: String,
    level: String,
    #[serde(default)]
    fields: JsonFields,
}

#[derive(Deserialize, Default)]
struct JsonFields {
    #[serde(default)]
    message: String,
}

impl LogRecord {
    fn parse(line: &str) -> Self {
        match serde_json::from_str::<JsonLine>(line) {
            Ok(json) => Self {
                timestamp: json.timestamp,
                level: json.level,
                message: json.fields.message,
            },
            Err(_) => Self {
                timestamp: Utc::now().to_rfc3339(),
                level: "INFO".to_string(),
                message: line.to_string(),
            },
        }
    }
}

/// Handle on the log file written by [`init_tracing`].
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last `limit` records, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<LogRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let skip = lines.len().saturating_sub(limit);
        Ok(lines[skip..].iter().map(|l| LogRecord::parse(l)).collect())
    }

    /// Truncates the file. The subscriber keeps appending to the same handle.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::OpenOptions::new().write(true).open(&self.path).await {
            Ok(file) => file.set_len(0).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
