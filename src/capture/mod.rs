mod command;

pub use command::CommandCamera;

use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use utoipa::ToSchema;

/// Produces a new image file on demand.
#[async_trait::async_trait]
pub trait CaptureSource: Send + Sync {
    /// Captures one image. `filename` is relative to the source's image
    /// directory; `None` lets the source pick one.
    async fn capture(&self, filename: Option<&str>) -> Result<PathBuf, CaptureError>;

    /// Must not block on device I/O.
    fn status(&self) -> CameraStatus;

    /// Re-probes the device and returns the refreshed status.
    async fn detect(&self) -> Result<CameraStatus, CaptureError> {
        Ok(self.status())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CameraStatus {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub model: Option<String>,
    pub details: BTreeMap<String, String>,
}

/// A successful capture. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CaptureRecord {
    #[schema(value_type = String)]
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CaptureRecord {
    pub fn from_file(path: &Path, captured_at: DateTime<Utc>) -> Result<Self, CaptureError> {
        let metadata = std::fs::metadata(path)
            .map_err(|_| CaptureError::MissingOutput(path.to_path_buf()))?;
        Ok(Self {
            path: path.to_path_buf(),
            captured_at,
            size_bytes: metadata.len(),
        })
    }

    pub fn filename(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}
