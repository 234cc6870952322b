mod drive_storage;
mod s3_storage;
mod sftp_storage;
mod storage_manager;

pub use drive_storage::DriveStorage;
pub use s3_storage::S3Storage;
pub use sftp_storage::SftpStorage;
pub use storage_manager::{CloudStatus, StorageManager};

use crate::config::CloudSettings;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AwsS3,
    GoogleDrive,
    Sftp,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::AwsS3, Self::GoogleDrive, Self::Sftp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsS3 => "aws_s3",
            Self::GoogleDrive => "google_drive",
            Self::Sftp => "sftp",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown storage provider: {}", s)))
    }
}

/// One object in a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Provider-specific address of the object (`s3://`, `sftp://`, Drive URL).
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub enabled: bool,
    pub connected: bool,
    /// Non-secret settings worth showing to an operator.
    pub details: BTreeMap<String, String>,
}

/// A remote backend images are replicated to.
///
/// Implementations are built from configuration and must not fail construction:
/// a backend that cannot be reached is kept in a disabled state, reports it via
/// [`StorageProvider::status`], and rejects every operation with
/// [`crate::error::UploadError::Disabled`].
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn is_enabled(&self) -> bool;
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()>;
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteFile>>;
    async fn delete(&self, remote_path: &str) -> Result<()>;
    fn status(&self) -> ProviderStatus;
}

/// Builds every provider whose section is enabled in `settings`.
pub async fn build_providers(
    settings: &CloudSettings,
) -> BTreeMap<ProviderKind, Arc<dyn StorageProvider>> {
    let mut providers: BTreeMap<ProviderKind, Arc<dyn StorageProvider>> = BTreeMap::new();

    if settings.aws_s3.enabled {
        let s3 = S3Storage::connect(settings.aws_s3.clone()).await;
        providers.insert(ProviderKind::AwsS3, Arc::new(s3));
    }
    if settings.google_drive.enabled {
        let drive = DriveStorage::connect(settings.google_drive.clone()).await;
        providers.insert(ProviderKind::GoogleDrive, Arc::new(drive));
    }
    if settings.sftp.enabled {
        let sftp = SftpStorage::connect(settings.sftp.clone()).await;
        providers.insert(ProviderKind::Sftp, Arc::new(sftp));
    }

    providers
}
