use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::ProviderKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Retention error: {0}")]
    Retention(#[from] RetentionError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("No active storage provider")]
    ProviderUnavailable,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

impl Error {
    /// Whether an upload that failed with this error is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upload(e) => e.is_retryable(),
            Error::IO(_) => true,
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file error: {0}")]
    File(String),

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to persist configuration: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture command failed: {0}")]
    CommandFailed(String),

    #[error("Capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("Capture reported success but {0:?} was not written")]
    MissingOutput(PathBuf),

    #[error("Capture I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum RetentionError {
    #[error("Failed to read image directory {path:?}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },

    #[error("Invalid image name: {0}")]
    InvalidName(String),

    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Failed to delete {path:?}: {source}")]
    Delete { path: PathBuf, source: io::Error },

    #[error("Failed to archive images: {0}")]
    Archive(#[from] zip::result::ZipError),
}

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("Storage provider {0} is disabled")]
    Disabled(ProviderKind),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Google Drive error: {0}")]
    Drive(String),

    #[error("SFTP error: {0}")]
    Sftp(String),

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("Local file unavailable: {0}")]
    LocalFile(String),

    #[error("Remote object not found: {0}")]
    NotFound(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UploadError::LocalFile(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("Server initialization error: {0}")]
    Init(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Drive(err.to_string())
    }
}

impl From<ssh2::Error> for UploadError {
    fn from(err: ssh2::Error) -> Self {
        UploadError::Sftp(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Upload(UploadError::from(err))
    }
}

impl From<ssh2::Error> for Error {
    fn from(err: ssh2::Error) -> Self {
        Error::Upload(UploadError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_unavailable_is_not_retried() {
        assert!(!Error::ProviderUnavailable.is_retryable());
        assert!(!Error::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn backend_failures_are_retried() {
        assert!(Error::Upload(UploadError::S3("503".into())).is_retryable());
        assert!(Error::Upload(UploadError::Disabled(ProviderKind::Sftp)).is_retryable());
        assert!(Error::Upload(UploadError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!Error::Upload(UploadError::LocalFile("gone".into())).is_retryable());
    }
}
