#![allow(dead_code)]

use landslide_monitor::capture::{CameraStatus, CaptureSource};
use landslide_monitor::config::{ConfigStore, Settings};
use landslide_monitor::error::{CaptureError, UploadError};
use landslide_monitor::prelude::*;
use landslide_monitor::scheduler::SchedulerOptions;
use landslide_monitor::storage::{ProviderKind, ProviderStatus, RemoteFile, StorageProvider};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Writes a small fake JPEG for every capture.
pub struct FakeCamera {
    dir: PathBuf,
    pub fail: AtomicBool,
    pub captures: AtomicU32,
    delay: Duration,
}

impl FakeCamera {
    pub fn new(dir: &Path) -> Arc<Self> {
        Self::with_delay(dir, Duration::ZERO)
    }

    pub fn with_delay(dir: &Path, delay: Duration) -> Arc<Self> {
        std::fs::create_dir_all(dir).unwrap();
        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail: AtomicBool::new(false),
            captures: AtomicU32::new(0),
            delay,
        })
    }

    pub fn count(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CaptureSource for FakeCamera {
    async fn capture(&self, filename: Option<&str>) -> Result<PathBuf, CaptureError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable("lens cap on".into()));
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        let name = filename
            .map(str::to_string)
            .unwrap_or_else(|| format!("fake_{}.jpg", n));
        let path = self.dir.join(name);
        std::fs::write(&path, b"\xFF\xD8fake-jpeg\xFF\xD9")?;
        Ok(path)
    }

    fn status(&self) -> CameraStatus {
        CameraStatus {
            kind: "fake".into(),
            status: if self.fail.load(Ordering::SeqCst) {
                "unavailable".into()
            } else {
                "active".into()
            },
            model: Some("Test Camera".into()),
            details: BTreeMap::new(),
        }
    }
}

/// In-memory provider. Can be disabled at runtime, slowed down, or told to fail
/// a number of uploads.
pub struct FakeProvider {
    kind: ProviderKind,
    delay: Duration,
    pub enabled: AtomicBool,
    pub failures_left: AtomicU32,
    pub attempts: AtomicU32,
    pub uploads: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Self::with_delay(kind, Duration::ZERO)
    }

    pub fn with_delay(kind: ProviderKind, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            delay,
            enabled: AtomicBool::new(true),
            failures_left: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            uploads: Mutex::new(Vec::new()),
        })
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.is_enabled() {
            return Err(UploadError::Disabled(self.kind).into());
        }
        if !local_path.is_file() {
            return Err(UploadError::LocalFile(format!("{:?}", local_path)).into());
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(UploadError::S3("injected failure".into()).into());
        }
        self.uploads.lock().unwrap().push(remote_path.to_string());
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        if !self.uploaded().iter().any(|name| name == remote_path) {
            return Err(UploadError::NotFound(remote_path.to_string()).into());
        }
        std::fs::write(local_path, format!("remote:{}", remote_path))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteFile>> {
        Ok(self
            .uploaded()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| RemoteFile {
                url: format!("fake://{}", name),
                name,
                size: 0,
                modified: None,
            })
            .collect())
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let mut uploads = self.uploads.lock().unwrap();
        let before = uploads.len();
        uploads.retain(|name| name != remote_path);
        if uploads.len() == before {
            return Err(UploadError::NotFound(remote_path.to_string()).into());
        }
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        ProviderStatus {
            provider: self.kind,
            enabled: self.is_enabled(),
            connected: self.is_enabled(),
            details: BTreeMap::new(),
        }
    }
}

/// Settings rooted in `dir` with uploads on and instant retries.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.image_directory = dir.join("images");
    settings.logging.file = dir.join("test.log");
    settings.cloud_upload.enabled = true;
    settings.cloud_upload.max_retries = 3;
    settings.cloud_upload.retry_base_delay_secs = 0;
    settings.cloud_upload.upload_timeout_secs = 5;
    settings
}

pub fn config_store(dir: &TempDir, settings: Settings) -> Arc<ConfigStore> {
    Arc::new(ConfigStore::with_settings(
        dir.path().join("config.json"),
        settings,
    ))
}

pub fn fast_options() -> SchedulerOptions {
    SchedulerOptions {
        error_cooldown: Duration::from_millis(100),
        stop_timeout: Duration::from_secs(2),
        capture_timeout: Duration::from_secs(2),
    }
}

/// Polls `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
