use crate::capture::{CameraStatus, CaptureRecord, CaptureSource, CommandCamera};
use crate::config::{CloudSettings, ConfigStore, ScheduleConfig};
use crate::logging::{LogRecord, LogSink};
use crate::prelude::*;
use crate::retention::{self, ImageInfo};
use crate::scheduler::{
    Scheduler, SchedulerOptions, SchedulerStatus, StartOutcome, StopOutcome,
};
use crate::storage::{CloudStatus, ProviderKind, RemoteFile, StorageManager};
use crate::upload::{QueueSnapshot, RetryPolicy, UploadQueue, UploadWorker};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

pub const DEFAULT_IMAGE_LIST_LIMIT: usize = 50;
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ScheduleUpdate {
    pub interval_minutes: Option<i64>,
    pub max_images: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CloudUpdate {
    pub enabled: Option<bool>,
    pub provider: Option<ProviderKind>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Health {
    pub status: String,
    pub uptime_secs: u64,
    pub scheduler_running: bool,
    pub camera_status: String,
    pub cloud_enabled: bool,
    pub config_error: Option<String>,
}

/// The service object behind every control operation. Owns the configuration,
/// the camera, cloud storage, the upload queue and its worker, and the scheduler.
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub camera: Arc<dyn CaptureSource>,
    pub storage: Arc<StorageManager>,
    pub queue: Arc<UploadQueue>,
    pub scheduler: Arc<Scheduler>,
    pub logs: LogSink,
    pub start_time: SystemTime,
    worker_token: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Builds the production service: gphoto2-style camera and cloud providers
    /// from the stored settings.
    pub async fn new(config: Arc<ConfigStore>, logs: LogSink) -> Result<Arc<Self>> {
        let settings = config.get();
        let camera = CommandCamera::new(settings.camera.clone(), &settings.image_directory)?;
        if let Err(e) = camera.detect_model().await {
            warn!("Camera detection failed at startup: {}", e);
        }
        let storage = StorageManager::from_settings(&settings.cloud_upload).await;

        Ok(Self::with_components(
            config,
            Arc::new(camera),
            Arc::new(storage),
            logs,
            SchedulerOptions::default(),
        ))
    }

    pub fn with_components(
        config: Arc<ConfigStore>,
        camera: Arc<dyn CaptureSource>,
        storage: Arc<StorageManager>,
        logs: LogSink,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        let settings = config.get();
        let queue = Arc::new(UploadQueue::new(RetryPolicy::from(&settings.cloud_upload)));
        let scheduler = Scheduler::new(config.clone(), camera.clone(), queue.clone(), options);

        Arc::new(Self {
            config,
            camera,
            storage,
            queue,
            scheduler,
            logs,
            start_time: SystemTime::now(),
            worker_token: CancellationToken::new(),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    /// Launches the upload worker and, unless disabled, the capture loop.
    pub async fn start(&self) -> StartOutcome {
        {
            let mut worker = self.worker.lock().await;
            if worker.is_none() {
                let timeout =
                    Duration::from_secs(self.config.get().cloud_upload.upload_timeout_secs);
                let handle =
                    UploadWorker::new(self.queue.clone(), self.storage.clone(), timeout)
                        .spawn(self.worker_token.clone());
                *worker = Some(handle);
            }
        }
        self.scheduler.start().await
    }

    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.scheduler.stop().await;
        self.worker_token.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Upload worker did not stop within {:?}", WORKER_SHUTDOWN_TIMEOUT);
            }
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }

    pub fn status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub async fn capture_now(&self) -> Result<CaptureRecord> {
        self.scheduler.capture_once().await
    }

    pub fn update_interval(&self, minutes: i64) -> Result<u64> {
        self.scheduler.update_interval_minutes(minutes)
    }

    pub async fn start_scheduler(&self) -> StartOutcome {
        self.scheduler.start().await
    }

    pub async fn stop_scheduler(&self) -> StopOutcome {
        self.scheduler.stop().await
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        self.config.get().schedule.clone()
    }

    /// Validates everything before applying anything.
    pub fn update_schedule_config(&self, update: ScheduleUpdate) -> Result<ScheduleConfig> {
        let interval = update
            .interval_minutes
            .map(crate::config::validate_interval)
            .transpose()?;

        let settings = self.config.update(|settings| {
            if let Some(minutes) = interval {
                settings.schedule.interval_minutes = minutes;
            }
            if let Some(max_images) = update.max_images {
                settings.schedule.max_images = max_images;
            }
            Ok(())
        })?;
        info!("Schedule configuration updated: {:?}", settings.schedule);
        Ok(settings.schedule.clone())
    }

    pub fn list_images(&self, limit: usize) -> Result<Vec<ImageInfo>> {
        let settings = self.config.get();
        retention::list_images(&settings.image_directory, &settings.image_extensions, limit)
    }

    pub fn image_path(&self, filename: &str) -> Result<PathBuf> {
        let settings = self.config.get();
        retention::resolve_image(&settings.image_directory, filename, &settings.image_extensions)
    }

    pub fn delete_image(&self, filename: &str) -> Result<PathBuf> {
        let settings = self.config.get();
        retention::delete_image(&settings.image_directory, filename, &settings.image_extensions)
    }

    /// Zips every local image into an anonymous temp file. Returns the download
    /// name and the archive rewound to its start.
    pub async fn archive_images(&self) -> Result<(String, tokio::fs::File)> {
        let settings = self.config.get();
        let dir = settings.image_directory.clone();
        let extensions = settings.image_extensions.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<std::fs::File> {
            let mut file = retention::archive_images(&dir, &extensions, tempfile::tempfile()?)?;
            file.seek(SeekFrom::Start(0))?;
            Ok(file)
        })
        .await
        .map_err(|e| Error::IO(std::io::Error::other(e)))??;

        let name = format!("landslide_images_{}.zip", Utc::now().format("%Y%m%d_%H%M%S"));
        Ok((name, tokio::fs::File::from_std(file)))
    }

    pub async fn logs(&self, limit: usize) -> Result<Vec<LogRecord>> {
        self.logs.recent(limit).await
    }

    pub async fn clear_logs(&self) -> Result<()> {
        self.logs.clear().await?;
        info!("Log file cleared");
        Ok(())
    }

    pub fn health(&self) -> Health {
        let config_error = self.config.load_error().map(str::to_string);
        Health {
            status: (if config_error.is_some() { "degraded" } else { "ok" }).to_string(),
            uptime_secs: self.uptime().as_secs(),
            scheduler_running: self.scheduler.is_running(),
            camera_status: self.camera.status().status,
            cloud_enabled: self.config.get().cloud_upload.enabled,
            config_error,
        }
    }

    pub fn cloud_status(&self) -> CloudStatus {
        self.storage.status()
    }

    pub async fn list_cloud_images(&self) -> Result<Vec<RemoteFile>> {
        self.storage.list_remote_images().await
    }

    /// Immediate upload of a local capture, bypassing the queue.
    pub async fn upload_image(&self, filename: &str) -> Result<String> {
        let path = self.image_path(filename)?;
        self.storage.upload_image(&path).await
    }

    /// Fetches a remote object into an anonymous temp file, rewound for reading.
    pub async fn download_cloud_image(&self, remote_path: &str) -> Result<tokio::fs::File> {
        let staging = tempfile::NamedTempFile::new()?;
        self.storage
            .download_image(remote_path, staging.path())
            .await?;
        let file = staging.reopen()?;
        Ok(tokio::fs::File::from_std(file))
    }

    pub async fn delete_cloud_image(&self, remote_path: &str) -> Result<()> {
        self.storage.delete_remote_image(remote_path).await?;
        info!("Deleted remote image {}", remote_path);
        Ok(())
    }

    pub fn cloud_config(&self) -> CloudSettings {
        self.config.get().masked().cloud_upload
    }

    /// Persists the change and rebuilds the providers from the new settings.
    pub async fn update_cloud_config(&self, update: CloudUpdate) -> Result<CloudStatus> {
        let settings = self.config.update(|settings| {
            if let Some(enabled) = update.enabled {
                settings.cloud_upload.enabled = enabled;
            }
            if let Some(provider) = update.provider {
                settings.cloud_upload.provider = provider;
            }
            Ok(())
        })?;
        self.storage.reconfigure(&settings.cloud_upload).await;
        Ok(self.storage.status())
    }

    pub fn upload_queue(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub async fn detect_camera(&self) -> Result<CameraStatus> {
        Ok(self.camera.detect().await?)
    }
}
