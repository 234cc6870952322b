use crate::capture::{CameraStatus, CaptureRecord, CaptureSource};
use crate::config::{validate_interval, ConfigStore};
use crate::error::CaptureError;
use crate::prelude::*;
use crate::retention::enforce_retention;
use crate::upload::UploadQueue;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Wait after a failed iteration instead of the regular interval.
    pub error_cooldown: Duration,
    pub stop_timeout: Duration,
    pub capture_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            error_cooldown: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Running,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The loop did not acknowledge in time; it will exit after its current capture.
    Forced,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: SchedulerState,
    pub interval_minutes: u64,
    pub last_capture_time: Option<DateTime<Utc>>,
    pub next_capture_time: Option<DateTime<Utc>>,
    pub camera: CameraStatus,
    pub queue_size: usize,
    pub image_directory: String,
    pub max_images: usize,
    /// Set when the configuration file was unreadable and defaults are in use.
    pub config_error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Runtime {
    state: SchedulerState,
    last_capture: Option<DateTime<Utc>>,
    next_capture: Option<DateTime<Utc>>,
}

struct LoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Drives periodic captures. Each cycle captures, prunes the local archive,
/// queues the image for upload, then sleeps until the next cycle or a stop.
pub struct Scheduler {
    config: Arc<ConfigStore>,
    camera: Arc<dyn CaptureSource>,
    queue: Arc<UploadQueue>,
    options: SchedulerOptions,
    runtime: Mutex<Runtime>,
    capture_lock: tokio::sync::Mutex<()>,
    handle: tokio::sync::Mutex<Option<LoopHandle>>,
}

impl Scheduler {
    pub fn new(
        config: Arc<ConfigStore>,
        camera: Arc<dyn CaptureSource>,
        queue: Arc<UploadQueue>,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            camera,
            queue,
            options,
            runtime: Mutex::new(Runtime {
                state: SchedulerState::Stopped,
                last_capture: None,
                next_capture: None,
            }),
            capture_lock: tokio::sync::Mutex::new(()),
            handle: tokio::sync::Mutex::new(None),
        })
    }

    fn runtime(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SchedulerState {
        self.runtime().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub async fn start(self: &Arc<Self>) -> StartOutcome {
        let mut slot = self.handle.lock().await;
        if slot.is_some() {
            warn!("Scheduler already running");
            return StartOutcome::AlreadyRunning;
        }
        if !self.config.get().schedule.enabled {
            warn!("Scheduling is disabled in configuration; not starting");
            return StartOutcome::Disabled;
        }

        let token = CancellationToken::new();
        self.runtime().state = SchedulerState::Running;
        let handle = tokio::spawn(Arc::clone(self).run(token.clone()));
        *slot = Some(LoopHandle { token, handle });

        info!("Scheduler started");
        StartOutcome::Started
    }

    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.handle.lock().await;
        let Some(LoopHandle { token, mut handle }) = slot.take() else {
            warn!("Scheduler not running");
            return StopOutcome::NotRunning;
        };

        self.runtime().state = SchedulerState::Draining;
        token.cancel();

        // A capture in progress is never interrupted; past the timeout the
        // task is left to finish it and exit on its own.
        let outcome = match tokio::time::timeout(self.options.stop_timeout, &mut handle).await {
            Ok(Ok(())) => StopOutcome::Stopped,
            Ok(Err(e)) => {
                error!("Capture loop ended abnormally: {}", e);
                StopOutcome::Stopped
            }
            Err(_) => {
                warn!(
                    "Capture loop did not stop within {:?}; forcing stopped state",
                    self.options.stop_timeout
                );
                StopOutcome::Forced
            }
        };

        {
            let mut runtime = self.runtime();
            runtime.state = SchedulerState::Stopped;
            runtime.next_capture = None;
        }
        info!("Scheduler stopped");
        outcome
    }

    async fn run(self: Arc<Self>, token: CancellationToken) {
        info!("Capture loop started");
        while !token.is_cancelled() {
            let wait = match self.capture_once().await {
                Ok(_) => Duration::from_secs(self.config.get().schedule.interval_minutes * 60),
                Err(e) => {
                    error!("Capture cycle failed: {}", e);
                    self.options.error_cooldown
                }
            };

            {
                // Checked under the runtime lock: once stopped, a late cycle
                // must not publish a next capture time.
                let mut runtime = self.runtime();
                if token.is_cancelled() {
                    break;
                }
                runtime.next_capture = chrono::Duration::from_std(wait)
                    .ok()
                    .map(|d| Utc::now() + d);
            }
            debug!("Next capture in {:?}", wait);

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep_until(Instant::now() + wait) => {}
            }
        }
        info!("Capture loop exited");
    }

    /// Captures one image now. Serialized with the loop so two captures never overlap.
    pub async fn capture_once(&self) -> Result<CaptureRecord> {
        let _guard = self.capture_lock.lock().await;
        let settings = self.config.get();

        let filename = format!(
            "{}_{}.{}",
            settings.schedule.image_prefix,
            Utc::now().format("%Y%m%d_%H%M%S"),
            settings.capture_extension()
        );
        let capture = self.camera.capture(Some(&filename));
        let path = match tokio::time::timeout(self.options.capture_timeout, capture).await {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::Timeout(self.options.capture_timeout).into()),
        };
        let captured_at = Utc::now();
        let record = CaptureRecord::from_file(&path, captured_at)?;
        info!("Captured {:?} ({} bytes)", record.path, record.size_bytes);

        let dir = settings.image_directory.clone();
        let extensions = settings.image_extensions.clone();
        let max_images = settings.schedule.max_images;
        let pass =
            tokio::task::spawn_blocking(move || enforce_retention(&dir, max_images, &extensions))
                .await;
        match pass {
            Ok(Ok(report)) if !report.removed.is_empty() => {
                info!("Retention removed {} old image(s)", report.removed.len())
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Retention pass failed: {}", e),
            Err(e) => error!("Retention task failed: {}", e),
        }

        if settings.cloud_upload.enabled {
            self.queue.enqueue(&record.path);
        }

        self.runtime().last_capture = Some(captured_at);
        Ok(record)
    }

    /// Persists a new interval. A sleep already in progress keeps its deadline.
    pub fn update_interval_minutes(&self, minutes: i64) -> Result<u64> {
        let minutes = validate_interval(minutes)?;
        self.config.update(|settings| {
            settings.schedule.interval_minutes = minutes;
            Ok(())
        })?;
        info!("Capture interval updated to {} minutes", minutes);
        Ok(minutes)
    }

    /// `0` disables retention.
    pub fn update_max_images(&self, max_images: usize) -> Result<usize> {
        self.config.update(|settings| {
            settings.schedule.max_images = max_images;
            Ok(())
        })?;
        info!("Retention limit updated to {} images", max_images);
        Ok(max_images)
    }

    pub fn status(&self) -> SchedulerStatus {
        let settings = self.config.get();
        let runtime = *self.runtime();

        SchedulerStatus {
            running: runtime.state == SchedulerState::Running,
            state: runtime.state,
            interval_minutes: settings.schedule.interval_minutes,
            last_capture_time: runtime.last_capture,
            next_capture_time: runtime.next_capture,
            camera: self.camera.status(),
            queue_size: self.queue.len(),
            image_directory: settings.image_directory.display().to_string(),
            max_images: settings.schedule.max_images,
            config_error: self.config.load_error().map(str::to_string),
        }
    }
}
