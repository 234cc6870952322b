use crate::error::ConfigError;
use crate::prelude::*;
use crate::storage::ProviderKind;
use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tempfile::NamedTempFile;
use tracing::{error, info};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 1440;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub image_directory: PathBuf,
    pub image_extensions: Vec<String>,
    pub schedule: ScheduleConfig,
    pub camera: CameraSettings,
    pub cloud_upload: CloudSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
    pub enabled: bool,
    /// `0` disables retention.
    pub max_images: usize,
    pub image_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub command: String,
    /// `{output}` is replaced by the destination path.
    pub capture_args: Vec<String>,
    pub detect_args: Vec<String>,
    pub capture_timeout_secs: u64,
    pub detect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// When false, captures are kept locally and never enqueued.
    pub enabled: bool,
    pub provider: ProviderKind,
    pub remote_prefix: String,
    pub max_retries: u32,
    pub upload_timeout_secs: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub aws_s3: S3Settings,
    pub google_drive: DriveSettings,
    pub sftp: SftpSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    pub enabled: bool,
    pub bucket_name: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// S3-compatible endpoint (MinIO, Ceph, ...). Implies path-style addressing.
    pub endpoint_url: Option<String>,
    pub storage_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveSettings {
    pub enabled: bool,
    pub credentials_file: Option<PathBuf>,
    pub folder_id: Option<String>,
    pub api_base: String,
    pub upload_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SftpSettings {
    pub enabled: bool,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub remote_directory: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub file: PathBuf,
    pub level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_directory: PathBuf::from("./images"),
            image_extensions: vec!["jpg".into(), "jpeg".into()],
            schedule: ScheduleConfig::default(),
            camera: CameraSettings::default(),
            cloud_upload: CloudSettings::default(),
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            enabled: true,
            max_images: 1000,
            image_prefix: "landslide".into(),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            command: "gphoto2".into(),
            capture_args: vec![
                "--capture-image-and-download".into(),
                "--force-overwrite".into(),
                "--filename".into(),
                "{output}".into(),
            ],
            detect_args: vec!["--auto-detect".into()],
            capture_timeout_secs: 30,
            detect_timeout_secs: 10,
        }
    }
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderKind::AwsS3,
            remote_prefix: "landslide_images".into(),
            max_retries: 5,
            upload_timeout_secs: 120,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 300,
            aws_s3: S3Settings::default(),
            google_drive: DriveSettings::default(),
            sftp: SftpSettings::default(),
        }
    }
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            bucket_name: String::new(),
            region: "us-east-1".into(),
            access_key: None,
            secret_key: None,
            endpoint_url: None,
            storage_class: None,
        }
    }
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            credentials_file: None,
            folder_id: None,
            api_base: "https://www.googleapis.com/drive/v3".into(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".into(),
        }
    }
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: String::new(),
            port: 22,
            username: String::new(),
            password: None,
            key_file: None,
            remote_directory: "/".into(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: PathBuf::from("landslide_scheduler.log"),
            level: "info".into(),
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. `Ok(None)` means the file does not exist.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_interval(self.schedule.interval_minutes as i64)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        if self.image_extensions.is_empty() {
            return Err(ConfigError::InvalidValue(
                "image_extensions must not be empty".into(),
            ));
        }
        if self.cloud_upload.max_retries == 0 {
            return Err(ConfigError::InvalidValue(
                "cloud_upload.max_retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Copy of the settings with credentials replaced, safe to hand to API clients.
    pub fn masked(&self) -> Self {
        let mut masked = self.clone();
        let cloud = &mut masked.cloud_upload;
        for secret in [
            &mut cloud.aws_s3.access_key,
            &mut cloud.aws_s3.secret_key,
            &mut cloud.sftp.password,
        ] {
            if secret.is_some() {
                *secret = Some("***".into());
            }
        }
        masked
    }

    /// Extension used for newly captured files.
    pub fn capture_extension(&self) -> &str {
        self.image_extensions
            .first()
            .map(String::as_str)
            .unwrap_or("jpg")
    }
}

pub fn validate_interval(minutes: i64) -> Result<u64> {
    if minutes < MIN_INTERVAL_MINUTES as i64 || minutes > MAX_INTERVAL_MINUTES as i64 {
        return Err(Error::InvalidArgument(format!(
            "interval must be between {} and {} minutes, got {}",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES, minutes
        )));
    }
    Ok(minutes as u64)
}

/// Owns the persisted settings. Readers always get a complete snapshot; writers
/// are serialized and every change is written to disk before it becomes visible.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<Settings>>,
    write_lock: Mutex<()>,
    load_error: Option<String>,
}

impl ConfigStore {
    /// Loads `path`, materializing defaults when it is absent and falling back to
    /// defaults (without touching the file) when it cannot be parsed. The parse
    /// failure is kept in [`ConfigStore::load_error`] since this usually runs
    /// before logging is set up.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut load_error = None;
        let settings = match Settings::from_file(&path) {
            Ok(Some(settings)) => {
                info!("Configuration loaded from {:?}", path);
                settings
            }
            Ok(None) => {
                let settings = Settings::default();
                match write_atomically(&path, &settings) {
                    Ok(()) => info!("Created default configuration file: {:?}", path),
                    Err(e) => error!("Failed to write default configuration {:?}: {}", path, e),
                }
                settings
            }
            Err(e) => {
                error!("Failed to load config file {:?}: {}", path, e);
                load_error = Some(e.to_string());
                Settings::default()
            }
        };

        Self {
            load_error,
            ..Self::with_settings(path, settings)
        }
    }

    /// Store backed by `path` holding `settings`, without touching the file.
    pub fn with_settings(path: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(settings)),
            write_lock: Mutex::new(()),
            load_error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Why the file on disk was ignored at startup, if it was.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn get(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `change` to a copy of the settings, persists it, then publishes it.
    /// Nothing is published if `change` or the write fails.
    pub fn update<F>(&self, change: F) -> Result<Arc<Settings>>
    where
        F: FnOnce(&mut Settings) -> Result<()>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.get()).clone();
        change(&mut next)?;
        next.validate()?;
        write_atomically(&self.path, &next)?;

        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.clone();
        info!("Configuration saved to {:?}", self.path);
        Ok(next)
    }
}

fn write_atomically(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| ConfigError::File(e.to_string()))?;

    let json = serde_json::to_vec_pretty(settings)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ConfigError::File(e.to_string()))?;
    tmp.write_all(&json)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| ConfigError::File(e.to_string()))?;
    tmp.persist(path)?;
    Ok(())
}
