use super::{CameraStatus, CaptureSource};
use crate::config::CameraSettings;
use crate::error::CaptureError;
use chrono::Utc;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

const OUTPUT_PLACEHOLDER: &str = "{output}";

#[derive(Debug, Clone, Default)]
struct Detection {
    probed: bool,
    model: Option<String>,
    error: Option<String>,
}

/// Camera driven by an external program (gphoto2 by default). The program is
/// expected to write the image to the path substituted for `{output}`.
pub struct CommandCamera {
    settings: CameraSettings,
    image_dir: PathBuf,
    detection: RwLock<Detection>,
}

impl CommandCamera {
    pub fn new(settings: CameraSettings, image_dir: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let image_dir = image_dir.into();
        std::fs::create_dir_all(&image_dir)?;
        Ok(Self {
            settings,
            image_dir,
            detection: RwLock::new(Detection::default()),
        })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, CaptureError> {
        let child = Command::new(&self.settings.command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CaptureError::DeviceUnavailable(format!(
                    "{} not available",
                    self.settings.command
                )),
                _ => CaptureError::Io(e),
            })?;

        // On timeout the child is dropped and killed.
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CaptureError::Timeout(timeout)),
        }
    }

    /// Probes for a connected camera and caches the result for [`CaptureSource::status`].
    pub async fn detect_model(&self) -> Result<Option<String>, CaptureError> {
        let timeout = Duration::from_secs(self.settings.detect_timeout_secs);
        let result = self.run(&self.settings.detect_args, timeout).await.and_then(|output| {
            if output.status.success() {
                Ok(parse_detected_model(&String::from_utf8_lossy(&output.stdout)))
            } else {
                Err(CaptureError::CommandFailed(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ))
            }
        });

        let mut detection = self.detection.write().unwrap_or_else(PoisonError::into_inner);
        detection.probed = true;
        match &result {
            Ok(Some(model)) => {
                info!("Camera detected: {}", model);
                detection.model = Some(model.clone());
                detection.error = None;
            }
            Ok(None) => {
                warn!("No compatible camera detected");
                detection.model = None;
                detection.error = Some("no camera detected".into());
            }
            Err(e) => {
                error!("Failed to detect camera: {}", e);
                detection.model = None;
                detection.error = Some(e.to_string());
            }
        }
        result
    }
}

/// Extracts the model column from `gphoto2 --auto-detect` style output.
fn parse_detected_model(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let idx = line.find("usb:")?;
        let model = line[..idx].trim();
        (!model.is_empty()).then(|| model.to_string())
    })
}

#[async_trait::async_trait]
impl CaptureSource for CommandCamera {
    async fn capture(&self, filename: Option<&str>) -> Result<PathBuf, CaptureError> {
        let filename = match filename {
            Some(name) => name.to_string(),
            None => format!("capture_{}.jpg", Utc::now().format("%Y%m%d_%H%M%S")),
        };
        let target = self.image_dir.join(&filename);
        let target_str = target.to_string_lossy();
        let args: Vec<String> = self
            .settings
            .capture_args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &target_str))
            .collect();

        let timeout = Duration::from_secs(self.settings.capture_timeout_secs);
        let output = self.run(&args, timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::CommandFailed(stderr.trim().to_string()));
        }
        if !target.is_file() {
            return Err(CaptureError::MissingOutput(target));
        }

        info!("Image captured: {:?}", target);
        Ok(target)
    }

    fn status(&self) -> CameraStatus {
        let detection = self
            .detection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let status = match (&detection.model, detection.probed) {
            (Some(_), _) => "active",
            (None, true) => "unavailable",
            (None, false) => "unknown",
        };
        let mut details = BTreeMap::new();
        details.insert("command".to_string(), self.settings.command.clone());
        details.insert(
            "image_directory".to_string(),
            self.image_dir.display().to_string(),
        );
        if let Some(error) = detection.error {
            details.insert("error".to_string(), error);
        }

        CameraStatus {
            kind: "dslr".to_string(),
            status: status.to_string(),
            model: detection.model,
            details,
        }
    }

    async fn detect(&self) -> Result<CameraStatus, CaptureError> {
        self.detect_model().await?;
        Ok(self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn shell(script: &str, timeout_secs: u64) -> CameraSettings {
        CameraSettings {
            command: "sh".into(),
            capture_args: vec!["-c".into(), script.into(), "{output}".into()],
            detect_args: vec!["-c".into(), script.into()],
            capture_timeout_secs: timeout_secs,
            detect_timeout_secs: timeout_secs,
        }
    }

    #[tokio::test]
    async fn capture_writes_requested_file() {
        let dir = tempdir().unwrap();
        let camera = CommandCamera::new(shell("printf jpeg > \"$0\"", 5), dir.path()).unwrap();

        let path = camera.capture(Some("shot.jpg")).await.unwrap();

        assert_eq!(path, dir.path().join("shot.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let dir = tempdir().unwrap();
        let camera = CommandCamera::new(shell("echo boom >&2; exit 1", 5), dir.path()).unwrap();

        match camera.capture(Some("shot.jpg")).await {
            Err(CaptureError::CommandFailed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn success_without_output_is_an_error() {
        let dir = tempdir().unwrap();
        let camera = CommandCamera::new(shell("true", 5), dir.path()).unwrap();

        assert!(matches!(
            camera.capture(Some("shot.jpg")).await,
            Err(CaptureError::MissingOutput(_))
        ));
    }

    #[tokio::test]
    async fn slow_capture_times_out() {
        let dir = tempdir().unwrap();
        let camera = CommandCamera::new(shell("sleep 5", 1), dir.path()).unwrap();

        assert!(matches!(
            camera.capture(Some("shot.jpg")).await,
            Err(CaptureError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_program_is_device_unavailable() {
        let dir = tempdir().unwrap();
        let settings = CameraSettings {
            command: "definitely-not-a-camera-tool".into(),
            ..CameraSettings::default()
        };
        let camera = CommandCamera::new(settings, dir.path()).unwrap();

        assert!(matches!(
            camera.capture(None).await,
            Err(CaptureError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn detection_is_cached_in_status() {
        let dir = tempdir().unwrap();
        let script = "echo 'Model                          Port'; echo 'Canon EOS 80D                  usb:001,004'";
        let camera = CommandCamera::new(shell(script, 5), dir.path()).unwrap();
        assert_eq!(camera.status().status, "unknown");

        let model = camera.detect_model().await.unwrap();

        assert_eq!(model.as_deref(), Some("Canon EOS 80D"));
        let status = camera.status();
        assert_eq!(status.status, "active");
        assert_eq!(status.model.as_deref(), Some("Canon EOS 80D"));
    }

    #[test]
    fn parse_ignores_header_only_output() {
        assert_eq!(parse_detected_model("Model   Port\n-----------\n"), None);
    }
}
