mod common;

use common::{config_store, eventually, fast_options, test_settings, FakeCamera, FakeProvider};
use landslide_monitor::app_state::{AppState, CloudUpdate, ScheduleUpdate};
use landslide_monitor::config::ConfigStore;
use landslide_monitor::error::UploadError;
use landslide_monitor::logging::LogSink;
use landslide_monitor::prelude::*;
use landslide_monitor::scheduler::StartOutcome;
use landslide_monitor::storage::{ProviderKind, StorageManager, StorageProvider};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::io::AsyncReadExt;

async fn read_all(mut file: tokio::fs::File) -> Vec<u8> {
    let mut data = Vec::new();
    file.read_to_end(&mut data).await.unwrap();
    data
}

struct Fixture {
    dir: TempDir,
    state: Arc<AppState>,
    camera: Arc<FakeCamera>,
}

fn fixture(provider: Option<Arc<FakeProvider>>) -> Fixture {
    let dir = tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.cloud_upload.aws_s3.access_key = Some("AKIAEXAMPLE".into());
    settings.cloud_upload.aws_s3.secret_key = Some("very-secret".into());
    settings.cloud_upload.sftp.password = Some("hunter2".into());
    let camera = FakeCamera::new(&settings.image_directory);
    let logs = LogSink::new(&settings.logging.file);

    let storage = match provider {
        Some(p) => {
            let kind = p.kind();
            StorageManager::with_providers(
                vec![p as Arc<dyn StorageProvider>],
                Some(kind),
                &settings.cloud_upload.remote_prefix,
            )
            .unwrap()
        }
        None => StorageManager::empty(&settings.cloud_upload.remote_prefix),
    };

    let config = config_store(&dir, settings);
    let state = AppState::with_components(
        config,
        camera.clone(),
        Arc::new(storage),
        logs,
        fast_options(),
    );
    Fixture { dir, state, camera }
}

#[tokio::test]
async fn upload_without_provider_leaves_queue_alone() {
    let f = fixture(None);
    let record = f.state.capture_now().await.unwrap();
    let queued = f.state.upload_queue().queue_size;

    let result = f.state.upload_image(record.filename().unwrap()).await;

    assert!(matches!(result, Err(Error::ProviderUnavailable)));
    assert_eq!(f.state.upload_queue().queue_size, queued);
    assert!(!f.state.cloud_status().enabled);
}

#[tokio::test]
async fn direct_upload_goes_to_the_active_provider() {
    let provider = FakeProvider::new(ProviderKind::AwsS3);
    let f = fixture(Some(provider.clone()));
    let record = f.state.capture_now().await.unwrap();

    let remote = f.state.upload_image(record.filename().unwrap()).await.unwrap();

    assert!(remote.starts_with("landslide_images/"));
    assert!(remote.ends_with(record.filename().unwrap()));
    assert_eq!(provider.uploaded(), vec![remote]);
    assert_eq!(f.state.list_cloud_images().await.unwrap().len(), 1);
}

#[tokio::test]
async fn started_service_captures_and_uploads() {
    let provider = FakeProvider::new(ProviderKind::Sftp);
    let f = fixture(Some(provider.clone()));

    assert_eq!(f.state.start().await, StartOutcome::Started);

    assert!(eventually(Duration::from_secs(3), || provider.uploaded().len() == 1).await);
    assert!(eventually(Duration::from_secs(1), || f.state.upload_queue().queue_size == 0).await);
    assert!(f.state.health().scheduler_running);
    assert_eq!(f.camera.count(), 1);

    f.state.shutdown().await;
    assert!(!f.state.status().running);
}

#[tokio::test]
async fn schedule_update_is_all_or_nothing() {
    let f = fixture(None);

    let rejected = f.state.update_schedule_config(ScheduleUpdate {
        interval_minutes: Some(0),
        max_images: Some(5),
    });
    assert!(matches!(rejected, Err(Error::InvalidArgument(_))));
    assert_eq!(f.state.schedule_config().max_images, 1000);

    let applied = f
        .state
        .update_schedule_config(ScheduleUpdate {
            interval_minutes: Some(30),
            max_images: Some(5),
        })
        .unwrap();
    assert_eq!(applied.interval_minutes, 30);
    assert_eq!(applied.max_images, 5);
    assert!(f.dir.path().join("config.json").exists());
}

#[tokio::test]
async fn cloud_config_hides_secrets() {
    let f = fixture(None);

    let cloud = f.state.cloud_config();

    assert_eq!(cloud.aws_s3.access_key.as_deref(), Some("***"));
    assert_eq!(cloud.aws_s3.secret_key.as_deref(), Some("***"));
    assert_eq!(cloud.sftp.password.as_deref(), Some("***"));
    assert_eq!(
        f.state.config.get().cloud_upload.sftp.password.as_deref(),
        Some("hunter2")
    );
}

#[tokio::test]
async fn cloud_update_persists_and_rebuilds_providers() {
    let provider = FakeProvider::new(ProviderKind::AwsS3);
    let f = fixture(Some(provider));

    let status = f
        .state
        .update_cloud_config(CloudUpdate {
            enabled: Some(false),
            provider: Some(ProviderKind::Sftp),
        })
        .await
        .unwrap();

    let settings = f.state.config.get();
    assert!(!settings.cloud_upload.enabled);
    assert_eq!(settings.cloud_upload.provider, ProviderKind::Sftp);
    assert!(status.active_provider.is_none());
    assert!(status.providers.is_empty());
}

#[tokio::test]
async fn local_images_can_be_listed_served_and_deleted() {
    let f = fixture(None);
    let record = f.state.capture_now().await.unwrap();
    let name = record.filename().unwrap().to_string();

    let images = f.state.list_images(50).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].filename, name);
    assert_eq!(f.state.image_path(&name).unwrap(), record.path);

    f.state.delete_image(&name).unwrap();
    assert!(f.state.list_images(50).unwrap().is_empty());
    assert!(matches!(
        f.state.image_path("../config.json"),
        Err(Error::Retention(_))
    ));
}

#[tokio::test]
async fn detect_reports_camera_status() {
    let f = fixture(None);

    let camera = f.state.detect_camera().await.unwrap();

    assert_eq!(camera.status, "active");
    assert_eq!(f.state.health().camera_status, "active");
}

#[tokio::test]
async fn unreadable_config_is_reported_in_status_and_health() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    let config = Arc::new(ConfigStore::load(&path));
    let camera = FakeCamera::new(&dir.path().join("images"));
    let state = AppState::with_components(
        config,
        camera,
        Arc::new(StorageManager::empty("landslide_images")),
        LogSink::new(dir.path().join("test.log")),
        fast_options(),
    );

    let health = state.health();
    assert_eq!(health.status, "degraded");
    assert!(health.config_error.is_some());
    assert!(state.status().config_error.is_some());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[tokio::test]
async fn healthy_config_reports_no_error() {
    let f = fixture(None);

    assert_eq!(f.state.health().status, "ok");
    assert!(f.state.status().config_error.is_none());
}

#[tokio::test]
async fn local_images_can_be_archived() {
    let f = fixture(None);
    let first = f.state.capture_now().await.unwrap();
    std::fs::write(f.dir.path().join("images").join("older.jpg"), b"JPEG").unwrap();

    let (name, file) = f.state.archive_images().await.unwrap();

    assert!(name.starts_with("landslide_images_"));
    assert!(name.ends_with(".zip"));
    let data = read_all(file).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();
    let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
    names.sort();
    let mut expected = vec!["older.jpg".to_string(), first.filename().unwrap().to_string()];
    expected.sort();
    assert_eq!(names, expected);
    assert!(archive.by_name("older.jpg").is_ok());
}

#[tokio::test]
async fn remote_images_can_be_downloaded_and_deleted() {
    let provider = FakeProvider::new(ProviderKind::AwsS3);
    let f = fixture(Some(provider.clone()));
    let record = f.state.capture_now().await.unwrap();
    let remote = f.state.upload_image(record.filename().unwrap()).await.unwrap();

    let file = f.state.download_cloud_image(&remote).await.unwrap();
    assert_eq!(read_all(file).await, format!("remote:{}", remote).into_bytes());

    f.state.delete_cloud_image(&remote).await.unwrap();
    assert!(f.state.list_cloud_images().await.unwrap().is_empty());
    assert!(matches!(
        f.state.download_cloud_image(&remote).await,
        Err(Error::Upload(UploadError::NotFound(_)))
    ));
    assert!(matches!(
        f.state.delete_cloud_image(&remote).await,
        Err(Error::Upload(UploadError::NotFound(_)))
    ));
}

#[tokio::test]
async fn remote_operations_need_a_provider() {
    let f = fixture(None);

    assert!(matches!(
        f.state.download_cloud_image("landslide_images/a.jpg").await,
        Err(Error::ProviderUnavailable)
    ));
    assert!(matches!(
        f.state.delete_cloud_image("landslide_images/a.jpg").await,
        Err(Error::ProviderUnavailable)
    ));
}
