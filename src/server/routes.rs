use super::handlers::{
    self, capture, clear_logs, cloud_download, cloud_images, cloud_status, cloud_upload,
    delete_cloud_image, delete_image, detect_camera, download_images, get_cloud_config,
    get_config, get_image, get_logs, get_status, health_check, list_images, start_scheduler,
    stop_scheduler, update_cloud_config, update_config, update_interval, upload_queue,
};
use crate::app_state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_status,
        handlers::capture,
        handlers::update_interval,
        handlers::start_scheduler,
        handlers::stop_scheduler,
        handlers::get_config,
        handlers::update_config,
        handlers::list_images,
        handlers::get_image,
        handlers::download_images,
        handlers::delete_image,
        handlers::get_logs,
        handlers::clear_logs,
        handlers::health_check,
        handlers::cloud_status,
        handlers::cloud_images,
        handlers::delete_cloud_image,
        handlers::cloud_download,
        handlers::cloud_upload,
        handlers::get_cloud_config,
        handlers::update_cloud_config,
        handlers::upload_queue,
        handlers::detect_camera,
    ),
    tags((name = "landslide", description = "Landslide monitoring camera control"))
)]
pub struct ApiDoc;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/capture", post(capture))
        .route("/interval", post(update_interval))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/config", get(get_config).post(update_config))
        .route("/images", get(list_images))
        .route("/images/download", get(download_images))
        .route("/images/:filename", get(get_image).delete(delete_image))
        .route("/logs", get(get_logs).delete(clear_logs))
        .route("/health", get(health_check))
        .route("/cloud/status", get(cloud_status))
        .route("/cloud/images", get(cloud_images).delete(delete_cloud_image))
        .route("/cloud/download", get(cloud_download))
        .route("/cloud/upload/:filename", post(cloud_upload))
        .route("/cloud/config", get(get_cloud_config).post(update_cloud_config))
        .route("/upload-queue", get(upload_queue))
        .route("/camera/detect", get(detect_camera));

    Router::new()
        .route("/", get(|| async { "Landslide Monitoring Server" }))
        .nest("/api/landslide", api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(app_state)
}
