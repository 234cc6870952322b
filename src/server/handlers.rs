use crate::app_state::{AppState, CloudUpdate, ScheduleUpdate, DEFAULT_IMAGE_LIST_LIMIT};
use crate::error::{CaptureError, ConfigError, Error, RetentionError, UploadError};
use crate::logging::DEFAULT_RECENT_LOGS;
use crate::retention::content_type;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{error, info, info_span, warn, Instrument};
use utoipa::ToSchema;

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidArgument(_)
            | Error::Retention(RetentionError::InvalidName(_))
            | Error::Config(ConfigError::InvalidValue(_)) => StatusCode::BAD_REQUEST,
            Error::Retention(RetentionError::NotFound(_)) | Error::Upload(UploadError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Error::ProviderUnavailable | Error::Capture(CaptureError::DeviceUnavailable(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(error = %self.0, "Request rejected");
        }
        let body = json!({ "success": false, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteQuery {
    /// Full remote path as returned by the cloud listing.
    pub path: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IntervalRequest {
    #[serde(alias = "minutes", alias = "interval_minutes")]
    pub interval: i64,
}

/// Body problems surface as validation errors with the usual error payload.
fn requested_interval(
    payload: Result<Json<IntervalRequest>, JsonRejection>,
) -> crate::error::Result<i64> {
    match payload {
        Ok(Json(request)) => Ok(request.interval),
        Err(rejection) => Err(Error::InvalidArgument(format!(
            "interval must be a whole number of minutes between 1 and 1440 ({})",
            rejection.body_text()
        ))),
    }
}

fn attachment(content_type: &str, filename: &str, body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/landslide/status",
    responses((status = 200, description = "Scheduler snapshot", body = crate::scheduler::SchedulerStatus))
)]
pub async fn get_status(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "status": state.status() })))
}

#[utoipa::path(
    post,
    path = "/api/landslide/capture",
    responses(
        (status = 200, description = "Image captured", body = crate::capture::CaptureRecord),
        (status = 503, description = "Camera unavailable"),
        (status = 500, description = "Capture failed")
    )
)]
pub async fn capture(State(state): State<Arc<AppState>>) -> ApiResult {
    async {
        info!("Manual capture requested");
        let record = state.capture_now().await?;
        Ok::<_, ApiError>(Json(json!({
            "success": true,
            "filename": record.filename(),
            "record": record,
        })))
    }
    .instrument(info_span!("manual_capture"))
    .await
}

#[utoipa::path(
    post,
    path = "/api/landslide/interval",
    request_body = IntervalRequest,
    responses(
        (status = 200, description = "Interval updated"),
        (status = 400, description = "Interval outside 1..=1440 minutes")
    )
)]
pub async fn update_interval(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IntervalRequest>, JsonRejection>,
) -> ApiResult {
    let minutes = state.update_interval(requested_interval(payload)?)?;
    Ok(Json(json!({
        "success": true,
        "interval_minutes": minutes,
        "message": format!("Capture interval updated to {} minutes", minutes),
    })))
}

#[utoipa::path(
    post,
    path = "/api/landslide/scheduler/start",
    responses((status = 200, description = "Start outcome", body = crate::scheduler::StartOutcome))
)]
pub async fn start_scheduler(State(state): State<Arc<AppState>>) -> ApiResult {
    let outcome = state.start_scheduler().await;
    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

#[utoipa::path(
    post,
    path = "/api/landslide/scheduler/stop",
    responses((status = 200, description = "Stop outcome", body = crate::scheduler::StopOutcome))
)]
pub async fn stop_scheduler(State(state): State<Arc<AppState>>) -> ApiResult {
    let outcome = state.stop_scheduler().await;
    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/config",
    responses((status = 200, description = "Schedule configuration"))
)]
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "config": state.schedule_config() })))
}

#[utoipa::path(
    post,
    path = "/api/landslide/config",
    request_body = ScheduleUpdate,
    responses(
        (status = 200, description = "Schedule configuration updated"),
        (status = 400, description = "Invalid value")
    )
)]
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ScheduleUpdate>,
) -> ApiResult {
    async {
        let config = state.update_schedule_config(update)?;
        Ok::<_, ApiError>(Json(json!({ "success": true, "config": config })))
    }
    .instrument(info_span!("schedule_config_update"))
    .await
}

#[utoipa::path(
    get,
    path = "/api/landslide/images",
    params(("limit" = Option<usize>, Query, description = "Maximum number of images, newest first")),
    responses((status = 200, description = "Local images", body = [crate::retention::ImageInfo]))
)]
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let images = state.list_images(query.limit.unwrap_or(DEFAULT_IMAGE_LIST_LIMIT))?;
    Ok(Json(json!({ "success": true, "count": images.len(), "images": images })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/images/{filename}",
    params(("filename" = String, Path, description = "Image file name")),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 400, description = "Invalid file name"),
        (status = 404, description = "No such image")
    )
)]
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.image_path(&filename)?;
    let data = tokio::fs::read(&path).await.map_err(Error::from)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type(&path).to_string()),
            (header::CONTENT_DISPOSITION, format!("inline; filename=\"{}\"", filename)),
        ],
        data,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/api/landslide/images/download",
    responses(
        (status = 200, description = "Zip archive of every local image", content_type = "application/zip"),
        (status = 404, description = "No image directory")
    )
)]
pub async fn download_images(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    async {
        let (name, file) = state.archive_images().await?;
        info!("Serving image archive {}", name);
        let body = Body::from_stream(ReaderStream::new(file));
        Ok::<_, ApiError>(attachment("application/zip", &name, body))
    }
    .instrument(info_span!("images_archive"))
    .await
}

#[utoipa::path(
    delete,
    path = "/api/landslide/images/{filename}",
    params(("filename" = String, Path, description = "Image file name")),
    responses(
        (status = 200, description = "Image deleted"),
        (status = 404, description = "No such image")
    )
)]
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult {
    state.delete_image(&filename)?;
    Ok(Json(json!({ "success": true, "deleted": filename })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/logs",
    params(("limit" = Option<usize>, Query, description = "Number of most recent records")),
    responses((status = 200, description = "Recent log records", body = [crate::logging::LogRecord]))
)]
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let logs = state.logs(query.limit.unwrap_or(DEFAULT_RECENT_LOGS)).await?;
    Ok(Json(json!({ "success": true, "logs": logs })))
}

#[utoipa::path(
    delete,
    path = "/api/landslide/logs",
    responses((status = 200, description = "Log file cleared"))
)]
pub async fn clear_logs(State(state): State<Arc<AppState>>) -> ApiResult {
    state.clear_logs().await?;
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/health",
    responses((status = 200, description = "Service health", body = crate::app_state::Health))
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let response = json!(state.health());
    tracing::debug!("Health check response: {:?}", response);
    Json(response)
}

#[utoipa::path(
    get,
    path = "/api/landslide/cloud/status",
    responses((status = 200, description = "Provider status", body = crate::storage::CloudStatus))
)]
pub async fn cloud_status(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "cloud": state.cloud_status() })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/cloud/images",
    responses(
        (status = 200, description = "Remote images", body = [crate::storage::RemoteFile]),
        (status = 503, description = "No active provider")
    )
)]
pub async fn cloud_images(State(state): State<Arc<AppState>>) -> ApiResult {
    let images = state.list_cloud_images().await?;
    Ok(Json(json!({ "success": true, "count": images.len(), "images": images })))
}

#[utoipa::path(
    delete,
    path = "/api/landslide/cloud/images",
    params(("path" = String, Query, description = "Remote object path")),
    responses(
        (status = 200, description = "Remote image deleted"),
        (status = 404, description = "No such remote image"),
        (status = 503, description = "No active provider")
    )
)]
pub async fn delete_cloud_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RemoteQuery>,
) -> ApiResult {
    async {
        state.delete_cloud_image(&query.path).await?;
        Ok::<_, ApiError>(Json(json!({ "success": true, "deleted": query.path })))
    }
    .instrument(info_span!("cloud_delete"))
    .await
}

#[utoipa::path(
    get,
    path = "/api/landslide/cloud/download",
    params(("path" = String, Query, description = "Remote object path")),
    responses(
        (status = 200, description = "Remote image bytes"),
        (status = 404, description = "No such remote image"),
        (status = 503, description = "No active provider")
    )
)]
pub async fn cloud_download(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RemoteQuery>,
) -> Result<Response, ApiError> {
    let file = state.download_cloud_image(&query.path).await?;
    let filename = query.path.rsplit('/').next().unwrap_or(query.path.as_str());
    let body = Body::from_stream(ReaderStream::new(file));
    Ok(attachment(
        content_type(std::path::Path::new(filename)),
        filename,
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/api/landslide/cloud/upload/{filename}",
    params(("filename" = String, Path, description = "Local image file name")),
    responses(
        (status = 200, description = "Uploaded"),
        (status = 404, description = "No such image"),
        (status = 503, description = "No active provider")
    )
)]
pub async fn cloud_upload(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> ApiResult {
    async {
        let remote_path = state.upload_image(&filename).await?;
        Ok::<_, ApiError>(Json(json!({
            "success": true,
            "filename": filename,
            "remote_path": remote_path,
        })))
    }
    .instrument(info_span!("cloud_upload"))
    .await
}

#[utoipa::path(
    get,
    path = "/api/landslide/cloud/config",
    responses((status = 200, description = "Cloud configuration with secrets masked"))
)]
pub async fn get_cloud_config(State(state): State<Arc<AppState>>) -> ApiResult {
    Ok(Json(json!({ "success": true, "config": state.cloud_config() })))
}

#[utoipa::path(
    post,
    path = "/api/landslide/cloud/config",
    request_body = CloudUpdate,
    responses((status = 200, description = "Providers reinitialized", body = crate::storage::CloudStatus))
)]
pub async fn update_cloud_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<CloudUpdate>,
) -> ApiResult {
    async {
        info!("Cloud configuration update requested: {:?}", update);
        let cloud = state.update_cloud_config(update).await?;
        Ok::<_, ApiError>(Json(json!({ "success": true, "cloud": cloud })))
    }
    .instrument(info_span!("cloud_config_update"))
    .await
}

#[utoipa::path(
    get,
    path = "/api/landslide/upload-queue",
    responses((status = 200, description = "Pending uploads", body = crate::upload::QueueSnapshot))
)]
pub async fn upload_queue(State(state): State<Arc<AppState>>) -> ApiResult {
    let snapshot = state.upload_queue();
    Ok(Json(json!({
        "success": true,
        "queue_size": snapshot.queue_size,
        "items": snapshot.items,
    })))
}

#[utoipa::path(
    get,
    path = "/api/landslide/camera/detect",
    responses(
        (status = 200, description = "Camera status after probing", body = crate::capture::CameraStatus),
        (status = 503, description = "Camera tool unavailable")
    )
)]
pub async fn detect_camera(State(state): State<Arc<AppState>>) -> ApiResult {
    let camera = state.detect_camera().await?;
    Ok(Json(json!({ "success": true, "camera": camera })))
}
