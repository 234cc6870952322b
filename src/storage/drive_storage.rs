use crate::config::DriveSettings;
use crate::error::UploadError;
use crate::prelude::*;
use crate::retention::content_type;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

use super::{ProviderKind, ProviderStatus, RemoteFile, StorageProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BOUNDARY_PREFIX: &str = "landslide-monitor-";

#[derive(Deserialize)]
struct Credentials {
    #[serde(alias = "token")]
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    size: Option<String>,
    modified_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

struct Session {
    client: Client,
    token: String,
}

/// Google Drive v3 over plain REST. Objects are stored flat in the configured
/// folder and named by their full remote path.
pub struct DriveStorage {
    session: Option<Session>,
    settings: DriveSettings,
}

impl DriveStorage {
    pub async fn connect(settings: DriveSettings) -> Self {
        match Self::open_session(&settings).await {
            Ok(session) => {
                info!("Google Drive client initialized");
                Self {
                    session: Some(session),
                    settings,
                }
            }
            Err(e) => {
                error!("Failed to initialize Google Drive client: {}", e);
                Self {
                    session: None,
                    settings,
                }
            }
        }
    }

    async fn open_session(settings: &DriveSettings) -> Result<Session> {
        let path = settings
            .credentials_file
            .as_ref()
            .filter(|p| p.exists())
            .ok_or_else(|| UploadError::Drive("credentials file not found".into()))?;
        let raw = tokio::fs::read(path).await?;
        let credentials: Credentials = serde_json::from_slice(&raw)
            .map_err(|e| UploadError::Drive(format!("invalid credentials file: {}", e)))?;

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let session = Session {
            client,
            token: credentials.access_token,
        };

        let probe = session
            .client
            .get(format!("{}/about", settings.api_base))
            .query(&[("fields", "user")])
            .bearer_auth(&session.token)
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await?;
        check(probe).await?;

        Ok(session)
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| UploadError::Disabled(ProviderKind::GoogleDrive).into())
    }

    fn folder_clause(&self) -> String {
        match &self.settings.folder_id {
            Some(folder) => format!("'{}' in parents and trashed = false", escape(folder)),
            None => "trashed = false".to_string(),
        }
    }

    async fn query(&self, q: &str) -> Result<Vec<DriveFile>> {
        let session = self.session()?;
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = session
                .client
                .get(format!("{}/files", self.settings.api_base))
                .bearer_auth(&session.token)
                .query(&[
                    ("q", q),
                    ("fields", "nextPageToken, files(id, name, size, modifiedTime)"),
                    ("pageSize", "1000"),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileList = check(request.send().await?).await?.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    async fn find_id(&self, remote_path: &str) -> Result<String> {
        let q = format!("name = '{}' and {}", escape(remote_path), self.folder_clause());
        self.query(&q)
            .await?
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| UploadError::NotFound(remote_path.to_string()).into())
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::Drive(format!("HTTP {}: {}", status, body.trim())).into())
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// A multipart boundary that does not occur anywhere in `data`.
fn boundary_for(data: &[u8], seed: u64) -> String {
    let mut n = seed;
    loop {
        let candidate = format!("{}{:016x}", BOUNDARY_PREFIX, n);
        if !data
            .windows(candidate.len())
            .any(|window| window == candidate.as_bytes())
        {
            return candidate;
        }
        n = n.wrapping_add(1);
    }
}

fn multipart_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content_type: &str,
    data: &[u8],
) -> Vec<u8> {
    let mut body = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: {ct}\r\n\r\n",
        b = boundary,
        meta = metadata,
        ct = content_type,
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[async_trait::async_trait]
impl StorageProvider for DriveStorage {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleDrive
    }

    fn is_enabled(&self) -> bool {
        self.session.is_some()
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let session = self.session()?;
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| UploadError::LocalFile(format!("{:?}: {}", local_path, e)))?;

        let metadata = serde_json::json!({
            "name": remote_path,
            "parents": self.settings.folder_id.iter().collect::<Vec<_>>(),
        });
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let boundary = boundary_for(&data, seed);
        let body = multipart_body(&boundary, &metadata, content_type(local_path), &data);

        let response = session
            .client
            .post(format!("{}/files", self.settings.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .bearer_auth(&session.token)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await?;
        let created: serde_json::Value = check(response).await?.json().await?;

        info!(
            "Uploaded {:?} to Google Drive: {}",
            local_path,
            created["id"].as_str().unwrap_or("?")
        );
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let id = self.find_id(remote_path).await?;
        let session = self.session()?;
        let response = session
            .client
            .get(format!("{}/files/{}", self.settings.api_base, id))
            .query(&[("alt", "media")])
            .bearer_auth(&session.token)
            .send()
            .await?;
        let data = check(response).await?.bytes().await?;
        tokio::fs::write(local_path, &data).await?;

        info!("Downloaded Google Drive file {} to {:?}", remote_path, local_path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteFile>> {
        let mut q = self.folder_clause();
        if !prefix.is_empty() {
            q.push_str(&format!(" and name contains '{}'", escape(prefix)));
        }

        let files = self
            .query(&q)
            .await?
            .into_iter()
            .filter(|f| f.name.starts_with(prefix))
            .map(|f| RemoteFile {
                size: f.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
                modified: f.modified_time,
                url: format!("https://drive.google.com/file/d/{}/view", f.id),
                name: f.name,
            })
            .collect();
        Ok(files)
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let id = self.find_id(remote_path).await?;
        let session = self.session()?;
        let response = session
            .client
            .delete(format!("{}/files/{}", self.settings.api_base, id))
            .bearer_auth(&session.token)
            .send()
            .await?;
        check(response).await?;

        info!("Deleted Google Drive file {}", remote_path);
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        let mut details = BTreeMap::new();
        if let Some(folder) = &self.settings.folder_id {
            details.insert("folder_id".to_string(), folder.clone());
        }

        ProviderStatus {
            provider: ProviderKind::GoogleDrive,
            enabled: self.is_enabled(),
            connected: self.session.is_some(),
            details,
        }
    }
}
