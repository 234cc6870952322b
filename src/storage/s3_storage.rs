use crate::config::S3Settings;
use crate::error::UploadError;
use crate::prelude::*;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::StorageClass;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use super::{ProviderKind, ProviderStatus, RemoteFile, StorageProvider};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct S3Storage {
    client: Option<Client>,
    settings: S3Settings,
}

impl S3Storage {
    /// Builds the client and checks the bucket is reachable. Never fails: an
    /// unreachable bucket yields a disabled provider.
    pub async fn connect(settings: S3Settings) -> Self {
        if settings.bucket_name.is_empty() {
            error!("S3 bucket_name is not configured");
            return Self::disabled(settings);
        }

        let client = Self::build_client(&settings).await;
        let probe = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.head_bucket().bucket(&settings.bucket_name).send(),
        )
        .await;

        match probe {
            Ok(Ok(_)) => {
                info!("AWS S3 client initialized for bucket: {}", settings.bucket_name);
                Self {
                    client: Some(client),
                    settings,
                }
            }
            Ok(Err(e)) => {
                error!("Failed to initialize S3 client: {}", DisplayErrorContext(&e));
                Self::disabled(settings)
            }
            Err(_) => {
                error!("S3 connectivity check timed out after {:?}", CONNECT_TIMEOUT);
                Self::disabled(settings)
            }
        }
    }

    fn disabled(settings: S3Settings) -> Self {
        Self {
            client: None,
            settings,
        }
    }

    async fn build_client(settings: &S3Settings) -> Client {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::v2024_03_28())
            .region(Region::new(settings.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "landslide-config",
            ));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint_url.is_some())
            .build();
        Client::from_conf(s3_config)
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| UploadError::Disabled(ProviderKind::AwsS3).into())
    }

    fn url_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.settings.bucket_name, key)
    }
}

fn s3_error<E>(e: E) -> Error
where
    E: std::error::Error + 'static,
{
    UploadError::S3(DisplayErrorContext(e).to_string()).into()
}

#[async_trait::async_trait]
impl StorageProvider for S3Storage {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AwsS3
    }

    fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let client = self.client()?;
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| UploadError::LocalFile(format!("{:?}: {}", local_path, e)))?;

        let mut request = client
            .put_object()
            .bucket(&self.settings.bucket_name)
            .key(remote_path)
            .body(body);
        if let Some(class) = &self.settings.storage_class {
            request = request.storage_class(StorageClass::from(class.as_str()));
        }
        request.send().await.map_err(s3_error)?;

        info!("Uploaded {:?} to S3: {}", local_path, self.url_for(remote_path));
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let client = self.client()?;
        let obj = client
            .get_object()
            .bucket(&self.settings.bucket_name)
            .key(remote_path)
            .send()
            .await
            .map_err(s3_error)?;

        let data = obj.body.collect().await.map_err(s3_error)?.into_bytes();
        tokio::fs::write(local_path, &data).await?;

        info!("Downloaded {} to {:?}", self.url_for(remote_path), local_path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteFile>> {
        let client = self.client()?;
        let mut pages = client
            .list_objects_v2()
            .bucket(&self.settings.bucket_name)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut files = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(s3_error)?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                files.push(RemoteFile {
                    name: key.to_string(),
                    size: obj.size().unwrap_or_default().max(0) as u64,
                    modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())),
                    url: self.url_for(key),
                });
            }
        }

        Ok(files)
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let client = self.client()?;
        client
            .delete_object()
            .bucket(&self.settings.bucket_name)
            .key(remote_path)
            .send()
            .await
            .map_err(s3_error)?;

        info!("Deleted {}", self.url_for(remote_path));
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        let mut details = BTreeMap::new();
        details.insert("bucket".to_string(), self.settings.bucket_name.clone());
        details.insert("region".to_string(), self.settings.region.clone());
        if let Some(endpoint) = &self.settings.endpoint_url {
            details.insert("endpoint".to_string(), endpoint.clone());
        }

        ProviderStatus {
            provider: ProviderKind::AwsS3,
            enabled: self.is_enabled(),
            connected: self.client.is_some(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_bucket_yields_disabled_provider() {
        let storage = S3Storage::connect(S3Settings {
            enabled: true,
            ..S3Settings::default()
        })
        .await;

        assert!(!storage.is_enabled());
        let status = storage.status();
        assert!(!status.enabled);
        assert_eq!(status.provider, ProviderKind::AwsS3);

        let err = storage
            .upload(Path::new("/tmp/x.jpg"), "landslide_images/x.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(UploadError::Disabled(ProviderKind::AwsS3))));
    }
}
