use super::{build_providers, ProviderKind, ProviderStatus, RemoteFile, StorageProvider};
use crate::config::CloudSettings;
use crate::error::UploadError;
use crate::prelude::*;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CloudStatus {
    pub enabled: bool,
    pub active_provider: Option<ProviderStatus>,
    pub providers: BTreeMap<ProviderKind, ProviderStatus>,
}

struct ProviderSet {
    providers: BTreeMap<ProviderKind, Arc<dyn StorageProvider>>,
    active: Option<ProviderKind>,
    remote_prefix: String,
}

impl ProviderSet {
    fn active(&self) -> Option<Arc<dyn StorageProvider>> {
        self.active.and_then(|kind| self.providers.get(&kind).cloned())
    }
}

/// Routes uploads and listings to the active provider. The provider set can be
/// swapped at runtime; callers holding an `Arc` to an old provider keep using it.
pub struct StorageManager {
    state: RwLock<ProviderSet>,
}

impl StorageManager {
    pub async fn from_settings(settings: &CloudSettings) -> Self {
        let manager = Self::empty(&settings.remote_prefix);
        manager.reconfigure(settings).await;
        manager
    }

    pub fn empty(remote_prefix: &str) -> Self {
        Self {
            state: RwLock::new(ProviderSet {
                providers: BTreeMap::new(),
                active: None,
                remote_prefix: remote_prefix.to_string(),
            }),
        }
    }

    /// Manager over an explicit provider set. `active` must be one of `providers`.
    pub fn with_providers(
        providers: Vec<Arc<dyn StorageProvider>>,
        active: Option<ProviderKind>,
        remote_prefix: &str,
    ) -> Result<Self> {
        let providers: BTreeMap<_, _> = providers.into_iter().map(|p| (p.kind(), p)).collect();
        if let Some(kind) = active {
            if !providers.contains_key(&kind) {
                return Err(Error::InvalidArgument(format!(
                    "active provider {} is not configured",
                    kind
                )));
            }
        }

        Ok(Self {
            state: RwLock::new(ProviderSet {
                providers,
                active,
                remote_prefix: remote_prefix.to_string(),
            }),
        })
    }

    /// Rebuilds every provider from `settings` and swaps the set in one step.
    pub async fn reconfigure(&self, settings: &CloudSettings) {
        let providers = build_providers(settings).await;
        let active = providers
            .contains_key(&settings.provider)
            .then_some(settings.provider);

        match active {
            Some(kind) => info!("Active cloud storage provider: {}", kind),
            None => warn!("No active cloud storage provider configured"),
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = ProviderSet {
            providers,
            active,
            remote_prefix: settings.remote_prefix.clone(),
        };
    }

    pub fn set_active(&self, kind: ProviderKind) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.providers.contains_key(&kind) {
            return Err(Error::InvalidArgument(format!(
                "provider {} is not configured",
                kind
            )));
        }
        state.active = Some(kind);
        info!("Active cloud storage provider: {}", kind);
        Ok(())
    }

    /// The designated provider, enabled or not. Used by the upload worker, which
    /// lets a disabled provider fail through its normal retry path.
    pub fn active_provider(&self) -> Option<Arc<dyn StorageProvider>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active()
    }

    /// The designated provider if it is usable right now.
    pub fn enabled_provider(&self) -> Result<Arc<dyn StorageProvider>> {
        match self.active_provider() {
            Some(provider) if provider.is_enabled() => Ok(provider),
            _ => {
                warn!("No active cloud storage provider available");
                Err(Error::ProviderUnavailable)
            }
        }
    }

    pub fn has_active_provider(&self) -> bool {
        self.active_provider().is_some()
    }

    fn remote_prefix(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .remote_prefix
            .clone()
    }

    /// `{prefix}/{YYYY}/{MM}/{DD}/{filename}`, dated by the file's modification time.
    pub fn remote_path_for(&self, local_path: &Path) -> Result<String> {
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidArgument(format!("not a file path: {:?}", local_path)))?;
        let metadata = std::fs::metadata(local_path)
            .map_err(|e| UploadError::LocalFile(format!("{:?}: {}", local_path, e)))?;
        let captured: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(format!(
            "{}/{:04}/{:02}/{:02}/{}",
            self.remote_prefix(),
            captured.year(),
            captured.month(),
            captured.day(),
            filename
        ))
    }

    /// Direct upload through the active provider; fails fast when there is none.
    pub async fn upload_image(&self, local_path: &Path) -> Result<String> {
        let provider = self.enabled_provider()?;
        self.upload_with(provider.as_ref(), local_path).await
    }

    /// Upload through a provider the caller already holds.
    pub async fn upload_with(
        &self,
        provider: &dyn StorageProvider,
        local_path: &Path,
    ) -> Result<String> {
        let remote_path = self.remote_path_for(local_path)?;
        provider.upload(local_path, &remote_path).await?;
        Ok(remote_path)
    }

    pub async fn list_remote_images(&self) -> Result<Vec<RemoteFile>> {
        let provider = self.enabled_provider()?;
        provider.list(&format!("{}/", self.remote_prefix())).await
    }

    pub async fn download_image(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.enabled_provider()?.download(remote_path, local_path).await
    }

    pub async fn delete_remote_image(&self, remote_path: &str) -> Result<()> {
        self.enabled_provider()?.delete(remote_path).await
    }

    pub fn status(&self) -> CloudStatus {
        let (active, providers) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            (state.active(), state.providers.clone())
        };

        CloudStatus {
            enabled: active.as_ref().is_some_and(|p| p.is_enabled()),
            active_provider: active.map(|p| p.status()),
            providers: providers
                .into_iter()
                .map(|(kind, provider)| (kind, provider.status()))
                .collect(),
        }
    }
}
