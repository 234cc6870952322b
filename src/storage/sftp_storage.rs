use crate::config::SftpSettings;
use crate::error::UploadError;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use ssh2::{Session, Sftp};
use std::collections::BTreeMap;
use std::fs::File;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{ProviderKind, ProviderStatus, RemoteFile, StorageProvider};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_LIST_DEPTH: usize = 8;

/// SFTP backend. ssh2 is blocking, so every operation opens a fresh session on
/// the blocking pool and closes it when done.
pub struct SftpStorage {
    settings: SftpSettings,
    enabled: bool,
}

impl SftpStorage {
    pub async fn connect(settings: SftpSettings) -> Self {
        let probe = settings.clone();
        let result = tokio::task::spawn_blocking(move || open_session(&probe).map(|_| ())).await;

        let enabled = match result {
            Ok(Ok(())) => {
                info!("SFTP connection test successful: {}", settings.hostname);
                true
            }
            Ok(Err(e)) => {
                error!("SFTP connection test failed: {}", e);
                false
            }
            Err(e) => {
                error!("SFTP connection test aborted: {}", e);
                false
            }
        };

        Self { settings, enabled }
    }

    async fn with_sftp<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Sftp, &SftpSettings) -> Result<T> + Send + 'static,
    {
        if !self.enabled {
            return Err(UploadError::Disabled(ProviderKind::Sftp).into());
        }

        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let session = open_session(&settings)?;
            let sftp = session.sftp()?;
            op(&sftp, &settings)
        })
        .await
        .map_err(|e| UploadError::Sftp(format!("SFTP worker failed: {}", e)))?
    }

    fn url_for(&self, full_path: &str) -> String {
        format!("sftp://{}{}", self.settings.hostname, full_path)
    }
}

fn open_session(settings: &SftpSettings) -> Result<Session> {
    if settings.hostname.is_empty() || settings.username.is_empty() {
        return Err(UploadError::Sftp("hostname and username are required".into()).into());
    }

    let addr = (settings.hostname.as_str(), settings.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| UploadError::Sftp(format!("cannot resolve {}", settings.hostname)))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECTION_TIMEOUT)?;
    tcp.set_read_timeout(Some(CONNECTION_TIMEOUT))?;
    tcp.set_write_timeout(Some(CONNECTION_TIMEOUT))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(CONNECTION_TIMEOUT.as_millis() as u32);
    session.handshake()?;

    match settings.key_file.as_deref().filter(|p| p.exists()) {
        Some(key) => session.userauth_pubkey_file(&settings.username, None, key, None)?,
        None => {
            let password = settings.password.as_deref().unwrap_or_default();
            session.userauth_password(&settings.username, password)?
        }
    }

    if !session.authenticated() {
        return Err(UploadError::Sftp("authentication failed".into()).into());
    }
    Ok(session)
}

fn remote_full_path(remote_directory: &str, remote_path: &str) -> String {
    format!(
        "{}/{}",
        remote_directory.trim_end_matches('/'),
        remote_path.trim_start_matches('/')
    )
}

/// `mkdir -p` for the parent directories of `full_path`.
fn ensure_parent_dirs(sftp: &Sftp, full_path: &str) -> Result<()> {
    let Some(parent) = Path::new(full_path).parent() else {
        return Ok(());
    };

    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        if sftp.stat(&current).is_err() {
            debug!("Creating remote directory {:?}", current);
            sftp.mkdir(&current, 0o755)?;
        }
    }
    Ok(())
}

fn walk(
    sftp: &Sftp,
    dir: &Path,
    root: &Path,
    depth: usize,
    out: &mut Vec<(String, u64, Option<u64>)>,
) -> Result<()> {
    for (path, stat) in sftp.readdir(dir)? {
        if stat.is_dir() {
            if depth < MAX_LIST_DEPTH {
                walk(sftp, &path, root, depth + 1, out)?;
            }
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(&path);
        out.push((
            relative.to_string_lossy().into_owned(),
            stat.size.unwrap_or(0),
            stat.mtime,
        ));
    }
    Ok(())
}

#[async_trait::async_trait]
impl StorageProvider for SftpStorage {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sftp
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let full = remote_full_path(&self.settings.remote_directory, remote_path);
        let local = local_path.to_path_buf();
        let target = full.clone();

        self.with_sftp(move |sftp, _| {
            let mut source = File::open(&local)
                .map_err(|e| UploadError::LocalFile(format!("{:?}: {}", local, e)))?;
            ensure_parent_dirs(sftp, &target)?;
            let mut remote = sftp.create(Path::new(&target))?;
            std::io::copy(&mut source, &mut remote)?;
            Ok(())
        })
        .await?;

        info!("Uploaded {:?} to SFTP: {}", local_path, self.url_for(&full));
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let full = remote_full_path(&self.settings.remote_directory, remote_path);
        let local = local_path.to_path_buf();
        let source = full.clone();

        self.with_sftp(move |sftp, _| {
            let mut remote = sftp.open(Path::new(&source))?;
            let mut target = File::create(&local)?;
            std::io::copy(&mut remote, &mut target)?;
            Ok(())
        })
        .await?;

        info!("Downloaded {} to {:?}", self.url_for(&full), local_path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteFile>> {
        let prefix_owned = prefix.to_string();
        let entries = self
            .with_sftp(move |sftp, settings| {
                let root = PathBuf::from(&settings.remote_directory);
                let start = match prefix_owned.rfind('/') {
                    Some(idx) => PathBuf::from(remote_full_path(
                        &settings.remote_directory,
                        &prefix_owned[..idx],
                    )),
                    None => root.clone(),
                };
                let mut out = Vec::new();
                if sftp.stat(&start).is_ok() {
                    walk(sftp, &start, &root, 0, &mut out)?;
                }
                Ok(out)
            })
            .await?;

        let files = entries
            .into_iter()
            .filter(|(name, _, _)| name.starts_with(prefix))
            .map(|(name, size, mtime)| RemoteFile {
                url: self.url_for(&remote_full_path(&self.settings.remote_directory, &name)),
                modified: mtime.and_then(|t| DateTime::<Utc>::from_timestamp(t as i64, 0)),
                size,
                name,
            })
            .collect();
        Ok(files)
    }

    async fn delete(&self, remote_path: &str) -> Result<()> {
        let full = remote_full_path(&self.settings.remote_directory, remote_path);
        let target = full.clone();

        self.with_sftp(move |sftp, _| {
            sftp.unlink(Path::new(&target))?;
            Ok(())
        })
        .await?;

        info!("Deleted SFTP file: {}", full);
        Ok(())
    }

    fn status(&self) -> ProviderStatus {
        let mut details = BTreeMap::new();
        details.insert("hostname".to_string(), self.settings.hostname.clone());
        details.insert("port".to_string(), self.settings.port.to_string());
        details.insert("username".to_string(), self.settings.username.clone());
        details.insert(
            "remote_directory".to_string(),
            self.settings.remote_directory.clone(),
        );

        ProviderStatus {
            provider: ProviderKind::Sftp,
            enabled: self.enabled,
            connected: self.enabled,
            details,
        }
    }
}
