use super::{FailureOutcome, Ready, UploadQueue, UploadTask};
use crate::error::UploadError;
use crate::prelude::*;
use crate::storage::StorageManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Background drain of the [`UploadQueue`], independent of the capture loop.
pub struct UploadWorker {
    queue: Arc<UploadQueue>,
    storage: Arc<StorageManager>,
    upload_timeout: Duration,
}

impl UploadWorker {
    pub fn new(
        queue: Arc<UploadQueue>,
        storage: Arc<StorageManager>,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            storage,
            upload_timeout,
        }
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    async fn run(self, token: CancellationToken) {
        info!("Upload worker started");
        loop {
            if token.is_cancelled() {
                break;
            }

            match self.queue.next_ready() {
                Ready::Task(task) => {
                    let id = task.id;
                    tokio::select! {
                        _ = token.cancelled() => {
                            self.queue.release(id);
                            break;
                        }
                        _ = self.process(task) => {}
                    }
                }
                Ready::WaitUntil(deadline) => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.queue.wait_for_work() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Ready::Empty => {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = self.queue.wait_for_work() => {}
                    }
                }
            }
        }
        info!("Upload worker stopped");
    }

    /// One attempt. The provider is resolved here, once, so a reconfiguration
    /// while the upload runs does not redirect it.
    async fn process(&self, task: UploadTask) {
        debug!("Uploading #{} ({:?}), attempt {}", task.id, task.path, task.retries + 1);

        let result = match self.storage.active_provider() {
            None => Err(Error::ProviderUnavailable),
            Some(provider) => {
                let upload = self.storage.upload_with(provider.as_ref(), &task.path);
                match tokio::time::timeout(self.upload_timeout, upload).await {
                    Ok(result) => result,
                    Err(_) => Err(UploadError::Timeout(self.upload_timeout).into()),
                }
            }
        };

        match result {
            Ok(remote_path) => {
                self.queue.complete(task.id);
                info!("Uploaded {:?} to {}", task.path, remote_path);
            }
            Err(e) => {
                if let FailureOutcome::Exhausted { attempts } = self.queue.fail(task.id, &e) {
                    debug!("Dropped upload #{} after {} attempt(s)", task.id, attempts);
                }
            }
        }
    }
}
