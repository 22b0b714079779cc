//! Periodic backup-and-upload loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backup::BackupService;
use crate::errors::CycleError;
use crate::remote::{Connect, RemoteStore};

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub artifact: PathBuf,
    pub remote_id: String,
}

pub struct BackupScheduler<C: Connect> {
    service: Arc<BackupService>,
    connector: C,
    interval: Duration,
}

impl<C: Connect> BackupScheduler<C> {
    pub fn new(service: Arc<BackupService>, connector: C, interval: Duration) -> Self {
        Self {
            service,
            connector,
            interval,
        }
    }

    /// Starts the loop on its own task. The first cycle fires one full
    /// interval after start; cancelling `cancel` stops the loop once any
    /// in-flight cycle has finished.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // An overrunning cycle skips the missed firings instead of running back to back.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "Backup scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => tracing::info!(
                            artifact = %report.artifact.display(),
                            remote_id = %report.remote_id,
                            "Scheduled backup uploaded"
                        ),
                        Err(e) => tracing::error!(error = ?e, "Scheduled backup cycle failed"),
                    }
                }
            }
        }
        tracing::info!("Backup scheduler stopped");
    }

    /// One backup, connect, upload, delete-local pass. The local artifact is
    /// only removed after a successful upload.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let artifact = self.service.create_backup().await?;

        let store = self.connector.connect().await?;
        let remote_id = store.upload(&artifact).await?;

        if let Err(e) = tokio::fs::remove_file(&artifact).await {
            tracing::warn!(
                artifact = %artifact.display(),
                error = %e,
                "Uploaded artifact could not be removed locally"
            );
        }

        Ok(CycleReport {
            artifact,
            remote_id,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::test_support::backup_config;
    use crate::errors::RemoteError;
    use crate::remote::RemoteEntry;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// In-memory store whose first `fail_uploads` uploads fail.
    #[derive(Clone)]
    struct FakeConnector {
        attempts: Arc<AtomicUsize>,
        fail_uploads: usize,
        uploaded: Arc<Mutex<Vec<String>>>,
        notify: mpsc::UnboundedSender<usize>,
    }

    struct FakeStore(FakeConnector);

    impl Connect for FakeConnector {
        type Store = FakeStore;

        async fn connect(&self) -> Result<FakeStore, RemoteError> {
            Ok(FakeStore(self.clone()))
        }
    }

    impl RemoteStore for FakeStore {
        async fn upload(&self, file_path: &Path) -> Result<String, RemoteError> {
            let attempt = self.0.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.0.notify.send(attempt);
            if attempt <= self.0.fail_uploads {
                return Err(RemoteError::Io(std::io::Error::other("connection reset")));
            }
            let name = file_path.file_name().unwrap().to_string_lossy().into_owned();
            self.0.uploaded.lock().unwrap().push(name.clone());
            Ok(format!("remote/{name}"))
        }

        async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
            Ok(Vec::new())
        }

        async fn download(&self, _remote_id: &str, _dest: &Path) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn delete(&self, _remote_id: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn fake(fail_uploads: usize) -> (FakeConnector, mpsc::UnboundedReceiver<usize>) {
        let (notify, rx) = mpsc::unbounded_channel();
        let connector = FakeConnector {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_uploads,
            uploaded: Arc::new(Mutex::new(Vec::new())),
            notify,
        };
        (connector, rx)
    }

    fn zip_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".zip"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_successful_cycle_removes_local_artifact() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let service = Arc::new(BackupService::new(backup_config(temp.path(), "printf 'SELECT 1;'")));
        let (connector, _rx) = fake(0);
        let uploaded = connector.uploaded.clone();
        let scheduler = BackupScheduler::new(service.clone(), connector, Duration::from_secs(3600));

        let report = scheduler.run_cycle().await?;
        assert!(!report.artifact.exists());
        assert!(report.remote_id.starts_with("remote/project-backup-"));
        assert_eq!(uploaded.lock().unwrap().len(), 1);
        assert!(zip_files(&service.config().scratch_root).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_backup_skips_upload() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let service = Arc::new(BackupService::new(backup_config(temp.path(), "exit 1")));
        let (connector, _rx) = fake(0);
        let attempts = connector.attempts.clone();
        let scheduler = BackupScheduler::new(service, connector, Duration::from_secs(3600));

        let err = scheduler.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Backup(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_artifact_and_loop_continues() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let service = Arc::new(BackupService::new(backup_config(temp.path(), "printf 'SELECT 1;'")));
        let scratch = service.config().scratch_root.clone();
        let (connector, mut rx) = fake(1);
        let uploaded = connector.uploaded.clone();

        let cancel = CancellationToken::new();
        let handle = BackupScheduler::new(service, connector, Duration::from_millis(200))
            .spawn(cancel.clone());

        let wait = Duration::from_secs(30);
        assert_eq!(tokio::time::timeout(wait, rx.recv()).await?, Some(1));
        assert_eq!(tokio::time::timeout(wait, rx.recv()).await?, Some(2));

        // The second cycle finishes before the loop observes the cancellation.
        cancel.cancel();
        tokio::time::timeout(wait, handle).await??;

        let uploaded = uploaded.lock().unwrap().clone();
        assert!(!uploaded.is_empty());
        let left = zip_files(&scratch);
        assert_eq!(left.len(), 1, "only the failed cycle's artifact remains");
        assert!(!uploaded.contains(&left[0]));
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let service = Arc::new(BackupService::new(backup_config(temp.path(), "printf 'SELECT 1;'")));
        let (connector, _rx) = fake(0);
        let attempts = connector.attempts.clone();

        let cancel = CancellationToken::new();
        let handle = BackupScheduler::new(service, connector, Duration::from_secs(3600))
            .spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await??;
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        Ok(())
    }
}
