use chrono::Local;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::backup::{archive, db_dump};
use crate::config::BackupConfig;
use crate::errors::{BackupError, BackupPhase, PhaseError};
use crate::utils::cipher;

pub const ARTIFACT_PREFIX: &str = "project-backup-";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
pub const ENCRYPTED_SUFFIX: &str = ".enc";
const ARCHIVE_EXT: &str = "zip";
const DUMP_FILE_NAME: &str = "database.sql";

/// `project-backup-<timestamp>.<ext>`
pub fn artifact_file_name(timestamp: &str, ext: &str) -> String {
    format!("{ARTIFACT_PREFIX}{timestamp}.{ext}")
}

/// Full backup sequence. The scratch workspace is removed on every exit
/// path; the artifact only survives a successful run.
pub(crate) async fn perform_backup_orchestration(
    config: &BackupConfig,
) -> Result<PathBuf, BackupError> {
    tokio::fs::create_dir_all(&config.scratch_root)
        .await
        .map_err(|e| BackupError::new(BackupPhase::PrepareScratch, e))?;

    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let encrypted = config.encryption_key.is_some();
    let artifact_path = claim_artifact_path(&config.scratch_root, &timestamp, encrypted)
        .await
        .map_err(|e| BackupError::new(BackupPhase::PrepareScratch, e))?;

    let workspace = tempfile::Builder::new()
        .prefix(&format!("db-dump-{timestamp}-"))
        .rand_bytes(6)
        .tempdir_in(&config.scratch_root);

    let result = match workspace {
        Ok(workspace) => {
            tracing::debug!(workspace = %workspace.path().display(), "Scratch workspace created");
            let result = run_pipeline(config, workspace.path(), &artifact_path).await;

            let workspace_path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!(
                    workspace = %workspace_path.display(),
                    error = %e,
                    "Failed to remove scratch workspace"
                );
            }
            result
        }
        Err(e) => Err(BackupError::new(BackupPhase::PrepareScratch, e)),
    };

    match &result {
        Ok(path) => tracing::info!(artifact = %path.display(), "Backup created"),
        Err(e) => {
            // Both names were claimed by this invocation, so nobody else owns them.
            discard(&artifact_path).await;
            if encrypted {
                discard(&with_suffix(&artifact_path, ENCRYPTED_SUFFIX)).await;
            }
            tracing::error!(phase = %e.phase, error = %e.source, "Backup failed");
        }
    }
    result
}

async fn run_pipeline(
    config: &BackupConfig,
    workspace: &Path,
    artifact_path: &Path,
) -> Result<PathBuf, BackupError> {
    let dump_file = workspace.join(DUMP_FILE_NAME);
    db_dump::dump_database(&config.database, &dump_file)
        .await
        .map_err(|e| BackupError::new(BackupPhase::DumpDatabase, e))?;

    let sources = vec![config.project_path.clone(), workspace.to_path_buf()];
    let excluded: Vec<PathBuf> = nested_scratch_root(config).await.into_iter().collect();
    let dest = artifact_path.to_path_buf();
    run_blocking(move || archive::create_zip_archive(&dest, &sources, &excluded))
        .await
        .map_err(|e| BackupError::new(BackupPhase::CreateArchive, e))?;

    let Some(key) = config.encryption_key else {
        return Ok(artifact_path.to_path_buf());
    };

    let encrypted_path = with_suffix(artifact_path, ENCRYPTED_SUFFIX);
    let (plain, sealed) = (artifact_path.to_path_buf(), encrypted_path.clone());
    let encrypted = run_blocking(move || cipher::encrypt_file(&plain, &sealed, &key)).await;

    // The plaintext archive never outlives the encryption step.
    discard(artifact_path).await;
    encrypted.map_err(|e| BackupError::new(BackupPhase::Encrypt, e))?;
    if artifact_path.exists() {
        return Err(BackupError::new(
            BackupPhase::Encrypt,
            io::Error::other("plaintext archive could not be removed"),
        ));
    }

    Ok(encrypted_path)
}

async fn run_blocking<T, E, F>(f: F) -> Result<T, PhaseError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<PhaseError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(join_err) => Err(PhaseError::Io(io::Error::other(join_err))),
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

/// The scratch root as the project walk spells it, when it lies inside the
/// project tree.
async fn nested_scratch_root(config: &BackupConfig) -> Option<PathBuf> {
    let project = tokio::fs::canonicalize(&config.project_path).await.ok()?;
    let scratch = tokio::fs::canonicalize(&config.scratch_root).await.ok()?;
    let relative = scratch.strip_prefix(&project).ok()?;
    Some(config.project_path.join(relative))
}

async fn create_exclusive(path: &Path) -> io::Result<()> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .map(drop)
}

/// Claims a free artifact name in `scratch_root` with exclusive creates,
/// appending a `-N` counter while names are taken. Backups started in the
/// same second, from this process or another, never share a file.
///
/// When `encrypted` is set the `.enc` name is claimed as well; otherwise an
/// existing `.enc` sibling only marks the name as taken.
async fn claim_artifact_path(
    scratch_root: &Path,
    timestamp: &str,
    encrypted: bool,
) -> io::Result<PathBuf> {
    let mut counter = 0u32;
    loop {
        let stamp = match counter {
            0 => timestamp.to_string(),
            n => format!("{timestamp}-{n}"),
        };
        counter += 1;

        let candidate = scratch_root.join(artifact_file_name(&stamp, ARCHIVE_EXT));
        match create_exclusive(&candidate).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }

        let sealed = with_suffix(&candidate, ENCRYPTED_SUFFIX);
        let sealed_claim = if encrypted {
            create_exclusive(&sealed).await
        } else {
            match tokio::fs::try_exists(&sealed).await {
                Ok(true) => Err(io::ErrorKind::AlreadyExists.into()),
                Ok(false) => Ok(()),
                Err(e) => Err(e),
            }
        };

        match sealed_claim {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                discard(&candidate).await;
                if e.kind() != io::ErrorKind::AlreadyExists {
                    return Err(e);
                }
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}
