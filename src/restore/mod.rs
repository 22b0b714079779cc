//! Pulls an artifact back from the remote store and unpacks it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::backup::{ENCRYPTED_SUFFIX, archive};
use crate::config::BackupConfig;
use crate::remote::RemoteStore;
use crate::utils::cipher;

/// Downloads `remote_id` into a private directory under the scratch root,
/// decrypts it if it is an `.enc` artifact and extracts it into `target_dir`.
/// The downloaded copy is discarded afterwards.
pub async fn run_restore_flow<S: RemoteStore>(
    store: &S,
    backup_config: &BackupConfig,
    remote_id: &str,
    target_dir: &Path,
) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(&backup_config.scratch_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create scratch root {}",
                backup_config.scratch_root.display()
            )
        })?;
    let workspace = tempfile::Builder::new()
        .prefix("restore-")
        .tempdir_in(&backup_config.scratch_root)
        .context("Failed to create restore workspace")?;

    let name = remote_id.rsplit('/').next().unwrap_or(remote_id);
    let downloaded = workspace.path().join(name);
    store
        .download(remote_id, &downloaded)
        .await
        .with_context(|| format!("Failed to download {}", remote_id))?;

    let archive_path = match name.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(plain_name) => {
            let key = backup_config
                .encryption_key
                .context("Artifact is encrypted but no encryption key is configured")?;
            let plain = workspace.path().join(plain_name);
            let (sealed, out) = (downloaded.clone(), plain.clone());
            tokio::task::spawn_blocking(move || cipher::decrypt_file(&sealed, &out, &key))
                .await?
                .with_context(|| format!("Failed to decrypt {}", remote_id))?;
            plain
        }
        None => downloaded,
    };

    let target = target_dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || archive::extract_zip_archive(&archive_path, &target))
        .await?
        .with_context(|| format!("Failed to extract {} into {}", remote_id, target_dir.display()))?;

    workspace
        .close()
        .context("Failed to remove restore workspace")?;
    tracing::info!(remote_id = %remote_id, files = files.len(), "Restore finished");
    Ok(files)
}
