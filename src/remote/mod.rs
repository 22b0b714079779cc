//! Off-site storage for backup artifacts.

pub(crate) mod spaces;

use chrono::{DateTime, Local, Utc};
use std::future::Future;
use std::path::Path;

use crate::backup::{ARTIFACT_PREFIX, TIMESTAMP_FORMAT, artifact_file_name};
use crate::errors::RemoteError;
use crate::utils::cipher;

pub use spaces::{SpacesConnector, SpacesStore};

/// An uploaded artifact as reported by the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub size: u64,
}

/// Operations on an authenticated remote store. Each call is a single attempt;
/// failures are returned as-is without retrying.
pub trait RemoteStore: Send + Sync {
    /// Uploads a local file and returns its remote id.
    fn upload(&self, file_path: &Path) -> impl Future<Output = Result<String, RemoteError>> + Send;

    /// Entries in the target collection, newest first.
    fn list(&self) -> impl Future<Output = Result<Vec<RemoteEntry>, RemoteError>> + Send;

    fn download(
        &self,
        remote_id: &str,
        dest_path: &Path,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn delete(&self, remote_id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Produces freshly authenticated [`RemoteStore`] instances.
pub trait Connect: Send + Sync + 'static {
    type Store: RemoteStore;

    fn connect(&self) -> impl Future<Output = Result<Self::Store, RemoteError>> + Send;
}

/// Remote name for an upload: the local artifact's timestamp stem (or the
/// current time for other files) plus a random suffix, keeping the local
/// extension. Uploads landing in the same second get distinct keys.
pub fn remote_name_for(file_path: &Path) -> String {
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let (stem, ext) = match file_name.split_once('.') {
        Some((stem, ext)) if !ext.is_empty() => (stem, ext),
        _ => (file_name, "zip"),
    };
    let stamp = stem
        .strip_prefix(ARTIFACT_PREFIX)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Local::now().format(TIMESTAMP_FORMAT).to_string());
    artifact_file_name(&format!("{stamp}-{}", cipher::random_hex(4)), ext)
}

/// Orders entries newest first.
pub fn sort_newest_first(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
}
