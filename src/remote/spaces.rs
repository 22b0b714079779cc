// backupvault/src/remote/spaces.rs
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::config::timeout::TimeoutConfig;
use s3::primitives::ByteStream;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::config::RemoteConfig;
use crate::errors::RemoteError;
use crate::remote::{Connect, RemoteEntry, RemoteStore, remote_name_for, sort_newest_first};

/// Contents of the service credentials file.
#[derive(Deserialize)]
struct ServiceCredentials {
    access_key_id: String,
    secret_access_key: String,
}

/// Builds a new [`SpacesStore`] on every `connect`, re-reading credentials.
#[derive(Debug, Clone)]
pub struct SpacesConnector {
    config: RemoteConfig,
}

impl SpacesConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

impl Connect for SpacesConnector {
    type Store = SpacesStore;

    async fn connect(&self) -> Result<SpacesStore, RemoteError> {
        SpacesStore::connect(&self.config).await
    }
}

/// An S3-compatible bucket (AWS S3, DigitalOcean Spaces, MinIO, ...). The
/// optional folder is used as a key prefix and acts as the target collection.
pub struct SpacesStore {
    client: s3::Client,
    bucket: String,
    folder: Option<String>,
}

impl SpacesStore {
    /// Reads the credentials file, builds a client and checks that the bucket
    /// is reachable with those credentials.
    pub async fn connect(remote: &RemoteConfig) -> Result<Self, RemoteError> {
        let raw = tokio::fs::read_to_string(&remote.credentials_file)
            .await
            .map_err(|source| RemoteError::Credentials {
                path: remote.credentials_file.clone(),
                source,
            })?;
        let credentials: ServiceCredentials = serde_json::from_str(&raw)?;

        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(remote.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &credentials.access_key_id,
                &credentials.secret_access_key,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ))
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(remote.operation_timeout)
                    .build(),
            );
        if let Some(endpoint) = &remote.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(remote.force_path_style)
            .build();
        let client = s3::Client::from_conf(s3_config);

        client
            .head_bucket()
            .bucket(&remote.bucket_name)
            .send()
            .await
            .map_err(|e| RemoteError::api("HeadBucket", e))?;
        tracing::info!(bucket = %remote.bucket_name, "Connected to remote store");

        Ok(Self {
            client,
            bucket: remote.bucket_name.clone(),
            folder: remote.folder.clone(),
        })
    }

    fn key_for(&self, name: &str) -> String {
        match &self.folder {
            Some(folder) => format!("{folder}/{name}"),
            None => name.to_string(),
        }
    }

    fn prefix(&self) -> Option<String> {
        self.folder.as_ref().map(|folder| format!("{folder}/"))
    }
}

impl RemoteStore for SpacesStore {
    async fn upload(&self, file_path: &Path) -> Result<String, RemoteError> {
        let key = self.key_for(&remote_name_for(file_path));
        let content_type = match file_path.extension().and_then(|e| e.to_str()) {
            Some("zip") => "application/zip",
            _ => "application/octet-stream",
        };
        tracing::info!(file = %file_path.display(), bucket = %self.bucket, key = %key, "Uploading artifact");

        let body = ByteStream::from_path(file_path)
            .await
            .map_err(|e| RemoteError::api("ReadArtifact", e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| RemoteError::api("PutObject", e))?;

        tracing::info!(key = %key, "Upload finished");
        Ok(key)
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut entries = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(self.prefix())
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| RemoteError::api("ListObjectsV2", e))?;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                // Zero-byte "folder" placeholders created by web consoles.
                if key.ends_with('/') {
                    continue;
                }
                let created = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_default();
                entries.push(RemoteEntry {
                    id: key.to_string(),
                    name: key.rsplit('/').next().unwrap_or(key).to_string(),
                    created,
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        sort_newest_first(&mut entries);
        Ok(entries)
    }

    async fn download(&self, remote_id: &str, dest_path: &Path) -> Result<(), RemoteError> {
        tracing::info!(key = %remote_id, dest = %dest_path.display(), "Downloading artifact");

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(remote_id)
            .send()
            .await
            .map_err(|e| RemoteError::api("GetObject", e))?;

        if let Some(parent_dir) = dest_path.parent() {
            tokio::fs::create_dir_all(parent_dir).await?;
        }
        let mut output_file = tokio::fs::File::create(dest_path).await?;

        let streamed: Result<usize, RemoteError> = async {
            let mut total_bytes = 0;
            while let Some(chunk) = object
                .body
                .try_next()
                .await
                .map_err(|e| RemoteError::api("GetObject", e))?
            {
                output_file.write_all(&chunk).await?;
                total_bytes += chunk.len();
            }
            output_file.flush().await?;
            Ok(total_bytes)
        }
        .await;

        match streamed {
            Ok(total_bytes) => {
                tracing::info!(key = %remote_id, bytes = total_bytes, "Download finished");
                Ok(())
            }
            Err(e) => {
                drop(output_file);
                let _ = tokio::fs::remove_file(dest_path).await;
                Err(e)
            }
        }
    }

    async fn delete(&self, remote_id: &str) -> Result<(), RemoteError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(remote_id)
            .send()
            .await
            .map_err(|e| RemoteError::api("DeleteObject", e))?;
        tracing::info!(key = %remote_id, "Remote artifact deleted");
        Ok(())
    }
}
