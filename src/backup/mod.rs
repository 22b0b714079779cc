mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;

use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::BackupConfig;
use crate::errors::BackupError;

pub use logic::{ARTIFACT_PREFIX, ENCRYPTED_SUFFIX, TIMESTAMP_FORMAT, artifact_file_name};

/// Entry point for producing backup artifacts.
///
/// Holds the immutable backup configuration and serialises `create_backup`
/// calls, so a scheduled cycle and a manually triggered backup never race for
/// the same artifact name.
pub struct BackupService {
    config: BackupConfig,
    lock: Mutex<()>,
}

impl BackupService {
    pub fn new(config: BackupConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Dumps the database, archives it together with the project tree and
    /// returns the path of the artifact in the scratch root.
    pub async fn create_backup(&self) -> Result<PathBuf, BackupError> {
        let _guard = self.lock.lock().await;
        logic::perform_backup_orchestration(&self.config).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use crate::config::{BackupConfig, DatabaseConfig};

    /// A dump "tool" that runs `script` under `sh -c`.
    pub(crate) fn shell_dump(script: &str) -> DatabaseConfig {
        DatabaseConfig {
            name: "shop".to_string(),
            user: Some("alice".to_string()),
            password: Some("p@ss".to_string()),
            host: None,
            port: Some(3307),
            dump_program: "sh".to_string(),
            dump_args: vec!["-c".to_string(), script.to_string()],
            password_env: "MYSQL_PWD".to_string(),
            dump_timeout: Duration::from_secs(30),
        }
    }

    /// Creates `<root>/shop/app.txt` ("hello") and points the scratch root at
    /// `<root>/scratch`, which does not exist yet.
    pub(crate) fn backup_config(root: &Path, dump_script: &str) -> BackupConfig {
        let project = root.join("shop");
        fs::create_dir_all(&project).expect("create project dir");
        fs::write(project.join("app.txt"), b"hello").expect("write project file");
        BackupConfig {
            project_path: project,
            scratch_root: root.join("scratch"),
            database: shell_dump(dump_script),
            encryption_key: None,
        }
    }
}
