// backupvault/src/backup/db_dump.rs
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::DatabaseConfig;
use crate::errors::ProcessError;
use crate::utils::find_executable;

const STDERR_LIMIT: usize = 4096;

/// Runs the configured dump utility and streams its stdout into `output_file`.
///
/// Arguments are `dump_args`, then `--user=`, `--host=`, `--port=` when set,
/// then the database name. The password travels through the `password_env`
/// environment variable of the child so it never shows up in a process listing.
pub async fn dump_database(
    db_config: &DatabaseConfig,
    output_file: &Path,
) -> Result<(), ProcessError> {
    let program = &db_config.dump_program;
    let program_path = find_executable(program)?;
    tracing::debug!(program = %program_path.display(), database = %db_config.name, "Found dump executable");

    let out = File::create(output_file).map_err(|source| ProcessError::Output {
        path: output_file.to_path_buf(),
        source,
    })?;

    let mut cmd = Command::new(&program_path);
    cmd.args(&db_config.dump_args);
    if let Some(user) = &db_config.user {
        cmd.arg(format!("--user={user}"));
    }
    if let Some(host) = &db_config.host {
        cmd.arg(format!("--host={host}"));
    }
    if let Some(port) = db_config.port {
        cmd.arg(format!("--port={port}"));
    }
    cmd.arg(&db_config.name);
    if let Some(password) = &db_config.password {
        cmd.env(&db_config.password_env, password);
    }
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::info!(database = %db_config.name, output = %output_file.display(), "Dumping database");

    let child = cmd.spawn().map_err(|source| ProcessError::Launch {
        program: program.clone(),
        source,
    })?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = match timeout(db_config.dump_timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Launch {
            program: program.clone(),
            source,
        })?,
        Err(_) => {
            return Err(ProcessError::TimedOut {
                program: program.clone(),
                timeout: db_config.dump_timeout,
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
        return Err(ProcessError::Failed {
            program: program.clone(),
            status: output.status,
            stderr,
        });
    }

    tracing::info!(database = %db_config.name, "Database dump finished");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::test_support::shell_dump;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_stdout_is_written_to_file() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("database.sql");
        dump_database(&shell_dump("printf 'SELECT 1;'"), &out).await?;
        assert_eq!(fs::read_to_string(&out)?, "SELECT 1;");
        Ok(())
    }

    #[tokio::test]
    async fn test_arguments_and_password_channel() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("args.txt");
        // $0 is the first argument after the script for `sh -c`.
        let script = r#"printf '%s\n' "$0" "$@"; printf 'pwd=%s\n' "$MYSQL_PWD""#;
        dump_database(&shell_dump(script), &out).await?;

        let lines: Vec<String> = fs::read_to_string(&out)?
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(lines, vec!["--user=alice", "--port=3307", "shop", "pwd=p@ss"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path().join("database.sql");
        let err = dump_database(&shell_dump("echo 'Unknown database' >&2; exit 2"), &out)
            .await
            .unwrap_err();
        match err {
            ProcessError::Failed { status, stderr, .. } => {
                assert_eq!(status.code(), Some(2));
                assert_eq!(stderr, "Unknown database");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_kills_the_dump() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut config = shell_dump("sleep 30");
        config.dump_timeout = Duration::from_millis(200);
        let err = dump_database(&config, &dir.path().join("database.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_program() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut config = shell_dump("");
        config.dump_program = "definitely-not-a-real-dump-tool".to_string();
        let err = dump_database(&config, &dir.path().join("database.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
        Ok(())
    }
}
