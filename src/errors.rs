use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Failures while walking source trees or writing/reading a zip container.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error on entry {entry}: {source}")]
    Zip {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive entry {0} points outside the extraction directory")]
    UnsafeEntry(String),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of the external dump utility.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("dump executable `{program}` not found in PATH: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },

    #[error("failed to open dump output {}: {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("invalid hex key: {0}")]
    InvalidKeyEncoding(#[from] hex::FromHexError),

    #[error("ciphertext is {len} bytes, shorter than the {nonce_len}-byte nonce")]
    Truncated { len: usize, nonce_len: usize },

    #[error("encryption failed")]
    Encrypt,

    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    Authentication,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("unable to read credentials file {}: {source}", path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to parse credentials file: {0}")]
    CredentialsFormat(#[from] serde_json::Error),

    #[error("{operation} failed: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    pub(crate) fn api<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RemoteError::Api {
            operation,
            source: Box::new(source),
        }
    }
}

/// The step of `create_backup` that was running when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    PrepareScratch,
    DumpDatabase,
    CreateArchive,
    Encrypt,
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupPhase::PrepareScratch => "scratch preparation",
            BackupPhase::DumpDatabase => "database dump",
            BackupPhase::CreateArchive => "archive creation",
            BackupPhase::Encrypt => "archive encryption",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PhaseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Display carries only the phase so it can be shown to callers as-is.
#[derive(Error, Debug)]
#[error("backup failed during {phase}")]
pub struct BackupError {
    pub phase: BackupPhase,
    #[source]
    pub source: PhaseError,
}

impl BackupError {
    pub fn new(phase: BackupPhase, source: impl Into<PhaseError>) -> Self {
        BackupError {
            phase,
            source: source.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("remote sync failed: {0}")]
    Remote(#[from] RemoteError),
}
