pub mod cipher;
pub mod logger;

use std::path::PathBuf;
use which::which;

use crate::errors::ProcessError;

/// Resolves an executable name (or path) against the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf, ProcessError> {
    which(program).map_err(|source| ProcessError::NotFound {
        program: program.to_string(),
        source,
    })
}
