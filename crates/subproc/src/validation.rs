//! Argument validation for spawn requests.
//!
//! Shape checks shared by the spawner and the convenience layer. These run
//! before any OS resource is touched, so a rejected request has no side
//! effects.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use subproc_common::{Error, Result};

/// Validate an argument vector.
///
/// The vector must be non-empty (element 0 is the program) and no element
/// may contain an interior NUL byte, which the kernel cannot represent.
pub fn validate_argv(argv: &[impl AsRef<OsStr>]) -> Result<()> {
    if argv.is_empty() {
        return Err(Error::argument("argv must not be empty"));
    }

    for (i, arg) in argv.iter().enumerate() {
        if arg.as_ref().as_bytes().contains(&0) {
            return Err(Error::argument(format!(
                "argv[{}] contains an interior NUL byte",
                i
            )));
        }
    }

    Ok(())
}

/// Validate a full environment replacement.
///
/// Keys must be non-empty and free of `=` and NUL; values must be free of
/// NUL. These are the constraints `execve` places on the environment block.
pub fn validate_env(env: &[(impl AsRef<OsStr>, impl AsRef<OsStr>)]) -> Result<()> {
    for (key, value) in env {
        let key = key.as_ref().as_bytes();
        if key.is_empty() {
            return Err(Error::argument("environment key must not be empty"));
        }
        if key.contains(&b'=') {
            return Err(Error::argument(format!(
                "environment key {:?} contains '='",
                String::from_utf8_lossy(key)
            )));
        }
        if key.contains(&0) || value.as_ref().as_bytes().contains(&0) {
            return Err(Error::argument(
                "environment entry contains an interior NUL byte",
            ));
        }
    }

    Ok(())
}
