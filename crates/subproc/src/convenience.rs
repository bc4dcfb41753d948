//! Convenience entry points over [`Process`].
//!
//! Thin glue for the common spawn-and-wait patterns: run and return the
//! status, run and insist on success, run and capture stdout, or run with
//! a scoped handle that is always waited on.

use crate::process::Process;
use crate::redirect::Redirect;
use crate::spawn::SpawnOptions;
use std::ffi::OsStr;
use subproc_common::{Error, ExitStatus, Result};

/// Spawn `argv`, wait for it to finish, and return its exit status.
pub fn call(argv: &[impl AsRef<OsStr>], options: SpawnOptions) -> Result<ExitStatus> {
    let mut process = Process::spawn(argv, options)?;
    process.wait()
}

/// Spawn `argv` and wait; any status other than a zero exit is an
/// [`Error::NonZeroExit`] carrying the command and the status.
pub fn check_call(argv: &[impl AsRef<OsStr>], options: SpawnOptions) -> Result<()> {
    let status = call(argv, options)?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::non_zero_exit(render_command(argv), status))
    }
}

/// Spawn `argv` with stdout piped, collect the output, and wait.
///
/// Returns the captured stdout bytes. A non-zero exit is an
/// [`Error::NonZeroExit`]. The `stdout` field of `options` is overridden;
/// the other streams are spawned as given.
pub fn check_output(argv: &[impl AsRef<OsStr>], options: SpawnOptions) -> Result<Vec<u8>> {
    let options = SpawnOptions {
        stdout: Redirect::Pipe,
        ..options
    };
    let mut process = Process::spawn(argv, options)?;
    let (stdout, _stderr) = process.communicate(None, None)?;
    let status = process.wait()?;
    if status.success() {
        Ok(stdout)
    } else {
        Err(Error::non_zero_exit(render_command(argv), status))
    }
}

/// Spawn `argv` and hand the live [`Process`] to `f`.
///
/// When `f` returns, any pipe ends still held are closed and the child is
/// waited on, so no zombie survives the call. The closure's value is
/// returned once the child has been reaped.
pub fn popen<R>(
    argv: &[impl AsRef<OsStr>],
    options: SpawnOptions,
    f: impl FnOnce(&mut Process) -> Result<R>,
) -> Result<R> {
    let mut process = Process::spawn(argv, options)?;
    let result = f(&mut process);

    // Closing stdin first lets a child draining it run to exit.
    process.stdin = None;
    process.stdout = None;
    process.stderr = None;
    let waited = process.wait();

    let value = result?;
    waited?;
    Ok(value)
}

fn render_command(argv: &[impl AsRef<OsStr>]) -> String {
    argv.iter()
        .map(|a| a.as_ref().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
