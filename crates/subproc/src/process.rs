//! The parent's handle to a spawned child.

use crate::communicate;
use crate::spawn::{self, SpawnOptions};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::time::Duration;
use subproc_common::{Error, ExitStatus, Result};
use tracing::debug;

/// A running or reaped child process.
///
/// Owning a `Process` means the program was successfully exec'd. The
/// fields `stdin`, `stdout`, and `stderr` hold the parent-side pipe ends
/// for streams that were redirected with [`Redirect::Pipe`]; they can be
/// used directly as blocking files, or left to [`communicate`] which
/// feeds input and collects output without deadlocking.
///
/// Dropping a `Process` does not wait for or signal the child; callers
/// that need the exit status must [`wait`] (or [`poll`]) for it.
///
/// [`Redirect::Pipe`]: crate::Redirect::Pipe
/// [`communicate`]: Process::communicate
/// [`wait`]: Process::wait
/// [`poll`]: Process::poll
#[derive(Debug)]
pub struct Process {
    command: Vec<OsString>,
    pid: Pid,
    /// Write end of the child's stdin pipe, if stdin was `Pipe`.
    pub stdin: Option<File>,
    /// Read end of the child's stdout pipe, if stdout was `Pipe`.
    pub stdout: Option<File>,
    /// Read end of the child's stderr pipe, if stderr was `Pipe`.
    pub stderr: Option<File>,
    status: Option<ExitStatus>,
}

impl Process {
    /// Spawn `argv` with the given options.
    ///
    /// `argv` must be non-empty; element 0 is the program, looked up on
    /// `PATH` when it contains no slash. The argument vector is passed to
    /// the exec verbatim, so no shell interpretation can occur.
    ///
    /// Spawn-time failures in the child (bad working directory, failed
    /// pre-exec hook, missing program) are delivered back through a
    /// close-on-exec control pipe and surface here as typed errors; the
    /// half-constructed child is reaped before the error is returned.
    pub fn spawn(argv: &[impl AsRef<OsStr>], options: SpawnOptions) -> Result<Process> {
        let argv: Vec<OsString> = argv.iter().map(|a| a.as_ref().to_os_string()).collect();
        spawn::spawn_process(argv, options)
    }

    pub(crate) fn from_parts(
        command: Vec<OsString>,
        pid: Pid,
        stdin: Option<File>,
        stdout: Option<File>,
        stderr: Option<File>,
    ) -> Process {
        Process {
            command,
            pid,
            stdin,
            stdout,
            stderr,
            status: None,
        }
    }

    /// The child's process id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The argument vector the child was spawned with.
    pub fn command(&self) -> &[OsString] {
        &self.command
    }

    /// The exit status, if the child has been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Check for child exit without blocking.
    ///
    /// Returns the exit status if the child has finished, `None` while it
    /// is still running. Once a status has been observed it is stored and
    /// every subsequent `poll` or `wait` returns the same value.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        if self.status.is_some() {
            return self.status;
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(ws) => {
                if let Some(status) = convert_wait_status(ws) {
                    self.record_status(status);
                }
            }
            Err(Errno::EINTR) => {}
            Err(e) => {
                debug!(pid = self.pid.as_raw(), error = %e, "waitpid failed");
            }
        }
        self.status
    }

    /// Wait for the child to exit and return its status.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(ws) => {
                    if let Some(status) = convert_wait_status(ws) {
                        self.record_status(status);
                        return Ok(status);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(Error::os("waitpid", e.into())),
            }
        }
    }

    /// Feed `input` to the child's stdin while collecting its stdout and
    /// stderr, without deadlock, until both output streams close.
    ///
    /// Returns the collected `(stdout, stderr)` bytes and reaps the
    /// child. Streams that were not redirected to a pipe yield empty
    /// buffers. Supplying input without a stdin pipe is an argument
    /// error; supplying an empty buffer closes stdin immediately so the
    /// child sees EOF.
    ///
    /// With a timeout, expiry raises [`Error::Timeout`] carrying the
    /// bytes collected so far. The child is left running and a later
    /// `communicate` call picks up where this one stopped.
    pub fn communicate(
        &mut self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        communicate::communicate(self, input, timeout, None)
    }

    /// Like [`communicate`](Process::communicate), but delivers output
    /// incrementally: `sink` is invoked with whatever was read from
    /// stdout and stderr since its previous invocation.
    pub fn communicate_with(
        &mut self,
        input: Option<&[u8]>,
        timeout: Option<Duration>,
        mut sink: impl FnMut(Vec<u8>, Vec<u8>),
    ) -> Result<()> {
        communicate::communicate(self, input, timeout, Some(&mut sink))?;
        Ok(())
    }

    /// Send a signal to the child. Safe to call from any thread.
    pub fn send_signal(&self, signal: Signal) -> Result<()> {
        kill(self.pid, signal).map_err(|e| Error::os(format!("kill ({})", signal.as_str()), e.into()))
    }

    /// Send `SIGTERM` to the child.
    pub fn terminate(&self) -> Result<()> {
        self.send_signal(Signal::SIGTERM)
    }

    /// Send `SIGKILL` to the child.
    pub fn kill(&self) -> Result<()> {
        self.send_signal(Signal::SIGKILL)
    }

    /// Lossy single-line rendering of the command, for error messages.
    pub(crate) fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn record_status(&mut self, status: ExitStatus) {
        debug!(pid = self.pid.as_raw(), status = %status, "child reaped");
        self.status = Some(status);
    }
}

fn convert_wait_status(ws: WaitStatus) -> Option<ExitStatus> {
    match ws {
        WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
        WaitStatus::Signaled(_, signal, _) => Some(ExitStatus::Signaled(signal as i32)),
        WaitStatus::Stopped(_, signal) => Some(ExitStatus::Stopped(signal as i32)),
        _ => None,
    }
}
