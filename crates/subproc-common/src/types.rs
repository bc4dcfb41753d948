//! Exit-status model and human-readable formatting.
//!
//! [`ExitStatus`] records how a reaped child ended: normal exit, killed by
//! a signal, or stopped by a signal. [`ExitStatus::from_raw`] decodes the
//! platform wait-status word using the standard bit layout, so statuses
//! obtained outside this library (e.g. from a direct `waitpid`) can be
//! fed through [`format_status`] as well.

use crate::errors::{Error, Result};
use nix::sys::signal::Signal;
use std::fmt;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The child called `_exit` or returned from `main` with this code.
    Exited(i32),
    /// The child was killed by this signal.
    Signaled(i32),
    /// The child was stopped by this signal.
    Stopped(i32),
    /// A wait-status word that decodes to none of the above.
    Other(i32),
}

impl ExitStatus {
    /// True if the child exited normally with status 0.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Decode a raw wait-status word.
    ///
    /// Uses the conventional encoding: the low 7 bits carry the
    /// terminating signal (0 for normal exit, 0x7f for stopped), the
    /// high byte carries the exit code or stop signal.
    pub fn from_raw(status: i32) -> ExitStatus {
        let low7 = status & 0x7f;
        if low7 == 0 {
            ExitStatus::Exited((status >> 8) & 0xff)
        } else if low7 == 0x7f {
            if (status & 0xff) == 0x7f {
                ExitStatus::Stopped((status >> 8) & 0xff)
            } else {
                ExitStatus::Other(status)
            }
        } else {
            ExitStatus::Signaled(low7)
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match format_status(self, false) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "unrecognized status"),
        }
    }
}

/// Render an exit status as a human-readable string.
///
/// Reports "exited with status N", "killed by signal K", or "stopped by
/// signal K". With `convert_high_exit` set, an exit code above 128 whose
/// excess over 128 is a known signal number is annotated with the signal
/// name, since shells encode "killed by signal K" as exit code 128+K.
///
/// A status that decodes to none of the recognized forms is an argument
/// error.
pub fn format_status(status: &ExitStatus, convert_high_exit: bool) -> Result<String> {
    match *status {
        ExitStatus::Exited(code) => {
            let mut out = format!("exited with status {}", code);
            if convert_high_exit && code > 128 {
                if let Some(name) = signal_name(code - 128) {
                    out.push_str(&format!(" (maybe {})", name));
                }
            }
            Ok(out)
        }
        ExitStatus::Signaled(sig) => Ok(format!("killed by signal {}", sig)),
        ExitStatus::Stopped(sig) => Ok(format!("stopped by signal {}", sig)),
        ExitStatus::Other(raw) => Err(Error::argument(format!(
            "unrecognized wait status {:#x}",
            raw
        ))),
    }
}

/// Name of a signal number, if it is one the platform knows.
fn signal_name(sig: i32) -> Option<&'static str> {
    Signal::try_from(sig).ok().map(|s| s.as_str())
}
