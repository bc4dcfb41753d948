//! # Subproc
//!
//! POSIX child-process control: spawn external programs with precise
//! descriptor plumbing, then communicate with them without deadlock.
//!
//! The heart of the crate is the communicate engine: one `poll(2)` loop
//! that feeds arbitrarily large input to the child's stdin while draining
//! its stdout and stderr, cooperating with a process-wide SIGCHLD broker
//! so the loop wakes promptly when a child exits, and preserving all
//! bytes across timeouts and early child-side closes.
//!
//! ```no_run
//! use subproc::{Process, Redirect, SpawnOptions};
//!
//! # fn main() -> subproc::Result<()> {
//! let mut p = Process::spawn(
//!     &["tr", "a-z", "A-Z"],
//!     SpawnOptions {
//!         stdin: Redirect::Pipe,
//!         stdout: Redirect::Pipe,
//!         ..Default::default()
//!     },
//! )?;
//! let (out, _err) = p.communicate(Some(b"hello".as_slice()), None)?;
//! assert_eq!(out, b"HELLO");
//! # Ok(())
//! # }
//! ```

mod broker;
mod communicate;
pub mod convenience;
mod process;
mod redirect;
mod spawn;
pub mod validation;

pub use convenience::{call, check_call, check_output, popen};
pub use process::Process;
pub use redirect::Redirect;
pub use spawn::{ExecOpts, SpawnOptions};

// Shared types, re-exported so callers need only this crate.
pub use subproc_common::{format_status, Error, ExitStatus, Result};

// Signals are addressed with the nix type; re-exported for callers of
// `Process::send_signal`.
pub use nix::sys::signal::Signal;
