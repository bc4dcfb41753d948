//! Process-wide SIGCHLD broker.
//!
//! Installs a single SIGCHLD handler while any communicate call is in
//! flight and fans child-death notifications out to per-call self-pipes.
//! The wakeup takes two hops: the handler performs exactly one
//! non-blocking write to the broker's global notify pipe, and whichever
//! communicate loop observes that pipe readable drains it and calls
//! [`wakeup_all`], which writes one byte to every registered self-pipe.
//! The handler itself never touches the registry: it runs on whatever
//! thread took the signal, which may already hold the broker mutex.

use lazy_static::lazy_static;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{getpid, pipe2, write, Pid};
use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use subproc_common::{Error, Result};
use tracing::debug;

struct BrokerState {
    /// Child pid -> write end of that communicate call's self-pipe.
    watchers: HashMap<i32, OwnedFd>,
    /// SIGCHLD disposition to restore when the last watcher leaves.
    prev_action: Option<SigAction>,
    /// Global notify pipe written by the signal handler.
    notify_read: Option<OwnedFd>,
    notify_write: Option<OwnedFd>,
    /// Pid that created the notify pipe. A mismatch with the current pid
    /// means we are in a fork and the pipe must be re-created.
    owner_pid: i32,
}

lazy_static! {
    static ref BROKER: Mutex<BrokerState> = Mutex::new(BrokerState {
        watchers: HashMap::new(),
        prev_action: None,
        notify_read: None,
        notify_write: None,
        owner_pid: 0,
    });
}

/// Write end of the notify pipe, published for the signal handler.
static NOTIFY_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

/// SIGCHLD handler: one non-blocking single-byte write, errno preserved,
/// nothing else. Runs in async-signal context.
extern "C" fn on_sigchld(_: libc::c_int) {
    let fd = NOTIFY_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let saved = Errno::last_raw();
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
        Errno::set_raw(saved);
    }
}

/// A communicate call's registration with the broker.
///
/// Holds the read end of the per-call self-pipe and the shared read end
/// of the global notify pipe, both for inclusion in the call's wait set.
/// Dropping the subscription unregisters the pid.
#[derive(Debug)]
pub(crate) struct Subscription {
    pub self_read: OwnedFd,
    pub notify_read: RawFd,
    pid: Pid,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        unregister(self.pid);
    }
}

/// Register a child pid for wakeups. Installs the SIGCHLD handler on the
/// first registration; re-creates the global notify pipe when the current
/// process is a fork of the one that created it.
pub(crate) fn register(pid: Pid) -> Result<Subscription> {
    let mut state = BROKER.lock().unwrap();

    if state.watchers.is_empty() {
        let current = getpid().as_raw();
        if state.notify_read.is_none() || state.owner_pid != current {
            let (read, write) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
                .map_err(|e| Error::os("notify pipe", e.into()))?;
            NOTIFY_WRITE_FD.store(write.as_raw_fd(), Ordering::Relaxed);
            state.notify_read = Some(read);
            state.notify_write = Some(write);
            state.owner_pid = current;
            debug!(pid = current, "created SIGCHLD notify pipe");
        }

        let action = SigAction::new(
            SigHandler::Handler(on_sigchld),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        let prev = unsafe { sigaction(Signal::SIGCHLD, &action) }
            .map_err(|e| Error::os("sigaction", e.into()))?;
        state.prev_action = Some(prev);
        debug!("installed SIGCHLD handler");
    }

    let (self_read, self_write) = pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)
        .map_err(|e| Error::os("self pipe", e.into()))?;
    state.watchers.insert(pid.as_raw(), self_write);

    let notify_read = state
        .notify_read
        .as_ref()
        .expect("notify pipe exists while watchers are registered")
        .as_raw_fd();

    Ok(Subscription {
        self_read,
        notify_read,
        pid,
    })
}

/// Remove a pid's registration; restores the previous SIGCHLD disposition
/// when the table empties. The notify pipe is kept for the next round.
fn unregister(pid: Pid) {
    let mut state = BROKER.lock().unwrap();
    state.watchers.remove(&pid.as_raw());
    if state.watchers.is_empty() {
        if let Some(prev) = state.prev_action.take() {
            let _ = unsafe { sigaction(Signal::SIGCHLD, &prev) };
            debug!("restored previous SIGCHLD disposition");
        }
    }
}

/// Fan a child-death notification out to every registered self-pipe.
///
/// Called from ordinary thread context by whichever communicate loop saw
/// the global notify pipe become readable. Non-blocking; a full self-pipe
/// already has a wakeup pending, so "would block" is swallowed.
pub(crate) fn wakeup_all() {
    let state = BROKER.lock().unwrap();
    for self_write in state.watchers.values() {
        match write(self_write.as_fd(), &[0u8]) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => debug!(error = %e, "self-pipe wakeup failed"),
        }
    }
}
