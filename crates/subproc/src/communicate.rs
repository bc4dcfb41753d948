//! The communicate engine.
//!
//! One loop multiplexes writing the caller's input to the child's stdin
//! with draining its stdout and stderr, plus the broker's two wakeup
//! channels, under an optional absolute deadline. The only blocking point
//! is the `poll(2)` wait; every read and write is non-blocking, with
//! would-block, interrupt, and broken-pipe conditions handled in place.
//!
//! When the child is observed dead the loop switches to a final pass that
//! drains whatever is still buffered in the user pipes without waiting
//! again; polling before draining would race a child that writes and
//! exits between two waits and lose the tail of its output.

use crate::broker;
use crate::process::Process;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{read, write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::time::{Duration, Instant};
use subproc_common::{Error, Result};
use tracing::{debug, trace};

const READ_CHUNK: usize = 4096;

/// Incremental delivery callback: receives whatever was read from stdout
/// and stderr since the previous delivery.
pub(crate) type Sink<'a> = &'a mut dyn FnMut(Vec<u8>, Vec<u8>);

/// Run the communicate loop on `process`.
///
/// With a sink, accumulated bytes are handed over as they arrive and the
/// final return value is a pair of empty buffers; without one, the pair
/// carries everything read until both streams closed.
pub(crate) fn communicate(
    process: &mut Process,
    input: Option<&[u8]>,
    timeout: Option<Duration>,
    mut sink: Option<Sink<'_>>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    if input.is_some() && process.stdin.is_none() {
        return Err(Error::argument("input supplied but stdin is not a pipe"));
    }

    let mut pending = input.unwrap_or(&[]);

    // Nothing to write: close stdin before the first wait so the child
    // sees EOF. This covers both absent input and the empty buffer.
    if pending.is_empty() {
        process.stdin = None;
    }

    let deadline = timeout.map(|t| Instant::now() + t);
    let subscription = broker::register(process.pid())?;

    set_nonblocking(process, true)?;
    let result = run_loop(process, &mut pending, deadline, &subscription, &mut sink);
    set_nonblocking(process, false)?;

    match result {
        Ok((stdout, stderr)) => {
            process.wait()?;
            Ok((stdout, stderr))
        }
        Err(e) => Err(e),
    }
}

fn run_loop(
    process: &mut Process,
    pending: &mut &[u8],
    deadline: Option<Instant>,
    subscription: &broker::Subscription,
    sink: &mut Option<Sink<'_>>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut stdout_acc: Vec<u8> = Vec::new();
    let mut stderr_acc: Vec<u8> = Vec::new();

    loop {
        // A dead child cannot write more than what is already buffered:
        // collect that without waiting and finish.
        if process.poll().is_some() {
            if let Some(f) = &process.stdout {
                drain_pipe(f.as_raw_fd(), &mut stdout_acc);
            }
            if let Some(f) = &process.stderr {
                drain_pipe(f.as_raw_fd(), &mut stderr_acc);
            }
            process.stdin = None;
            process.stdout = None;
            process.stderr = None;
            deliver(sink, &mut stdout_acc, &mut stderr_acc);
            trace!("child exited, final drain complete");
            return Ok((stdout_acc, stderr_acc));
        }

        let timeout_arg = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(timeout_error(process, stdout_acc, stderr_acc));
                }
                // Round up: a zero-millisecond poll would spin.
                let ms = deadline
                    .saturating_duration_since(now)
                    .as_millis()
                    .saturating_add(1)
                    .min(i32::MAX as u128) as i32;
                PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
            }
            None => PollTimeout::NONE,
        };

        let write_stdin = !pending.is_empty() && process.stdin.is_some();
        let ready = match wait_ready(process, subscription, write_stdin, timeout_arg) {
            Ok(Some(ready)) => ready,
            Ok(None) => return Err(timeout_error(process, stdout_acc, stderr_acc)),
            Err(e) => return Err(Error::os("poll", e.into())),
        };

        if ready.stdout {
            if let Some(f) = &process.stdout {
                if drain_pipe(f.as_raw_fd(), &mut stdout_acc) == DrainOutcome::Closed {
                    process.stdout = None;
                }
            }
        }
        if ready.stderr {
            if let Some(f) = &process.stderr {
                if drain_pipe(f.as_raw_fd(), &mut stderr_acc) == DrainOutcome::Closed {
                    process.stderr = None;
                }
            }
        }

        // Some child died somewhere: consume the notification and let the
        // broker wake every interested loop, ourselves included.
        if ready.notify {
            drain_discard(subscription.notify_read);
            broker::wakeup_all();
        }
        if ready.self_pipe {
            drain_discard(subscription.self_read.as_raw_fd());
        }

        if ready.stdin {
            feed_stdin(process, pending);
        }

        deliver(sink, &mut stdout_acc, &mut stderr_acc);
    }
}

struct Ready {
    stdout: bool,
    stderr: bool,
    notify: bool,
    self_pipe: bool,
    stdin: bool,
}

impl Ready {
    const NOTHING: Ready = Ready {
        stdout: false,
        stderr: false,
        notify: false,
        self_pipe: false,
        stdin: false,
    };
}

/// Multiplexed wait. `Ok(None)` means the wait timed out with nothing
/// ready.
fn wait_ready(
    process: &Process,
    subscription: &broker::Subscription,
    write_stdin: bool,
    timeout: PollTimeout,
) -> nix::Result<Option<Ready>> {
    let in_flags = PollFlags::POLLIN;
    let mut fds: Vec<PollFd> = Vec::with_capacity(5);

    let mut stdout_at = None;
    let mut stderr_at = None;
    let mut stdin_at = None;

    if let Some(f) = &process.stdout {
        stdout_at = Some(fds.len());
        fds.push(PollFd::new(f.as_fd(), in_flags));
    }
    if let Some(f) = &process.stderr {
        stderr_at = Some(fds.len());
        fds.push(PollFd::new(f.as_fd(), in_flags));
    }

    let notify_at = fds.len();
    // SAFETY: the broker keeps the notify pipe open for at least the
    // lifetime of the subscription borrowed here.
    let notify_fd = unsafe { BorrowedFd::borrow_raw(subscription.notify_read) };
    fds.push(PollFd::new(notify_fd, in_flags));

    let self_at = fds.len();
    fds.push(PollFd::new(subscription.self_read.as_fd(), in_flags));

    if write_stdin {
        if let Some(f) = &process.stdin {
            stdin_at = Some(fds.len());
            fds.push(PollFd::new(f.as_fd(), PollFlags::POLLOUT));
        }
    }

    let n = match poll(&mut fds, timeout) {
        Ok(n) => n,
        // Bounce back to the caller, which re-checks the deadline and the
        // child before waiting again.
        Err(Errno::EINTR) => return Ok(Some(Ready::NOTHING)),
        Err(e) => return Err(e),
    };
    if n == 0 {
        return Ok(None);
    }

    let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    let writable = PollFlags::POLLOUT | PollFlags::POLLHUP | PollFlags::POLLERR;
    let is_set = |at: Option<usize>, mask: PollFlags| {
        at.map(|i| fds[i].revents().is_some_and(|r| r.intersects(mask)))
            .unwrap_or(false)
    };

    Ok(Some(Ready {
        stdout: is_set(stdout_at, readable),
        stderr: is_set(stderr_at, readable),
        notify: is_set(Some(notify_at), readable),
        self_pipe: is_set(Some(self_at), readable),
        stdin: is_set(stdin_at, writable),
    }))
}

/// One non-blocking write of the remaining input.
///
/// Would-block and interrupt are no-ops (poll can spuriously mark a pipe
/// writable); broken pipe means the child closed its read end early, which
/// ends the writing side without surfacing an error.
fn feed_stdin(process: &mut Process, pending: &mut &[u8]) {
    let Some(f) = &process.stdin else { return };
    match write(f.as_fd(), pending) {
        Ok(n) => {
            *pending = &pending[n..];
            if pending.is_empty() {
                trace!("input fully written, closing stdin");
                process.stdin = None;
            }
        }
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
        Err(Errno::EPIPE) => {
            debug!("child closed stdin early, dropping remaining input");
            *pending = &[];
            process.stdin = None;
        }
        Err(_) => {
            *pending = &[];
            process.stdin = None;
        }
    }
}

#[derive(PartialEq, Eq)]
enum DrainOutcome {
    Open,
    Closed,
}

/// Repeated non-blocking reads into `acc` until would-block or EOF.
fn drain_pipe(fd: RawFd, acc: &mut Vec<u8>) -> DrainOutcome {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match read(fd, &mut buf) {
            Ok(0) => return DrainOutcome::Closed,
            Ok(n) => acc.extend_from_slice(&buf[..n]),
            Err(Errno::EAGAIN) => return DrainOutcome::Open,
            Err(Errno::EINTR) => continue,
            Err(_) => return DrainOutcome::Closed,
        }
    }
}

/// Drain a wakeup channel, discarding the bytes.
fn drain_discard(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        match read(fd, &mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

fn deliver(sink: &mut Option<Sink<'_>>, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) {
    if let Some(sink) = sink {
        if !stdout.is_empty() || !stderr.is_empty() {
            sink(std::mem::take(stdout), std::mem::take(stderr));
        }
    }
}

fn timeout_error(process: &Process, stdout: Vec<u8>, stderr: Vec<u8>) -> Error {
    debug!(
        pid = process.pid().as_raw(),
        stdout = stdout.len(),
        stderr = stderr.len(),
        "communicate deadline expired"
    );
    Error::timeout(process.command_line(), stdout, stderr)
}

/// Toggle O_NONBLOCK on every pipe end the process still holds. The ends
/// are handed to callers as ordinary blocking files; only the communicate
/// loop flips them.
fn set_nonblocking(process: &Process, enable: bool) -> Result<()> {
    for f in [&process.stdin, &process.stdout, &process.stderr]
        .into_iter()
        .flatten()
    {
        let fd = f.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::os("fcntl", e.into()))?;
        let mut flags = OFlag::from_bits_retain(flags);
        flags.set(OFlag::O_NONBLOCK, enable);
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::os("fcntl", e.into()))?;
    }
    Ok(())
}
