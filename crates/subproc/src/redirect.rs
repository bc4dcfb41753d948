//! Standard-stream redirection and the fd resolver.
//!
//! [`Redirect`] is the caller-facing description of what to do with one of
//! the child's standard streams. The resolver interprets the three
//! redirections into concrete `(child_end, parent_end)` descriptor pairs
//! before the fork; it performs no I/O other than opening `Path` files.

use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use subproc_common::{Error, Result};

/// What to do with a standard stream of the child process.
#[derive(Debug)]
pub enum Redirect {
    /// Inherit the stream from the parent.
    Inherit,

    /// Connect the stream to a fresh pipe.
    ///
    /// For stdin the child receives the read end and the parent keeps the
    /// write end; for stdout and stderr the child receives the write end
    /// and the parent keeps the read end. The parent-side end appears as
    /// the corresponding field on the spawned `Process`.
    Pipe,

    /// Point the child's stderr at whatever its stdout is connected to,
    /// the equivalent of the shell's `2>&1`. Only valid for stderr.
    MergeStdout,

    /// Connect the stream to an existing descriptor of the parent.
    ///
    /// The descriptor is borrowed: the library duplicates it into the
    /// child but never closes it.
    Fd(RawFd),

    /// Connect the stream to an already-open file.
    ///
    /// The file is moved into the spawn call; the child receives a
    /// duplicate and the parent's copy is closed once the child is
    /// running.
    File(File),

    /// Open the named file for the stream and hand it to the child.
    ///
    /// Opened read-only for stdin, created/truncated for stdout and
    /// stderr. The library closes its copy in the parent after the fork.
    Path(PathBuf),
}

/// The descriptor a child stream will be dup2'd from.
///
/// The `Owned`/`Borrowed` split records the resolver's "opened by us"
/// judgement: owned ends (pipe ends, `Path` opens, moved-in `File`s) are
/// the parent's to close once the child holds its duplicate, borrowed raw
/// descriptors are the caller's.
#[derive(Debug)]
pub(crate) enum ChildEnd {
    Owned(OwnedFd),
    Borrowed(RawFd),
}

impl ChildEnd {
    pub(crate) fn raw(&self) -> RawFd {
        match self {
            ChildEnd::Owned(fd) => fd.as_raw_fd(),
            ChildEnd::Borrowed(fd) => *fd,
        }
    }
}

/// Resolved ends for one standard stream.
#[derive(Debug, Default)]
pub(crate) struct StreamEnds {
    /// What the child will dup2 onto 0/1/2, if anything.
    pub child: Option<ChildEnd>,
    /// What the parent retains, if anything (pipe ends only).
    pub parent: Option<OwnedFd>,
}

/// Resolved descriptor plumbing for all three standard streams.
#[derive(Debug)]
pub(crate) struct ResolvedStdio {
    pub stdin: StreamEnds,
    pub stdout: StreamEnds,
    pub stderr: StreamEnds,
    /// Set when stderr was `MergeStdout`; the spawner dup2s 1 onto 2 in
    /// the child after stdout is in place.
    pub merge_stderr: bool,
}

enum Direction {
    Read,
    Write,
}

/// Interpret the three redirections into descriptor pairs.
pub(crate) fn resolve(
    stdin: Redirect,
    stdout: Redirect,
    stderr: Redirect,
) -> Result<ResolvedStdio> {
    if matches!(stdin, Redirect::MergeStdout) {
        return Err(Error::argument("MergeStdout is not valid for stdin"));
    }
    if matches!(stdout, Redirect::MergeStdout) {
        return Err(Error::argument("MergeStdout is not valid for stdout"));
    }

    let merge_stderr = matches!(stderr, Redirect::MergeStdout);

    let stdin = resolve_stream(stdin, Direction::Read)?;
    let stdout = resolve_stream(stdout, Direction::Write)?;
    let stderr = if merge_stderr {
        StreamEnds::default()
    } else {
        resolve_stream(stderr, Direction::Write)?
    };

    Ok(ResolvedStdio {
        stdin,
        stdout,
        stderr,
        merge_stderr,
    })
}

fn resolve_stream(redirect: Redirect, direction: Direction) -> Result<StreamEnds> {
    match redirect {
        Redirect::Inherit => Ok(StreamEnds::default()),

        Redirect::Pipe => {
            // Both ends close-on-exec: the child's duplicate made by dup2
            // does not carry the flag, and nothing else may leak into the
            // exec image.
            let (read, write) = pipe2(OFlag::O_CLOEXEC)
                .map_err(|e| Error::os("pipe", e.into()))?;
            Ok(match direction {
                Direction::Read => StreamEnds {
                    child: Some(ChildEnd::Owned(read)),
                    parent: Some(write),
                },
                Direction::Write => StreamEnds {
                    child: Some(ChildEnd::Owned(write)),
                    parent: Some(read),
                },
            })
        }

        Redirect::Fd(fd) => {
            if fd < 0 {
                return Err(Error::argument(format!("invalid descriptor {}", fd)));
            }
            Ok(StreamEnds {
                child: Some(ChildEnd::Borrowed(fd)),
                parent: None,
            })
        }

        Redirect::File(file) => Ok(StreamEnds {
            child: Some(ChildEnd::Owned(file.into())),
            parent: None,
        }),

        Redirect::Path(path) => {
            let file = match direction {
                Direction::Read => File::open(&path),
                Direction::Write => OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path),
            }
            .map_err(|e| Error::os(format!("open {}", path.display()), e))?;
            Ok(StreamEnds {
                child: Some(ChildEnd::Owned(file.into())),
                parent: None,
            })
        }

        Redirect::MergeStdout => unreachable!("checked by resolve"),
    }
}
