//! Fork/exec machinery with control-pipe failure delivery.
//!
//! Everything that can allocate runs before the fork: argument vectors and
//! environment blocks are converted to NUL-terminated form, redirections
//! are resolved, and the control pipe is created close-on-exec. The child
//! path between fork and exec is restricted to raw syscalls; failures are
//! serialized onto the control pipe as a tagged record and the parent
//! reaps the child before surfacing the reconstructed error.

use crate::process::Process;
use crate::redirect::{self, ChildEnd, Redirect, ResolvedStdio};
use crate::validation;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::wait::waitpid;
use nix::unistd::{access, fork, pipe2, read, sysconf, AccessFlags, ForkResult, Pid, SysconfVar};
use std::ffi::{CString, OsStr, OsString};
use std::fmt::{self, Write as _};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use subproc_common::{Error, Result};
use tracing::debug;

/// Refinements merged into the exec step, applied in the child after the
/// pre-exec hook and before descriptors are swept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOpts {
    /// Run the child under this user id (`setuid(2)` before exec).
    pub setuid: Option<u32>,
    /// Run the child under this group id (`setgid(2)` before exec).
    pub setgid: Option<u32>,
    /// Make the child the leader of a new process group (`setpgid(0, 0)`).
    pub setpgid: bool,
}

/// Options accepted by [`Process::spawn`].
///
/// Construct with struct-update syntax over [`Default`]:
///
/// ```no_run
/// # use subproc::{Process, Redirect, SpawnOptions};
/// let p = Process::spawn(
///     &["cat"],
///     SpawnOptions {
///         stdin: Redirect::Pipe,
///         stdout: Redirect::Pipe,
///         ..Default::default()
///     },
/// );
/// ```
pub struct SpawnOptions {
    /// Standard input of the child.
    pub stdin: Redirect,
    /// Standard output of the child.
    pub stdout: Redirect,
    /// Standard error of the child.
    pub stderr: Redirect,
    /// Working directory for the child (and for the pre-exec hook).
    pub cwd: Option<PathBuf>,
    /// Full environment replacement. `None` inherits the parent's.
    pub env: Option<Vec<(OsString, OsString)>>,
    /// Descriptors to keep open across the exec. Everything else above
    /// fd 2 is closed in the child.
    pub retain_fds: Vec<RawFd>,
    /// Low-level exec refinements.
    pub exec_opts: ExecOpts,
    /// Hook run in the child between fork and exec.
    ///
    /// The hook runs in a freshly forked, single-threaded child: it must
    /// restrict itself to async-signal-safe operations and must not rely
    /// on locks, threads, or allocator state of the parent.
    pub preexec_fn: Option<Box<dyn FnMut() -> io::Result<()> + Send>>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            stdin: Redirect::Inherit,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
            cwd: None,
            env: None,
            retain_fds: Vec::new(),
            exec_opts: ExecOpts::default(),
            preexec_fn: None,
        }
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("stdin", &self.stdin)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("cwd", &self.cwd)
            .field("env", &self.env.as_ref().map(|e| e.len()))
            .field("retain_fds", &self.retain_fds)
            .field("exec_opts", &self.exec_opts)
            .field("preexec_fn", &self.preexec_fn.is_some())
            .finish()
    }
}

// Control-pipe record: tag, errno (LE), context length (LE), context bytes.
const TAG_ARGUMENT: u8 = b'a';
const TAG_OS: u8 = b'o';
const TAG_HOOK: u8 = b'h';
const RECORD_HEADER: usize = 1 + 4 + 4;
const RECORD_CONTEXT_MAX: usize = 256;

/// Fixed-capacity buffer the child formats failure context into, so the
/// post-fork path never heap-allocates.
struct MsgBuf {
    buf: [u8; RECORD_CONTEXT_MAX],
    len: usize,
}

impl MsgBuf {
    fn new() -> Self {
        MsgBuf {
            buf: [0; RECORD_CONTEXT_MAX],
            len: 0,
        }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut m = MsgBuf::new();
        let n = bytes.len().min(RECORD_CONTEXT_MAX);
        m.buf[..n].copy_from_slice(&bytes[..n]);
        m.len = n;
        m
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for MsgBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = RECORD_CONTEXT_MAX - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// A failure observed in the child before exec completed.
struct ChildFailure {
    tag: u8,
    errno: i32,
    context: MsgBuf,
}

impl ChildFailure {
    fn os(errno: Errno, context: &str) -> Self {
        ChildFailure {
            tag: TAG_OS,
            errno: errno as i32,
            context: MsgBuf::from_bytes(context.as_bytes()),
        }
    }
}

/// Everything the child path needs, fully prepared before the fork.
struct ChildContext {
    program: CString,
    argv_ptrs: Vec<*const libc::c_char>,
    env_ptrs: Option<Vec<*const libc::c_char>>,
    cwd: Option<CString>,
    stdin_fd: Option<RawFd>,
    stdout_fd: Option<RawFd>,
    stderr_fd: Option<RawFd>,
    merge_stderr: bool,
    exec_opts: ExecOpts,
    /// Sorted, for allocation-free membership tests in the child.
    retain_fds: Vec<RawFd>,
    control_write: RawFd,
    max_fd: RawFd,
}

/// Spawn `argv` with the given options.
pub(crate) fn spawn_process(argv: Vec<OsString>, mut options: SpawnOptions) -> Result<Process> {
    validation::validate_argv(&argv)?;
    if let Some(env) = &options.env {
        validation::validate_env(env)?;
    }

    let argv_c = to_cstrings(argv.iter().map(|a| a.as_bytes()))?;
    let program = resolve_program(&argv[0], options.env.as_deref())?;
    let program_c = CString::new(program.as_bytes())
        .map_err(|_| Error::argument("program path contains an interior NUL byte"))?;
    let env_c = match &options.env {
        Some(env) => Some(to_cstrings(env.iter().map(|(k, v)| {
            let mut kv = k.as_bytes().to_vec();
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            kv
        }))?),
        None => None,
    };
    let cwd_c = match &options.cwd {
        Some(dir) => Some(
            CString::new(dir.as_os_str().as_bytes())
                .map_err(|_| Error::argument("cwd contains an interior NUL byte"))?,
        ),
        None => None,
    };

    let mut argv_ptrs: Vec<*const libc::c_char> = argv_c.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());
    let env_ptrs = env_c.as_ref().map(|env| {
        let mut ptrs: Vec<*const libc::c_char> = env.iter().map(|c| c.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        ptrs
    });

    let mut resolved = redirect::resolve(options.stdin, options.stdout, options.stderr)?;
    lift_low_child_ends(&mut resolved)?;

    let mut retain_fds = options.retain_fds.clone();
    retain_fds.sort_unstable();
    retain_fds.dedup();

    let (control_read, control_write) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::os("control pipe", e.into()))?;

    let ctx = ChildContext {
        program: program_c,
        argv_ptrs,
        env_ptrs,
        cwd: cwd_c,
        stdin_fd: resolved.stdin.child.as_ref().map(ChildEnd::raw),
        stdout_fd: resolved.stdout.child.as_ref().map(ChildEnd::raw),
        stderr_fd: resolved.stderr.child.as_ref().map(ChildEnd::raw),
        merge_stderr: resolved.merge_stderr,
        exec_opts: options.exec_opts,
        retain_fds,
        control_write: control_write.as_raw_fd(),
        max_fd: highest_possible_fd(),
    };

    match unsafe { fork() }.map_err(|e| Error::os("fork", e.into()))? {
        ForkResult::Child => {
            let failure = run_child(&ctx, &mut options.preexec_fn);
            report_child_failure(ctx.control_write, &failure);
            unsafe { libc::_exit(127) }
        }
        ForkResult::Parent { child } => {
            // The child's copies are live; the parent's are closed here.
            // Owned ends (pipe child-sides, Path opens, moved-in Files)
            // close on drop, borrowed caller descriptors are untouched.
            drop(resolved.stdin.child.take());
            drop(resolved.stdout.child.take());
            drop(resolved.stderr.child.take());
            drop(control_write);

            finish_spawn(argv, child, control_read, resolved)
        }
    }
}

/// Parent side after the fork: read the control pipe, reap-and-raise on a
/// delivered failure, otherwise assemble the `Process`.
fn finish_spawn(
    command: Vec<OsString>,
    child: Pid,
    control_read: OwnedFd,
    resolved: ResolvedStdio,
) -> Result<Process> {
    let record = read_control_record(control_read.as_raw_fd());
    drop(control_read);

    if let Some(record) = record {
        // The exec never happened; reap before surfacing so no zombie
        // outlives the error.
        loop {
            match waitpid(child, None) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
        return Err(decode_child_failure(&record));
    }

    debug!(
        pid = child.as_raw(),
        command = ?command,
        "spawned child"
    );

    Ok(Process::from_parts(
        command,
        child,
        resolved.stdin.parent.map(File::from),
        resolved.stdout.parent.map(File::from),
        resolved.stderr.parent.map(File::from),
    ))
}

/// Read the failure record from the control pipe. `None` means the pipe
/// closed empty: the exec succeeded.
fn read_control_record(fd: RawFd) -> Option<Vec<u8>> {
    let mut record = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => record.extend_from_slice(&buf[..n]),
            Err(Errno::EINTR) => continue,
            Err(_) => break,
        }
    }
    if record.is_empty() {
        None
    } else {
        Some(record)
    }
}

fn decode_child_failure(record: &[u8]) -> Error {
    if record.len() < RECORD_HEADER {
        return Error::os_raw("spawn", Errno::EIO as i32);
    }
    let tag = record[0];
    let errno = i32::from_le_bytes(record[1..5].try_into().unwrap());
    let len = u32::from_le_bytes(record[5..9].try_into().unwrap()) as usize;
    let context = record
        .get(RECORD_HEADER..RECORD_HEADER + len)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default();

    match tag {
        TAG_ARGUMENT => Error::argument(context),
        TAG_HOOK => Error::pre_exec(context),
        _ => Error::os_raw(context, errno),
    }
}

/// The child path: syscalls only, no allocation. Returns only on failure.
fn run_child(
    ctx: &ChildContext,
    preexec_fn: &mut Option<Box<dyn FnMut() -> io::Result<()> + Send>>,
) -> ChildFailure {
    // 1. Standard streams. All child ends sit above fd 2, so plain dup2
    //    in stream order cannot clobber a pending source.
    for (src, target, name) in [
        (ctx.stdin_fd, 0, "dup2 stdin"),
        (ctx.stdout_fd, 1, "dup2 stdout"),
        (ctx.stderr_fd, 2, "dup2 stderr"),
    ] {
        if let Some(src) = src {
            if unsafe { libc::dup2(src, target) } < 0 {
                return ChildFailure::os(Errno::last(), name);
            }
        }
    }
    if ctx.merge_stderr {
        if unsafe { libc::dup2(1, 2) } < 0 {
            return ChildFailure::os(Errno::last(), "dup2 stdout onto stderr");
        }
    }

    // 2. Working directory, before the hook so the hook runs inside it.
    if let Some(cwd) = &ctx.cwd {
        if unsafe { libc::chdir(cwd.as_ptr()) } < 0 {
            return ChildFailure::os(Errno::last(), "chdir");
        }
    }

    // 3. Pre-exec hook.
    if let Some(hook) = preexec_fn {
        if let Err(e) = hook() {
            let mut context = MsgBuf::new();
            let _ = write!(context, "{}", e);
            return ChildFailure {
                tag: TAG_HOOK,
                errno: e.raw_os_error().unwrap_or(0),
                context,
            };
        }
    }

    // 4. Exec refinements: process group first, then drop privileges.
    if ctx.exec_opts.setpgid {
        if unsafe { libc::setpgid(0, 0) } < 0 {
            return ChildFailure::os(Errno::last(), "setpgid");
        }
    }
    if let Some(gid) = ctx.exec_opts.setgid {
        if unsafe { libc::setgid(gid) } < 0 {
            return ChildFailure::os(Errno::last(), "setgid");
        }
    }
    if let Some(uid) = ctx.exec_opts.setuid {
        if unsafe { libc::setuid(uid) } < 0 {
            return ChildFailure::os(Errno::last(), "setuid");
        }
    }

    // 5. Descriptor sweep: everything above 2 is closed except retained
    //    fds (which also lose close-on-exec) and the control pipe, which
    //    the exec itself closes.
    for fd in 3..=ctx.max_fd {
        if fd == ctx.control_write {
            continue;
        }
        if ctx.retain_fds.binary_search(&fd).is_ok() {
            unsafe { libc::fcntl(fd, libc::F_SETFD, 0) };
        } else {
            unsafe { libc::close(fd) };
        }
    }

    // 6. Exec. Returns only on failure.
    unsafe {
        match &ctx.env_ptrs {
            Some(env) => libc::execve(ctx.program.as_ptr(), ctx.argv_ptrs.as_ptr(), env.as_ptr()),
            None => libc::execvp(ctx.program.as_ptr(), ctx.argv_ptrs.as_ptr()),
        }
    };
    let errno = Errno::last();
    ChildFailure {
        tag: TAG_OS,
        errno: errno as i32,
        context: MsgBuf::from_bytes(program_context(&ctx.program).as_bytes()),
    }
}

fn program_context(program: &CString) -> &str {
    std::str::from_utf8(program.as_bytes()).unwrap_or("exec")
}

/// Serialize and write the failure record; single write, stack buffer.
fn report_child_failure(control_write: RawFd, failure: &ChildFailure) {
    let context = failure.context.as_bytes();
    let mut record = [0u8; RECORD_HEADER + RECORD_CONTEXT_MAX];
    record[0] = failure.tag;
    record[1..5].copy_from_slice(&failure.errno.to_le_bytes());
    record[5..9].copy_from_slice(&(context.len() as u32).to_le_bytes());
    record[RECORD_HEADER..RECORD_HEADER + context.len()].copy_from_slice(context);

    let total = RECORD_HEADER + context.len();
    unsafe {
        libc::write(
            control_write,
            record.as_ptr() as *const libc::c_void,
            total,
        );
    }
}

/// Move any resolved child end occupying fds 0..=2 above the standard
/// range, so the child-side dup2 sequence is order-independent.
fn lift_low_child_ends(resolved: &mut ResolvedStdio) -> Result<()> {
    for ends in [
        &mut resolved.stdin,
        &mut resolved.stdout,
        &mut resolved.stderr,
    ] {
        if let Some(child) = &ends.child {
            if child.raw() <= 2 {
                let lifted = fcntl(child.raw(), FcntlArg::F_DUPFD_CLOEXEC(3))
                    .map_err(|e| Error::os("dup", e.into()))?;
                // SAFETY: F_DUPFD_CLOEXEC returned a fresh descriptor
                // nothing else owns.
                let owned = unsafe { OwnedFd::from_raw_fd(lifted) };
                ends.child = Some(ChildEnd::Owned(owned));
            }
        }
    }
    Ok(())
}

fn to_cstrings<I, B>(items: I) -> Result<Vec<CString>>
where
    I: Iterator<Item = B>,
    B: Into<Vec<u8>>,
{
    items
        .map(|b| CString::new(b).map_err(|_| Error::argument("interior NUL byte")))
        .collect()
}

/// Resolve a program name against PATH when the exec will not search for
/// us. `execvp` searches on its own; with an environment replacement the
/// exec is `execve`, so a bare name is resolved here, against the
/// replacement's PATH when it carries one.
fn resolve_program(program: &OsStr, env: Option<&[(OsString, OsString)]>) -> Result<OsString> {
    let Some(env) = env else {
        return Ok(program.to_os_string());
    };
    if program.as_bytes().contains(&b'/') {
        return Ok(program.to_os_string());
    }

    let path_var = env
        .iter()
        .find(|(k, _)| k.as_os_str() == "PATH")
        .map(|(_, v)| v.clone())
        .or_else(|| std::env::var_os("PATH"));

    if let Some(path_var) = path_var {
        for dir in std::env::split_paths(&path_var) {
            if dir.as_os_str().is_empty() {
                continue;
            }
            let candidate = dir.join(Path::new(program));
            if access(&candidate, AccessFlags::X_OK).is_ok() {
                return Ok(candidate.into_os_string());
            }
        }
    }

    // Let the exec fail with ENOENT through the control pipe.
    Ok(program.to_os_string())
}

fn highest_possible_fd() -> RawFd {
    const FALLBACK: libc::c_long = 1024;
    // A million-descriptor sweep is the ceiling worth paying for; above
    // that the table cannot realistically be populated by this process.
    const CAP: libc::c_long = 1 << 20;
    let max = sysconf(SysconfVar::OPEN_MAX)
        .ok()
        .flatten()
        .unwrap_or(FALLBACK)
        .clamp(FALLBACK, CAP);
    (max - 1) as RawFd
}
