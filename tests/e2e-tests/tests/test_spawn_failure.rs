//! Spawn failure must surface the OS error and leave no child behind.
//!
//! This test runs alone in its own process: the no-orphan check asserts
//! that the test process has no children at all, which would race with
//! any concurrently spawning test.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use subproc::{Error, Process, SpawnOptions};

#[test]
fn test_no_such_file_raises_and_leaves_no_orphan() {
    let err = Process::spawn(&["/not/a/file"], SpawnOptions::default()).unwrap_err();
    match err {
        Error::Os { operation, source } => {
            assert!(operation.contains("/not/a/file"));
            assert_eq!(source.raw_os_error(), Some(Errno::ENOENT as i32));
        }
        other => panic!("wrong error: {:?}", other),
    }

    // The failed child was reaped before the error surfaced: this
    // process has no children left to wait for.
    let leftover = waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG));
    assert_eq!(leftover, Err(Errno::ECHILD));
}
