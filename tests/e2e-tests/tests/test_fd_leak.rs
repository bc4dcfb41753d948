//! Descriptor hygiene across exec: everything above the standard streams
//! is closed unless listed in `retain_fds`.

use e2e_tests::testexe_arg;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::os::fd::AsRawFd;
use subproc::{call, ExitStatus, SpawnOptions};

#[test]
fn test_unlisted_fd_is_closed_in_child() {
    // Deliberately not close-on-exec: only the descriptor sweep can keep
    // this out of the child.
    let (read_end, _write_end) = pipe2(OFlag::empty()).unwrap();
    let fd = read_end.as_raw_fd();

    let status = call(
        &[testexe_arg(), "--probe-fd".into(), fd.to_string()],
        SpawnOptions::default(),
    )
    .unwrap();
    assert_eq!(status, ExitStatus::Exited(1), "fd {} leaked into child", fd);
}

#[test]
fn test_retained_fd_survives_exec() {
    let (read_end, _write_end) = pipe2(OFlag::empty()).unwrap();
    let fd = read_end.as_raw_fd();

    let status = call(
        &[testexe_arg(), "--probe-fd".into(), fd.to_string()],
        SpawnOptions {
            retain_fds: vec![fd],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(status, ExitStatus::Exited(0), "retained fd {} missing", fd);
}

#[test]
fn test_cloexec_fd_is_retained_when_listed() {
    // retain_fds also strips close-on-exec from the listed descriptor.
    let (read_end, _write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
    let fd = read_end.as_raw_fd();

    let status = call(
        &[testexe_arg(), "--probe-fd".into(), fd.to_string()],
        SpawnOptions {
            retain_fds: vec![fd],
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(status, ExitStatus::Exited(0));
}
