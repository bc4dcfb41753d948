//! Spawn basics: status reporting, working directory, environment
//! replacement, the pre-exec hook, and exec refinements.

use e2e_tests::testexe_arg;
use nix::unistd::getpgid;
use std::io;
use std::os::fd::BorrowedFd;
use subproc::{Error, ExitStatus, Process, Redirect, SpawnOptions};

#[test]
fn test_spawn_true_succeeds() {
    let mut p = Process::spawn(&["true"], SpawnOptions::default()).unwrap();
    assert!(p.wait().unwrap().success());
}

#[test]
fn test_spawn_false_fails() {
    let mut p = Process::spawn(&["false"], SpawnOptions::default()).unwrap();
    let status = p.wait().unwrap();
    assert!(!status.success());
    assert_eq!(status, ExitStatus::Exited(1));
}

#[test]
fn test_cwd_changes_child_directory() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();

    let mut p = Process::spawn(
        &[testexe_arg(), "--print-cwd".into()],
        SpawnOptions {
            stdout: Redirect::Pipe,
            cwd: Some(dir.path().to_path_buf()),
            ..Default::default()
        },
    )
    .unwrap();
    let (out, _) = p.communicate(None, None).unwrap();

    let reported = std::path::PathBuf::from(String::from_utf8(out).unwrap());
    assert_eq!(reported.canonicalize().unwrap(), canonical);
}

#[test]
fn test_env_replacement_is_complete() {
    // The replacement carries MARKER; the parent's HOME must be gone.
    let env = vec![
        ("PATH".into(), std::env::var_os("PATH").unwrap()),
        ("MARKER".into(), "xyzzy".into()),
    ];

    let mut p = Process::spawn(
        &[testexe_arg(), "--print-env".into(), "MARKER".into()],
        SpawnOptions {
            stdout: Redirect::Pipe,
            env: Some(env.clone()),
            ..Default::default()
        },
    )
    .unwrap();
    let (out, _) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"xyzzy");

    let mut p = Process::spawn(
        &[testexe_arg(), "--print-env".into(), "HOME".into()],
        SpawnOptions {
            stdout: Redirect::Pipe,
            env: Some(env),
            ..Default::default()
        },
    )
    .unwrap();
    let (out, _) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"(unset)");
}

#[test]
fn test_env_with_bad_key_is_argument_error() {
    let env: Vec<(std::ffi::OsString, std::ffi::OsString)> =
        vec![("BAD=KEY".into(), "value".into())];
    let err = Process::spawn(
        &["true"],
        SpawnOptions {
            env: Some(env),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::Argument { .. }));
}

#[test]
fn test_preexec_hook_output_precedes_child() {
    // The hook writes to fd 1 after it has been pointed at the pipe, so
    // its byte must arrive ahead of everything the program prints.
    let hook = || {
        // SAFETY: fd 1 is open in the child at hook time.
        let stdout = unsafe { BorrowedFd::borrow_raw(1) };
        nix::unistd::write(stdout, b"H").map_err(io::Error::from)?;
        Ok(())
    };

    let mut p = Process::spawn(
        &["echo", "-n", "x"],
        SpawnOptions {
            stdout: Redirect::Pipe,
            preexec_fn: Some(Box::new(hook)),
            ..Default::default()
        },
    )
    .unwrap();
    let (out, _) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"Hx");
}

#[test]
fn test_preexec_hook_failure_is_reported_and_reaped() {
    let err = Process::spawn(
        &["true"],
        SpawnOptions {
            preexec_fn: Some(Box::new(|| {
                Err(io::Error::new(io::ErrorKind::Other, "hook exploded"))
            })),
            ..Default::default()
        },
    )
    .unwrap_err();

    match err {
        Error::PreExec { message } => assert!(message.contains("hook exploded")),
        other => panic!("wrong error: {:?}", other),
    }
}

#[test]
fn test_setpgid_makes_child_group_leader() {
    let mut p = Process::spawn(
        &[testexe_arg(), "--sleep-ms".into(), "10000".into()],
        SpawnOptions {
            exec_opts: subproc::ExecOpts {
                setpgid: true,
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .unwrap();

    let pgid = getpgid(Some(p.pid())).unwrap();
    assert_eq!(pgid, p.pid());

    p.kill().unwrap();
    let status = p.wait().unwrap();
    assert_eq!(status, ExitStatus::Signaled(libc_sigkill()));
}

fn libc_sigkill() -> i32 {
    subproc::Signal::SIGKILL as i32
}
