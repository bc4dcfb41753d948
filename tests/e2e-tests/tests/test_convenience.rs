//! The convenience layer: call, check_call, check_output, popen.

use subproc::{
    call, check_call, check_output, format_status, popen, Error, ExitStatus, Redirect,
    SpawnOptions,
};

#[test]
fn test_call_returns_exit_status() {
    assert!(call(&["true"], SpawnOptions::default()).unwrap().success());
    assert_eq!(
        call(&["false"], SpawnOptions::default()).unwrap(),
        ExitStatus::Exited(1)
    );
}

#[test]
fn test_check_output_captures_stdout() {
    let out = check_output(&["echo", "-n", "hello world"], SpawnOptions::default()).unwrap();
    assert_eq!(out, b"hello world");
}

#[test]
fn test_check_output_failure_carries_command_and_status() {
    let err = check_output(&["false"], SpawnOptions::default()).unwrap_err();
    match err {
        Error::NonZeroExit { command, status } => {
            assert_eq!(command, "false");
            assert_eq!(format_status(&status, false).unwrap(), "exited with status 1");
        }
        other => panic!("wrong error: {:?}", other),
    }
}

#[test]
fn test_check_call_passes_and_fails() {
    check_call(&["true"], SpawnOptions::default()).unwrap();
    let err = check_call(&["false"], SpawnOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NonZeroExit { .. }));
}

#[test]
fn test_popen_scoped_communicate() {
    let out = popen(
        &["cat"],
        SpawnOptions {
            stdin: Redirect::Pipe,
            stdout: Redirect::Pipe,
            ..Default::default()
        },
        |p| {
            let (out, _) = p.communicate(Some(b"scoped".as_slice()), None)?;
            Ok(out)
        },
    )
    .unwrap();
    assert_eq!(out, b"scoped");
}

#[test]
fn test_popen_closes_pipes_and_reaps() {
    // The closure leaves the pipes untouched; popen still must not hang
    // on a child that only exits once its stdin closes.
    let pid = popen(
        &["cat"],
        SpawnOptions {
            stdin: Redirect::Pipe,
            stdout: Redirect::Pipe,
            ..Default::default()
        },
        |p| Ok(p.pid()),
    )
    .unwrap();
    assert!(pid.as_raw() > 0);
}
