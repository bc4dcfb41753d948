//! Deadline handling: a timeout surfaces partial output and leaves the
//! child and its pipes intact for a later communicate call.

use e2e_tests::testexe_arg;
use std::time::{Duration, Instant};
use subproc::{Error, Process, Redirect, Signal, SpawnOptions};

#[test]
fn test_timeout_carries_partial_output_then_resumes() {
    // The child prints to stderr, parks until SIGHUP, then prints to
    // stdout. The first communicate must time out having seen only the
    // stderr prefix; after the signal a second call collects the rest.
    let mut p = Process::spawn(
        &[
            testexe_arg(),
            "--print-stderr".into(),
            "foo\n".into(),
            "--wait-hup".into(),
            "--print".into(),
            "bar\n".into(),
        ],
        SpawnOptions {
            stdout: Redirect::Pipe,
            stderr: Redirect::Pipe,
            ..Default::default()
        },
    )
    .unwrap();

    let err = p
        .communicate(None, Some(Duration::from_millis(500)))
        .unwrap_err();
    match err {
        Error::Timeout {
            command,
            stdout,
            stderr,
        } => {
            assert!(command.contains("testexe"));
            assert_eq!(stdout, b"");
            assert_eq!(stderr, b"foo\n");
        }
        other => panic!("wrong error: {:?}", other),
    }

    p.send_signal(Signal::SIGHUP).unwrap();
    let (out, err) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"bar\n");
    assert_eq!(err, b"");
    assert!(p.exit_status().unwrap().success());
}

#[test]
fn test_timeout_fires_promptly_without_traffic() {
    let mut p = Process::spawn(
        &[testexe_arg(), "--sleep-ms".into(), "10000".into()],
        SpawnOptions {
            stdout: Redirect::Pipe,
            ..Default::default()
        },
    )
    .unwrap();

    let start = Instant::now();
    let err = p
        .communicate(None, Some(Duration::from_millis(200)))
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(
        elapsed >= Duration::from_millis(200),
        "returned before the deadline: {:?}",
        elapsed
    );
    assert!(
        elapsed < Duration::from_secs(5),
        "deadline wildly overshot: {:?}",
        elapsed
    );

    p.kill().unwrap();
    p.wait().unwrap();
}

#[test]
fn test_second_timeout_after_first_is_clean() {
    let mut p = Process::spawn(
        &[testexe_arg(), "--wait-hup".into(), "--print".into(), "done".into()],
        SpawnOptions {
            stdout: Redirect::Pipe,
            ..Default::default()
        },
    )
    .unwrap();

    for _ in 0..2 {
        let err = p
            .communicate(None, Some(Duration::from_millis(150)))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    p.send_signal(Signal::SIGHUP).unwrap();
    let (out, _) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"done");
}
