//! The communicate loop: round trips, empty input, pipeless calls, and
//! incremental delivery.

use e2e_tests::testexe_arg;
use subproc::{Error, Process, Redirect, SpawnOptions};

fn piped_both() -> SpawnOptions {
    SpawnOptions {
        stdin: Redirect::Pipe,
        stdout: Redirect::Pipe,
        ..Default::default()
    }
}

#[test]
fn test_cat_roundtrip_exceeds_pipe_capacity() {
    // A megabyte is far past any default pipe buffer; the loop must
    // interleave writing and draining or this deadlocks.
    let input = vec![b'x'; 1 << 20];

    let mut p = Process::spawn(&["cat"], piped_both()).unwrap();
    let (out, err) = p.communicate(Some(&input), None).unwrap();

    assert_eq!(out.len(), input.len());
    assert_eq!(out, input);
    assert_eq!(err, b"");
    assert!(p.exit_status().unwrap().success());
}

#[test]
fn test_empty_input_closes_stdin() {
    // The child must see EOF immediately and exit with no output.
    let mut p = Process::spawn(&["cat"], piped_both()).unwrap();
    let (out, err) = p.communicate(Some(b"".as_slice()), None).unwrap();

    assert_eq!(out, b"");
    assert_eq!(err, b"");
    assert!(p.exit_status().unwrap().success());
}

#[test]
fn test_no_pipes_returns_empty_pair() {
    let mut p = Process::spawn(&["true"], SpawnOptions::default()).unwrap();
    let (out, err) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"");
    assert_eq!(err, b"");
}

#[test]
fn test_input_without_stdin_pipe_is_argument_error() {
    let mut p = Process::spawn(
        &["true"],
        SpawnOptions {
            stdout: Redirect::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let err = p.communicate(Some(b"data".as_slice()), None).unwrap_err();
    assert!(matches!(err, Error::Argument { .. }));
    p.wait().unwrap();
}

#[test]
fn test_both_streams_collected() {
    let mut p = Process::spawn(
        &[
            testexe_arg(),
            "--print".into(),
            "to stdout".into(),
            "--print-stderr".into(),
            "to stderr".into(),
        ],
        SpawnOptions {
            stdout: Redirect::Pipe,
            stderr: Redirect::Pipe,
            ..Default::default()
        },
    )
    .unwrap();
    let (out, err) = p.communicate(None, None).unwrap();
    assert_eq!(out, b"to stdout");
    assert_eq!(err, b"to stderr");
}

#[test]
fn test_incremental_deliveries_reassemble_the_stream() {
    let input = vec![b'y'; 1 << 18];
    let mut p = Process::spawn(
        &[testexe_arg(), "--echo".into()],
        piped_both(),
    )
    .unwrap();

    let mut collected = Vec::new();
    let mut deliveries = 0usize;
    p.communicate_with(Some(&input), None, |out, err| {
        assert!(
            !out.is_empty() || !err.is_empty(),
            "empty delivery"
        );
        collected.extend_from_slice(&out);
        assert!(err.is_empty());
        deliveries += 1;
    })
    .unwrap();

    assert_eq!(collected, input);
    assert!(deliveries >= 1);
}

#[test]
fn test_repeated_wait_after_communicate_is_stable() {
    let mut p = Process::spawn(&["cat"], piped_both()).unwrap();
    p.communicate(Some(b"z".as_slice()), None).unwrap();
    let first = p.wait().unwrap();
    assert_eq!(p.wait().unwrap(), first);
    assert_eq!(p.poll(), Some(first));
}
