use clap::Parser;
use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Cooperative child executable for subproc end-to-end testing.
///
/// Actions run in a fixed order so tests can compose them:
/// close stdin, fd probe, cwd/env prints, stderr print, wait for SIGHUP,
/// stdout print, echo, sleep, exit.
#[derive(Parser, Debug)]
#[command(name = "testexe")]
#[command(about = "Cooperative child for subproc testing", long_about = None)]
struct Args {
    /// Close stdin immediately at startup
    #[arg(long)]
    close_stdin: bool,

    /// Probe /dev/fd/N and exit 0 if it exists, 1 otherwise
    #[arg(long)]
    probe_fd: Option<i32>,

    /// Write the current working directory to stdout
    #[arg(long)]
    print_cwd: bool,

    /// Write the value of this environment variable (or "(unset)") to stdout
    #[arg(long)]
    print_env: Option<String>,

    /// Write this string to stderr, verbatim
    #[arg(long)]
    print_stderr: Option<String>,

    /// Block until SIGHUP arrives before continuing
    #[arg(long)]
    wait_hup: bool,

    /// Write this string to stdout, verbatim
    #[arg(long)]
    print: Option<String>,

    /// Copy stdin to stdout until EOF
    #[arg(long)]
    echo: bool,

    /// Sleep this many milliseconds before exiting
    #[arg(long, default_value = "0")]
    sleep_ms: u64,

    /// Exit code to return
    #[arg(long, default_value = "0")]
    exit_code: i32,
}

static GOT_HUP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sighup(_: libc::c_int) {
    GOT_HUP.store(true, Ordering::SeqCst);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("starting testexe with args: {:?}", args);

    // Trap SIGHUP before any observable output, so a tester reacting to
    // our output cannot signal us ahead of the handler.
    if args.wait_hup {
        let action = SigAction::new(
            SigHandler::Handler(on_sighup),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGHUP, &action) }.expect("failed to trap SIGHUP");
    }

    if args.close_stdin {
        let _ = nix::unistd::close(0);
    }

    if let Some(fd) = args.probe_fd {
        let present = std::fs::symlink_metadata(format!("/dev/fd/{}", fd)).is_ok();
        std::process::exit(if present { 0 } else { 1 });
    }

    if args.print_cwd {
        let cwd = std::env::current_dir().expect("failed to read cwd");
        print!("{}", cwd.display());
        io::stdout().flush().unwrap();
    }

    if let Some(var) = &args.print_env {
        match std::env::var(var) {
            Ok(value) => print!("{}", value),
            Err(_) => print!("(unset)"),
        }
        io::stdout().flush().unwrap();
    }

    if let Some(text) = &args.print_stderr {
        eprint!("{}", text);
        io::stderr().flush().unwrap();
    }

    if args.wait_hup {
        info!("waiting for SIGHUP");
        while !GOT_HUP.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
        }
        info!("received SIGHUP");
    }

    if let Some(text) = &args.print {
        print!("{}", text);
        io::stdout().flush().unwrap();
    }

    if args.echo {
        let mut stdin = io::stdin().lock();
        let mut stdout = io::stdout().lock();
        let mut buf = [0u8; 8192];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => stdout.write_all(&buf[..n]).expect("echo write failed"),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => panic!("echo read failed: {}", e),
            }
        }
        stdout.flush().unwrap();
    }

    if args.sleep_ms > 0 {
        thread::sleep(Duration::from_millis(args.sleep_ms));
    }

    info!("testexe exiting with code {}", args.exit_code);
    std::process::exit(args.exit_code);
}
