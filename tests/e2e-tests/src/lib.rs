// E2E test support for subproc

use std::path::PathBuf;

/// Get the path to the testexe binary built alongside the test suite.
pub fn testexe_path() -> PathBuf {
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe path")
        .parent()
        .expect("Failed to get parent dir")
        .to_path_buf();

    // If we're in deps/, go up one level
    if path.ends_with("deps") {
        path.pop();
    }

    path.push("testexe");

    if !path.exists() {
        panic!("testexe binary not found at: {}", path.display());
    }

    path
}

/// testexe path as a String argv element.
pub fn testexe_arg() -> String {
    testexe_path().to_string_lossy().into_owned()
}
