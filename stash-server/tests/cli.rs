use std::process::Command;

#[test]
fn help_includes_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_stash-server"))
        .arg("--help")
        .output()
        .expect("failed to run stash-server --help");

    assert!(output.status.success(), "stash-server --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.to_lowercase().contains("stash"),
        "expected help output to mention stash, got: {stdout}"
    );
    assert!(stdout.contains("--listen"));
    assert!(stdout.contains("--auth-file"));
}

#[test]
fn version_flag_prints_a_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_stash-server"))
        .arg("--version")
        .output()
        .expect("failed to run stash-server --version");

    assert!(output.status.success(), "stash-server --version failed");
    assert!(!String::from_utf8_lossy(&output.stdout).trim().is_empty());
}

#[test]
fn missing_auth_file_reports_a_clean_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_stash-server"))
        .args(["--db", ":memory:", "--auth-file", "/nonexistent/stash-auth.toml"])
        .output()
        .expect("failed to run stash-server");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("auth"), "expected an auth-related error, got: {stderr}");
}
