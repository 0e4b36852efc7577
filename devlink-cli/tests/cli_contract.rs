//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("devlink");
    // Keep host settings out of the contract.
    cmd.env_remove("DEVLINK_PORT")
        .env_remove("DEVLINK_BAUD")
        .env_remove("DEVLINK_TIMEOUT")
        .env_remove("DEVLINK_NON_INTERACTIVE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("devlink"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("devlink"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devlink"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_lists_arguments() {
    let mut cmd = cli_cmd();
    cmd.args(["push", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LOCAL").and(predicate::str::contains("REMOTE")));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&stdout) {
        assert!(parsed.is_array(), "should be a JSON array");
    }
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_zero_on_success() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .code(0);

    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .code(0);
}

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_required_arg() {
    let mut cmd = cli_cmd();
    cmd.arg("mv")
        .arg("/only-one")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_non_numeric_baud() {
    let mut cmd = cli_cmd();
    cmd.args(["--baud", "fast", "version"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_config_file_warns_but_is_not_fatal() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("devlink.toml"), "invalid toml [[[")
        .expect("write invalid config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(
        output
            .status
            .success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn exit_code_three_for_invalid_config_value() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("custom.toml");
    fs::write(&config, "[transfer]\nchunk_size = 0\n").expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["--port", "INVALID_PORT_NAME_XYZ", "version"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("chunk_size"));
}

#[test]
fn exit_code_three_for_oversized_chunk_size() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path().join("devlink.toml"),
        "[transfer]\nchunk_size = 2000000\n",
    )
    .expect("write config");

    cli_cmd()
        .current_dir(dir.path())
        .args(["--port", "INVALID_PORT_NAME_XYZ", "version"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("chunk_size"));
}

#[test]
fn exit_code_four_for_device_not_found() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "--non-interactive", "version"])
        .assert()
        .failure()
        .code(4)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn push_missing_local_file_fails_before_connecting() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir
        .path()
        .join("missing.bin");

    cli_cmd()
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "push"])
        .arg(&missing)
        .arg("/apps/")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("missing.bin"));
}

#[test]
fn pull_from_root_is_usage_error() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "pull", "/"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty());
}

// ============================================================================
// Unknown Command/Flag Suggestion Tests
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("pusj")
        .assert()
        .failure()
        .stderr(predicate::str::contains("push"));
}

#[test]
fn unknown_flag_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("list-ports")
        .arg("--jason")
        .assert()
        .failure()
        .stderr(predicate::str::contains("json"));
}

// ============================================================================
// stdout/stderr Separation Tests
// ============================================================================

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_devlink()"));
}

#[test]
fn json_output_is_valid_json_without_extra_lines() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let stderr = String::from_utf8(output.stderr).expect("stderr should be utf-8");

    if output
        .status
        .success()
    {
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be JSON");
        assert!(parsed.is_array(), "list-ports --json should return an array");
        assert!(
            stderr.is_empty(),
            "JSON output should not have stderr: got {stderr}"
        );
    }
}

// ============================================================================
// Option Terminator / Non-Interactive Tests
// ============================================================================

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    cli_cmd()
        .current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "rm", "--", "-odd-name"])
        .assert()
        .failure()
        .code(4);
}

#[test]
fn non_interactive_flag_is_recognized() {
    let mut cmd = cli_cmd();
    cmd.arg("--non-interactive")
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn non_interactive_environment_variable_works() {
    let mut cmd = cli_cmd();
    cmd.env("DEVLINK_NON_INTERACTIVE", "true")
        .arg("--version")
        .assert()
        .success();
}

// ============================================================================
// TTY Detection Tests
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

#[test]
fn help_includes_usage_and_examples() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage").and(predicate::str::contains("Examples")));
}
