//! Integration tests for the `matchit` binary.

use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use tempfile::tempdir;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("chats"))
        .stdout(predicates::str::contains("chat"))
        .stdout(predicates::str::contains("demo"))
        .stdout(predicates::str::contains("completion"));
}

#[test]
fn chat_requires_conversation() {
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.arg("chat").timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains(
            "the following required arguments were not provided",
        ))
        .stderr(predicates::str::contains("--conversation <CONVERSATION>"));
}

#[test]
fn chat_rejects_invalid_conversation_id() {
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.arg("chat")
        .arg("--conversation")
        .arg("not-a-uuid")
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"));
}

#[test]
fn chats_requires_a_user() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path())
        .env_remove("MATCHIT_USER_ID")
        .arg("chats")
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("no user id configured"));
}

#[test]
fn chats_reports_unreachable_backend() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path())
        .env("RUST_LOG", "off")
        .args(["chats", "--backend-url", "http://127.0.0.1:9"])
        .args(["--user", "00000000-0000-0000-0000-000000000001"])
        .timeout(Duration::from_secs(20));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("failed to fetch conversations"));
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("matchit.yaml");
    std::fs::write(&path, "realtime:\n  poll_interval_ms: 0\n").unwrap();

    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&path)
        .arg("demo")
        .timeout(Duration::from_secs(5));

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("failed to load configuration"))
        .stderr(predicates::str::contains("poll interval"));
}

#[test]
fn config_writes_yaml_file() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path()).arg("config");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("generated successfully"));

    let written = std::fs::read_to_string(dir.path().join("matchit.yaml")).unwrap();
    assert!(written.contains("backend_url"));
    assert!(written.contains("typing_countdown_ms"));
}

#[test]
fn config_rejects_unknown_format() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path()).args(["config", "--format", "toml"]);

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("Unsupported format 'toml'"));
}

#[test]
fn completion_generates_script() {
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.args(["completion", "--shell", "bash"]);

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("matchit"));
}

#[test]
fn demo_runs_the_full_exchange() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("matchit");
    cmd.current_dir(dir.path())
        .env("RUST_LOG", "off")
        .args(["demo", "--poll-ms", "100", "--listing", "RTX 3070"])
        .timeout(Duration::from_secs(30));

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("Listing: RTX 3070"))
        .stdout(predicates::str::contains("seller sees: buyer is typing"))
        .stdout(predicates::str::contains(
            "buyer: failed, removed from the transcript",
        ))
        .stdout(predicates::str::contains("push paused"))
        .stdout(predicates::str::contains("220 and it's yours."))
        .stdout(predicates::str::contains("[Reserved]"))
        .stdout(predicates::str::contains("Open subscriptions after close: 0"))
        .stdout(predicates::str::contains("(sending)").not());
}
