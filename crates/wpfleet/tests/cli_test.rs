//! Integration tests for the `wpfleet` CLI binary.
//!
//! Argument parsing, completions, config handling and exit codes, plus a
//! handful of site commands against a mocked backend.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `wpfleet` binary with env isolation.
///
/// Clears all `WPFLEET_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn wpfleet_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("wpfleet");
    cmd.env("HOME", "/tmp/wpfleet-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/wpfleet-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("WPFLEET_CONFIG")
        .env_remove("WPFLEET_API_BASE_URL")
        .env_remove("WPFLEET_CLIENT__TIMEOUT_SECS")
        .env_remove("WPFLEET_SERVER__LISTEN_ADDR")
        .env_remove("WPFLEET_SERVER__PROVISIONER");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn site(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("Site {id}"),
        "description": "desc",
        "url": "",
        "port": "",
        "status": status,
        "createdAt": "2024-06-15T10:30:00Z"
    })
}

/// Run `wpfleet <args> --api-url <server>` off the async runtime.
async fn run_against(server: &MockServer, args: &[&str]) -> std::process::Output {
    let mut argv: Vec<String> = args.iter().map(ToString::to_string).collect();
    argv.push("--api-url".into());
    argv.push(server.uri());
    tokio::task::spawn_blocking(move || wpfleet_cmd().args(argv).output().unwrap())
        .await
        .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = wpfleet_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    wpfleet_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("WordPress")
            .and(predicate::str::contains("sites"))
            .and(predicate::str::contains("serve")),
    );
}

#[test]
fn test_version_flag() {
    wpfleet_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wpfleet"));
}

#[test]
fn test_sites_help_lists_lifecycle_commands() {
    wpfleet_cmd().args(["sites", "--help"]).assert().success().stdout(
        predicate::str::contains("create")
            .and(predicate::str::contains("start"))
            .and(predicate::str::contains("stop"))
            .and(predicate::str::contains("delete")),
    );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    wpfleet_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    wpfleet_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wpfleet"));
}

// ── Validation and connectivity ─────────────────────────────────────

#[test]
fn test_create_with_blank_name_is_usage_error() {
    let output = wpfleet_cmd()
        .args([
            "sites",
            "create",
            "--name",
            "   ",
            "--description",
            "desc",
            "--api-url",
            "http://127.0.0.1:1",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("Site name and description are required"),
        "got:\n{text}"
    );
}

#[test]
fn test_unreachable_backend_exits_with_connection_code() {
    let output = wpfleet_cmd()
        .args(["sites", "list", "--api-url", "http://127.0.0.1:1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
}

#[test]
fn test_invalid_api_url_is_config_error() {
    let output = wpfleet_cmd()
        .args(["sites", "list", "--api-url", "ftp://example.test"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(combined_output(&output).contains("api_base_url"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("wpfleet.toml");
    wpfleet_cmd()
        .args(["config", "path", "--config"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("wpfleet.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("nested").join("config.toml");

    wpfleet_cmd()
        .args(["config", "init", "--config"])
        .arg(&file)
        .assert()
        .success();
    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("api_base_url"), "got:\n{written}");

    let output = wpfleet_cmd()
        .args(["config", "init", "--config"])
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("already exists"));

    wpfleet_cmd()
        .args(["config", "init", "--force", "--config"])
        .arg(&file)
        .assert()
        .success();
}

#[test]
fn test_config_show_reads_environment() {
    wpfleet_cmd()
        .args(["config", "show", "-o", "json"])
        .env("WPFLEET_API_BASE_URL", "http://fleet.example.test:5000")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://fleet.example.test:5000"));
}

// ── Sites against a mocked backend ──────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_list_as_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "sites": [site("s1", "running"), site("s2", "exited")] })),
        )
        .mount(&server)
        .await;

    let output = run_against(&server, &["sites", "list", "-o", "json"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    let listed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["s1", "s2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_busy_site_exits_with_conflict_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sites/s1/start"))
        .respond_with(ResponseTemplate::new(423).set_body_json(json!({
            "error": "Site s1 is busy with another operation",
            "code": "busy"
        })))
        .mount(&server)
        .await;

    let output = run_against(&server, &["sites", "start", "s1"]).await;
    assert_eq!(output.status.code(), Some(6));
    assert!(combined_output(&output).contains("busy with another operation"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_unknown_site_exits_with_not_found_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites/s9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "Site s9 not found",
            "code": "not_found"
        })))
        .mount(&server)
        .await;

    let output = run_against(&server, &["sites", "get", "s9"]).await;
    assert_eq!(output.status.code(), Some(4), "{}", combined_output(&output));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_requires_yes_without_a_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "sites": [site("s1", "stopped")] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/sites/s1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let output = run_against(&server, &["sites", "delete", "s1"]).await;
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--yes"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_with_yes_sends_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sites"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "sites": [site("s1", "stopped")] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/sites/s1"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "message": "Site s1 deletion initiated"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let output = run_against(&server, &["sites", "delete", "s1", "--yes"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(combined_output(&output).contains("deletion initiated"));
}
