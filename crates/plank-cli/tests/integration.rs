#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::net::TcpListener;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn plank(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("plank").unwrap();
    cmd.current_dir(dir.path())
        .env("PLANK_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn config_yaml(dir: &TempDir) -> serde_yaml::Value {
    let raw = std::fs::read_to_string(dir.path().join(".plank/config.yaml")).unwrap();
    serde_yaml::from_str(&raw).unwrap()
}

/// Start a mock endpoint answering POST /hook with `status`, `expected` times.
fn mock_endpoint(rt: &tokio::runtime::Runtime, status: u16, expected: u64) -> MockServer {
    rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-plank-event", "webhook.test"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected)
            .mount(&server)
            .await;
        server
    })
}

// ---------------------------------------------------------------------------
// plank webhook endpoint
// ---------------------------------------------------------------------------

#[test]
fn endpoint_add_writes_config() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args([
            "webhook",
            "endpoint",
            "add",
            "ops",
            "https://hooks.example.com/ops",
            "--secret",
            "s3cret",
            "--max-retries",
            "5",
            "--event",
            "task.status_changed",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added endpoint 'ops'"));

    let cfg = config_yaml(&dir);
    let ep = &cfg["webhooks"]["endpoints"][0];
    assert_eq!(ep["name"].as_str(), Some("ops"));
    assert_eq!(ep["url"].as_str(), Some("https://hooks.example.com/ops"));
    assert_eq!(ep["max_retries"].as_u64(), Some(5));
    assert_eq!(ep["retry_delay_ms"].as_u64(), Some(1000));
    assert_eq!(ep["event_filters"][0].as_str(), Some("task.status_changed"));
}

#[test]
fn endpoint_add_duplicate_fails() {
    let dir = TempDir::new().unwrap();
    let add = |dir: &TempDir| {
        plank(dir)
            .args(["webhook", "endpoint", "add", "ops", "http://localhost:9000/"])
            .assert()
    };
    add(&dir).success();
    add(&dir)
        .failure()
        .stderr(predicate::str::contains("endpoint already exists: ops"));
}

#[test]
fn endpoint_add_rejects_bad_url() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "add", "ops", "ftp://example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid endpoint 'ops'"));
    assert!(!dir.path().join(".plank/config.yaml").exists());
}

#[test]
fn endpoint_add_warns_when_unsigned() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "add", "ops", "https://hooks.example.com/"])
        .assert()
        .success()
        .stderr(predicate::str::contains("deliveries are unsigned"));
}

#[test]
fn endpoint_list_hides_secret() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args([
            "webhook",
            "endpoint",
            "add",
            "ops",
            "https://hooks.example.com/",
            "--secret",
            "topsecret",
        ])
        .assert()
        .success();

    plank(&dir)
        .args(["webhook", "endpoint", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ops"))
        .stdout(predicate::str::contains("topsecret").not());

    let output = plank(&dir)
        .args(["--json", "webhook", "endpoint", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json[0]["name"], "ops");
    assert_eq!(json[0]["signed"], true);
    assert!(json[0].get("secret").is_none());
}

#[test]
fn endpoint_list_empty() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No endpoints configured."));
}

#[test]
fn endpoint_remove() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "add", "ops", "http://localhost:9000/"])
        .assert()
        .success();
    plank(&dir)
        .args(["webhook", "endpoint", "remove", "ops"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed endpoint 'ops'"));
    plank(&dir)
        .args(["webhook", "endpoint", "remove", "ops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("endpoint not found: ops"));
}

#[test]
fn endpoint_remove_without_config_is_not_initialized() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "remove", "ops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// plank webhook test
// ---------------------------------------------------------------------------

#[test]
fn test_delivers_to_endpoint() {
    let dir = TempDir::new().unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = mock_endpoint(&rt, 200, 1);
    plank(&dir)
        .args(["webhook", "endpoint", "add", "ops", &format!("{}/hook", server.uri())])
        .assert()
        .success();

    plank(&dir)
        .args(["webhook", "test", "ops"])
        .assert()
        .success()
        .stdout(predicate::str::contains("to 'ops' in 1 attempt(s)"));
    rt.block_on(server.verify());
}

#[test]
fn test_reports_failure_without_dead_letter() {
    let dir = TempDir::new().unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = mock_endpoint(&rt, 500, 2);
    plank(&dir)
        .args([
            "webhook",
            "endpoint",
            "add",
            "ops",
            &format!("{}/hook", server.uri()),
            "--max-retries",
            "2",
            "--retry-delay-ms",
            "10",
        ])
        .assert()
        .success();

    plank(&dir)
        .args(["webhook", "test", "ops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed after 2 attempt(s)"))
        .stderr(predicate::str::contains("HTTP 500"));

    assert!(!dir.path().join(".plank/webhooks/dead_letters.jsonl").exists());
    rt.block_on(server.verify());
}

#[test]
fn test_unknown_endpoint_fails() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "endpoint", "add", "ops", "http://localhost:9000/"])
        .assert()
        .success();
    plank(&dir)
        .args(["webhook", "test", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("endpoint not found: nope"));
}

// ---------------------------------------------------------------------------
// plank webhook dead-letters
// ---------------------------------------------------------------------------

fn write_dead_letters(dir: &TempDir) {
    let path = dir.path().join(".plank/webhooks/dead_letters.jsonl");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let line = |endpoint: &str| {
        serde_json::json!({
            "endpoint_name": endpoint,
            "event_payload": { "id": "e1", "type": "task.status_changed", "data": {} },
            "failure_reason": "endpoint returned HTTP 500",
            "attempt_count": 3,
            "first_attempt_at": "2026-01-01T00:00:00Z",
            "last_attempt_at": "2026-01-01T00:00:07Z"
        })
        .to_string()
    };
    std::fs::write(&path, format!("{}\n{}\n", line("ops"), line("alerts"))).unwrap();
}

#[test]
fn dead_letters_empty() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "dead-letters"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No dead letters."));
}

#[test]
fn dead_letters_lists_entries() {
    let dir = TempDir::new().unwrap();
    write_dead_letters(&dir);
    plank(&dir)
        .args(["webhook", "dead-letters"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task.status_changed"))
        .stdout(predicate::str::contains("alerts"))
        .stdout(predicate::str::contains("endpoint returned HTTP 500"));
}

#[test]
fn dead_letters_filter_by_endpoint_json() {
    let dir = TempDir::new().unwrap();
    write_dead_letters(&dir);
    let output = plank(&dir)
        .args(["--json", "webhook", "dead-letters", "--endpoint", "ops"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["endpoint_name"], "ops");
    assert_eq!(entries[0]["attempt_count"], 3);
}

// ---------------------------------------------------------------------------
// plank webhook serve
// ---------------------------------------------------------------------------

#[test]
fn serve_fails_when_port_in_use() {
    let dir = TempDir::new().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    plank(&dir)
        .args([
            "webhook",
            "serve",
            "--bind",
            "127.0.0.1",
            "--port",
            &port.to_string(),
        ])
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to bind"));
}

#[test]
fn serve_help_lists_secret_env_vars() {
    let dir = TempDir::new().unwrap();
    plank(&dir)
        .args(["webhook", "serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("GITHUB_WEBHOOK_SECRET"))
        .stdout(predicate::str::contains("JIRA_WEBHOOK_SECRET"))
        .stdout(predicate::str::contains("LINEAR_WEBHOOK_SECRET"));
}
