//! Exit status of the `healthwatch` binary
//!
//! Only configuration problems fail the process. A cycle that ran, however
//! degraded, exits successfully.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOT_SNAPSHOT: &str = r#"{"temperature_c": 80.0, "memory_usage_percent": 60.0, "throttle_flags": "0x0", "watched_service": "active"}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("snapshot.json"), HOT_SNAPSHOT).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `config.toml` and run `healthwatch --format json <args>` against it
    fn run(&self, config: &str, args: &[&str]) -> Output {
        let config_path = self.path("config.toml");
        std::fs::write(&config_path, config).unwrap();

        Command::new(env!("CARGO_BIN_EXE_healthwatch"))
            .env_clear()
            .current_dir(self.dir.path())
            .arg("--config")
            .arg(&config_path)
            .args(["--format", "json"])
            .args(args)
            .output()
            .unwrap()
    }

    fn check(&self, config: &str) -> Output {
        let snapshot = self.path("snapshot.json");
        self.run(config, &["check", "--snapshot", snapshot.to_str().unwrap()])
    }
}

fn webhook_config(url: &str, state_path: &Path) -> String {
    format!(
        r#"
[state]
path = '{}'
lock_timeout = "200ms"

[notifier]
target = "ops-chat"
timeout = "2s"

[notifier.channel]
type = "webhook"
url = '{url}'
"#,
        state_path.display()
    )
}

fn logging_config(ws: &Workspace, log_file: &Path) -> String {
    format!(
        "[state]\npath = '{}'\n\n[logging]\nfile = '{}'\n",
        ws.path("state/last_alert").display(),
        log_file.display()
    )
}

fn report(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not a report ({e}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn test_missing_target_exits_non_zero() {
    let ws = Workspace::new();

    let output = ws.check(
        r#"
[notifier.channel]
type = "slack"
webhook_url = "https://hooks.slack.com/services/T000/B000/XXX"
"#,
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("notifier.target"));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_unopenable_log_file_exits_non_zero_without_panic() {
    let ws = Workspace::new();
    std::fs::write(ws.path("blocker"), "").unwrap();
    let log_file = ws.path("blocker/healthwatch.log");

    let output = ws.run(&logging_config(&ws, &log_file), &["status"]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success());
    assert!(stderr.contains("logging.file"), "stderr: {stderr}");
    assert!(!stderr.contains("panicked"), "stderr: {stderr}");
}

#[test]
fn test_log_file_directory_is_created() {
    let ws = Workspace::new();
    let log_file = ws.path("logs/nested/healthwatch.log");

    let output = ws.run(&logging_config(&ws, &log_file), &["status"]);

    assert!(output.status.success());
    assert!(log_file.exists());
}

#[test]
fn test_failed_delivery_exits_zero() {
    let ws = Workspace::new();
    let state_path = ws.path("state/last_alert");

    let output = ws.check(&webhook_config("http://127.0.0.1:9/notify", &state_path));

    assert!(output.status.success());
    assert_eq!(report(&output)["outcome"], "delivery_failed");
    assert!(!state_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_degraded_storage_exits_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ws = Workspace::new();
    // A regular file where the state directory should be
    std::fs::write(ws.path("blocker"), "").unwrap();
    let config = webhook_config(&format!("{}/notify", server.uri()), &ws.path("blocker/last_alert"));

    let output = tokio::task::spawn_blocking(move || {
        let output = ws.check(&config);
        drop(ws);
        output
    })
    .await
    .unwrap();

    assert!(output.status.success());
    let report = report(&output);
    assert_eq!(report["outcome"], "delivered");
    assert_eq!(report["storage_degraded"], true);
}
