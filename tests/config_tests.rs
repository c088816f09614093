//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use atom_worker::config::WorkerConfig;
use atom_worker::error::Error;

/// Test fixture for configuration testing
struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    fn load(&self) -> atom_worker::Result<WorkerConfig> {
        WorkerConfig::load(Some(self.path()))
    }
}

fn worker_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("atom-worker").unwrap();
    cmd.env_remove("ATOM_CONFIG");
    cmd
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
url = "wss://example.com"
"#,
    );

    let config = fixture.load().unwrap();
    assert_eq!(config.coordinator.url, "wss://example.com");
    assert!(config.coordinator.auto_reconnect);
    assert_eq!(config.dispatch.max_concurrent_jobs, 1);
    assert!(config.handlers.seo.enabled);
}

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    let config = fixture.load().unwrap();
    assert!(config.coordinator.url.starts_with("ws://"));
    assert_eq!(config.coordinator.greeting, "Hello WebSocket server!");
    assert!(config.auth.api_url.ends_with("/api"));
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[worker]
name = "Test Worker"

[auth]
api_url = "https://api.example.com/api"
timeout_secs = 10

[coordinator]
url = "wss://coordinator.example.com"
connect_timeout_ms = 60000
auto_reconnect = false
reconnect_interval_ms = 10000
max_reconnect_delay_ms = 120000
max_reconnect_attempts = 5
ping_interval_ms = 0
greeting = ""

[dispatch]
max_concurrent_jobs = 4
job_timeout_secs = 90
queue_size = 16
outbox_capacity = 0

[handlers.seo]
enabled = false
search_url = "https://search.example.com/search"
timeout_secs = 5
link_selector = "a.result"

[session]
store_path = "/tmp/atom-test/sessions.json"

[logging]
level = "debug"
json_format = true
"#,
    );

    let config = fixture.load().unwrap();
    assert_eq!(config.worker_name(), "Test Worker");
    assert_eq!(config.auth.api_url, "https://api.example.com/api");
    assert!(!config.coordinator.auto_reconnect);
    assert_eq!(config.coordinator.max_reconnect_attempts, 5);
    assert_eq!(config.coordinator.connect_timeout(), Duration::from_secs(60));
    assert_eq!(config.coordinator.ping_interval(), None);
    assert_eq!(config.dispatch.max_concurrent_jobs, 4);
    assert_eq!(config.dispatch.job_timeout(), Some(Duration::from_secs(90)));
    assert_eq!(config.dispatch.outbox_capacity, 0);
    assert!(!config.handlers.seo.enabled);
    assert_eq!(config.handlers.seo.link_selector, "a.result");
    assert_eq!(
        config.session_store_path(),
        PathBuf::from("/tmp/atom-test/sessions.json")
    );
    assert!(config.logging.json_format);
}

#[test]
fn test_zero_job_timeout_means_unbounded() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[dispatch]
job_timeout_secs = 0
"#,
    );

    assert_eq!(fixture.load().unwrap().dispatch.job_timeout(), None);
}

#[test]
fn test_home_is_expanded_in_store_path() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[session]
store_path = "~/atom/sessions.json"
"#,
    );

    let config = fixture.load().unwrap();
    assert!(!config.session.store_path.starts_with('~'));
    assert!(config.session.store_path.ends_with("atom/sessions.json"));
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_missing_file() {
    let result = WorkerConfig::load(Some("/nonexistent/path/config.toml"));
    assert!(matches!(result, Err(Error::ConfigNotFound { .. })));
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[coordinator\nurl = ");

    assert!(matches!(fixture.load(), Err(Error::ConfigParse { .. })));
}

#[test]
fn test_invalid_coordinator_scheme() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
url = "http://example.com"
"#,
    );

    let err = fixture.load().unwrap_err();
    assert!(matches!(err, Error::ConfigValidation { .. }));
    assert!(err.to_string().contains("coordinator.url"));
}

#[test]
fn test_invalid_auth_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[auth]
api_url = "ftp://example.com"
"#,
    );

    let err = fixture.load().unwrap_err();
    assert!(err.to_string().contains("auth.api_url"));
}

#[test]
fn test_zero_concurrency_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[dispatch]
max_concurrent_jobs = 0
"#,
    );

    let err = fixture.load().unwrap_err();
    assert!(err.to_string().contains("max_concurrent_jobs"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "loud"
"#,
    );

    let err = fixture.load().unwrap_err();
    assert!(err.to_string().contains("logging.level"));
}

#[test]
fn test_wrong_value_type() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[dispatch]
max_concurrent_jobs = "many"
"#,
    );

    assert!(matches!(fixture.load(), Err(Error::ConfigParse { .. })));
}

// ─────────────────────────────────────────────────────────────────
// Environment Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_coordinator_url() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[coordinator]
url = "wss://from-file.example.com"
"#,
    );

    worker_cmd()
        .env("ATOM_COORDINATOR_URL", "wss://from-env.example.com")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicates::str::contains("wss://from-env.example.com"));
}

#[test]
fn test_env_override_is_validated() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    worker_cmd()
        .env("ATOM_COORDINATOR_URL", "not-a-websocket-url")
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("coordinator.url"));
}

#[test]
fn test_env_overrides_dispatch_and_handlers() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");

    worker_cmd()
        .env("ATOM_MAX_CONCURRENT_JOBS", "3")
        .env("ATOM_SEO_ENABLED", "false")
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success()
        .stdout(predicates::str::contains("max_concurrent_jobs = 3"))
        .stdout(predicates::str::contains("enabled = false"));
}

// ─────────────────────────────────────────────────────────────────
// Build Profile Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_no_profile_aborts_on_panic() {
    // Handler panics are contained per job, which needs unwinding
    let manifest = fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml")).unwrap();
    let manifest: toml::Value = toml::from_str(&manifest).unwrap();

    let profiles = manifest["profile"].as_table().unwrap();
    for (name, profile) in profiles {
        assert_ne!(
            profile.get("panic").and_then(|v| v.as_str()),
            Some("abort"),
            "profile {} aborts on panic",
            name
        );
    }
}
