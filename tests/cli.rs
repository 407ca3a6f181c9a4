//! CLI tests: run the compiled `tl` binary against temporary configs.

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tl");
    path
}

fn setup_test_env(endpoint: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[service]
endpoint = "{}"
app_key_env = "TL_CLI_TEST_KEY"
timeout_secs = 10

[fetch]
workers = 2
max_attempts = 2
retry_delay_secs = 0

[output]
dir = "{}/out"
"#,
        endpoint,
        root.display()
    );

    let config_path = config_dir.join("tl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tl(config_path: &Path, args: &[&str], app_key: Option<&str>) -> (String, String, bool) {
    let binary = tl_binary();
    let mut cmd = Command::new(&binary);
    cmd.arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("TL_CLI_TEST_KEY");
    if let Some(key) = app_key {
        cmd.env("TL_CLI_TEST_KEY", key);
    }
    let output = cmd
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_plan_lists_each_month() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");

    let (stdout, stderr, success) = run_tl(
        &config_path,
        &["plan", "南海", "--start", "2012-03", "--end", "2012-01"],
        None,
    );
    assert!(success, "plan failed: {}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("0\t2012年01月\t2012年01月南海"));
    assert!(lines[2].starts_with("2\t2012年03月"));
}

#[test]
fn test_plan_without_range() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");

    let (stdout, _, success) = run_tl(&config_path, &["plan", "南海", "--start", "-1"], None);
    assert!(success);
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.starts_with("0\t-\t南海"));
}

#[test]
fn test_plan_rejects_bad_date() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");

    let (_, stderr, success) = run_tl(
        &config_path,
        &["plan", "南海", "--start", "2012.01", "--end", "2012-03"],
        None,
    );
    assert!(!success);
    assert!(stderr.contains("invalid date"), "stderr: {}", stderr);
}

#[test]
fn test_normalize_prints_records() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");
    let reply = tmp.path().join("reply.txt");
    fs::write(
        &reply,
        "好的：\n```python\n[{'time': '2012-04-10', 'event': '对峙^[1][2]^开始', 'sum': '双方舰船'}]\n```",
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_tl(&config_path, &["normalize", reply.to_str().unwrap()], None);
    assert!(success, "normalize failed: {}", stderr);
    let records: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records[0]["event"], "对峙开始");
    assert_eq!(records[0]["refer"], serde_json::json!([1, 2]));
}

#[test]
fn test_normalize_fails_on_prose() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");
    let reply = tmp.path().join("reply.txt");
    fs::write(&reply, "没有结果").unwrap();

    let (_, stderr, success) = run_tl(&config_path, &["normalize", reply.to_str().unwrap()], None);
    assert!(!success);
    assert!(stderr.contains("failed to parse reply"), "stderr: {}", stderr);
}

#[test]
fn test_export_resolves_urls() {
    let (tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");
    let events = tmp.path().join("events.json");
    let references = tmp.path().join("references.json");
    let csv = tmp.path().join("t.csv");
    fs::write(
        &events,
        r#"[{"time":"2012-04-10","event":"对峙","sum":"","refer":[0,1,9]}]"#,
    )
    .unwrap();
    fs::write(
        &references,
        r#"[{"id":0,"url":"https://a"},{"id":1,"url":"https://b","name":"B"}]"#,
    )
    .unwrap();

    let (_, stderr, success) = run_tl(
        &config_path,
        &[
            "export",
            "--events",
            events.to_str().unwrap(),
            "--references",
            references.to_str().unwrap(),
            "--out",
            csv.to_str().unwrap(),
        ],
        None,
    );
    assert!(success, "export failed: {}", stderr);
    let content = fs::read_to_string(&csv).unwrap();
    assert!(content.contains("2012-04-10,对峙,,https://a; https://b"));
}

#[test]
fn test_run_requires_app_key() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9/unused");

    let (_, stderr, success) = run_tl(&config_path, &["run", "南海"], None);
    assert!(!success);
    assert!(stderr.contains("TL_CLI_TEST_KEY"), "stderr: {}", stderr);
}

const STREAM: &str = concat!(
    "event: reference\n",
    "data: {\"payload\": {\"references\": [{\"id\": 1, \"url\": \"https://a\"}]}}\n\n",
    "event: reply\n",
    "data: {\"payload\": {\"content\": \"[{\\\"time\\\": \\\"2012-05-01\\\", \\\"event\\\": \\\"撤离^[1]^\\\", \\\"sum\\\": \\\"\\\"}]\", \"is_final\": true}}\n\n",
);

async fn chat() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/event-stream")], STREAM)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_writes_outputs() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new().route("/chat", post(chat)))
            .await
            .unwrap();
    });

    let (tmp, config_path) = setup_test_env(&format!("http://{}/chat", addr));
    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_tl(
            &config_path,
            &["run", "南海", "--start", "2012-05", "--end", "2012-06"],
            Some("secret"),
        )
    })
    .await
    .unwrap();

    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("events: 1"), "{}", stdout);
    assert!(stdout.contains("references: 2"), "{}", stdout);
    assert!(stdout.contains("degraded units: 0"));
    assert!(stdout.contains("ok"));

    let out = tmp.path().join("out");
    let events: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("events.json")).unwrap()).unwrap();
    assert_eq!(events[0]["event"], "撤离");
    assert_eq!(events[0]["refer"], serde_json::json!([1]));
    let csv = fs::read_to_string(out.join("南海_timeline.csv")).unwrap();
    assert!(csv.contains("2012-05-01,撤离,,https://a"));
}
