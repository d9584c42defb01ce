use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn toolgate_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("toolgate");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("runbook.md"),
        "# Deploy Runbook\n\nAlways drain the queue before restarting the ingest worker.\n\nRotate API keys on the first Monday of each month.",
    )
    .unwrap();
    fs::write(
        files_dir.join("faq.txt"),
        "Frequently asked questions about the VPN.\n\nThe VPN requires a hardware token.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/toolgate.sqlite"

[retrieval]
default_k = 5

[backends]
connect_timeout_secs = 5

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );
    let config_path = config_dir.join("toolgate.toml");
    fs::write(&config_path, config_content).unwrap();

    fs::write(
        config_dir.join("access.toml"),
        r#"[[backends]]
id = "hr"
transport = "in_process"
factory = "hr"

[[backends]]
id = "jira"
transport = "in_process"
factory = "jira"

[[grants]]
subject_kind = "role"
subject_id = "Admin"
resource_kind = "tool_backend"
resource_id = "hr"

[[grants]]
subject_kind = "user"
subject_id = "u2"
resource_kind = "tool_backend"
resource_id = "jira"
"#,
    )
    .unwrap();

    (tmp, config_path)
}

fn run_toolgate(config_path: &Path, args: &[&str]) -> Output {
    Command::new(toolgate_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run toolgate")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({}): {}", e, stdout))
}

fn ingest(config_path: &Path, root: &Path, corpus: &str, file: &str) -> Output {
    let file = root.join("files").join(file);
    run_toolgate(
        config_path,
        &[
            "ingest",
            "--corpus",
            corpus,
            "--model",
            "stub-256",
            "--user",
            "u1",
            file.to_str().unwrap(),
        ],
    )
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();
    let output = run_toolgate(&config_path, &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let db_path = tmp.path().join("data/toolgate.sqlite");
    assert!(db_path.exists(), "database file should exist");
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let output1 = run_toolgate(&config_path, &["init"]);
    assert!(output1.status.success());
    let output2 = run_toolgate(&config_path, &["init"]);
    assert!(output2.status.success());
}

#[test]
fn test_access_load_and_show() {
    let (tmp, config_path) = setup_test_env();
    let manifest = tmp.path().join("config/access.toml");
    let output = run_toolgate(&config_path, &["access", "load", manifest.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "access load failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("2 backend(s)"));

    let output = run_toolgate(
        &config_path,
        &["access", "show", "--user", "u2", "--role", "Admin"],
    );
    assert!(output.status.success());
    let json = stdout_json(&output);
    let backends: Vec<&str> = json["resolved"]["tool_backends"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_str().unwrap())
        .collect();
    assert_eq!(backends, vec!["hr", "jira"]);
}

#[test]
fn test_ingest_and_query() {
    let (tmp, config_path) = setup_test_env();
    let output = ingest(&config_path, tmp.path(), "ops", "runbook.md");
    assert!(
        output.status.success(),
        "ingest failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["corpus"]["created"], true);
    assert_eq!(report["chunks"], 1);

    let output = ingest(&config_path, tmp.path(), "ops", "faq.txt");
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["corpus"]["created"], false);

    let output = run_toolgate(
        &config_path,
        &[
            "query",
            "--user",
            "u1",
            "--role",
            "Admin",
            "--corpus",
            "ops",
            "--k",
            "1",
            "hardware token",
        ],
    );
    assert!(
        output.status.success(),
        "query failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let outcome = stdout_json(&output);
    assert_eq!(outcome["results"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["results"][0]["corpus_id"], "ops");

    let output = run_toolgate(
        &config_path,
        &[
            "query", "--user", "u1", "--role", "Admin", "--corpus", "ops", "--context", "VPN",
        ],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Retrieved context"));
}

#[test]
fn test_ingest_conflict_fails() {
    let (tmp, config_path) = setup_test_env();
    assert!(ingest(&config_path, tmp.path(), "ops", "runbook.md")
        .status
        .success());

    let file = tmp.path().join("files/faq.txt");
    let output = run_toolgate(
        &config_path,
        &[
            "ingest",
            "--corpus",
            "ops",
            "--model",
            "stub-256",
            "--user",
            "u1",
            "--chunk-size",
            "500",
            file.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("chunk_size"), "stderr: {}", stderr);
}

#[test]
fn test_query_denied_without_access() {
    let (tmp, config_path) = setup_test_env();
    assert!(ingest(&config_path, tmp.path(), "ops", "runbook.md")
        .status
        .success());

    let output = run_toolgate(
        &config_path,
        &["query", "--user", "u9", "--corpus", "ops", "restart"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("access denied"), "stderr: {}", stderr);
}

#[test]
fn test_tools_and_call() {
    let (tmp, config_path) = setup_test_env();
    let manifest = tmp.path().join("config/access.toml");
    assert!(
        run_toolgate(&config_path, &["access", "load", manifest.to_str().unwrap()])
            .status
            .success()
    );

    let output = run_toolgate(&config_path, &["tools", "--user", "u1", "--role", "Admin"]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    let names: Vec<&str> = json["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["hr.get_policy"]);

    let output = run_toolgate(
        &config_path,
        &[
            "call",
            "--user",
            "u1",
            "--role",
            "Admin",
            "hr.get_policy",
            "--args",
            r#"{"country":"DE"}"#,
        ],
    );
    assert!(
        output.status.success(),
        "call failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(stdout_json(&output)["structuredContent"]["country"], "DE");

    // u1 was never granted jira.
    let output = run_toolgate(
        &config_path,
        &["call", "--user", "u1", "--role", "Admin", "jira.search_issues"],
    );
    assert!(!output.status.success());
}

#[test]
fn test_corpus_list_and_delete() {
    let (tmp, config_path) = setup_test_env();
    assert!(ingest(&config_path, tmp.path(), "ops", "runbook.md")
        .status
        .success());

    let output = run_toolgate(&config_path, &["corpus", "list"]);
    assert!(output.status.success());
    let corpora = stdout_json(&output);
    assert_eq!(corpora[0]["id"], "ops");
    assert_eq!(corpora[0]["embedding_model_id"], "stub-256");

    let output = run_toolgate(&config_path, &["corpus", "delete", "ops"]);
    assert!(output.status.success());
    let output = run_toolgate(&config_path, &["corpus", "delete", "ops"]);
    assert!(!output.status.success());

    let output = run_toolgate(&config_path, &["corpus", "list"]);
    assert_eq!(stdout_json(&output), serde_json::json!([]));
}

#[test]
fn test_mcp_stdio_lists_granted_tools() {
    let (tmp, config_path) = setup_test_env();
    let manifest = tmp.path().join("config/access.toml");
    assert!(
        run_toolgate(&config_path, &["access", "load", manifest.to_str().unwrap()])
            .status
            .success()
    );

    let mut child = Command::new(toolgate_binary())
        .arg("--config")
        .arg(&config_path)
        .args(["mcp", "--user", "u2"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn toolgate mcp");
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let initialize = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test", "version": "0" }
        }
    });
    writeln!(stdin, "{}", initialize).unwrap();
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    let response: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "toolgate");

    writeln!(
        stdin,
        "{}",
        serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" })
    )
    .unwrap();
    writeln!(
        stdin,
        "{}",
        serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list", "params": {} })
    )
    .unwrap();
    line.clear();
    stdout.read_line(&mut line).unwrap();
    let response: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(response["id"], 2);
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["jira.search_issues"]);

    drop(stdin);
    let status = child.wait().unwrap();
    assert!(status.success());
}
