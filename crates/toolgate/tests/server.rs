//! HTTP API tests against a live router.

use serde_json::{json, Value};
use tempfile::TempDir;
use toolgate::access_store::AccessManifest;
use toolgate::config;
use toolgate::gateway::Gateway;
use toolgate::retrieval::IngestRequest;
use toolgate::server::{router, AppState};
use toolgate_core::models::Acl;

// ─── Helpers ────────────────────────────────────────────────────────

const MANIFEST: &str = r#"
[[backends]]
id = "hr"
transport = "in_process"
factory = "hr"

[[backends]]
id = "document_retrieval"
transport = "in_process"
factory = "document_retrieval"

[[grants]]
subject_kind = "role"
subject_id = "Admin"
resource_kind = "tool_backend"
resource_id = "hr"

[[grants]]
subject_kind = "role"
subject_id = "Admin"
resource_kind = "tool_backend"
resource_id = "document_retrieval"
"#;

/// Start a server on an ephemeral port with one ingested corpus.
async fn start_server(tmp: &TempDir) -> String {
    let content = format!(
        "[db]\npath = \"{}/toolgate.sqlite\"\n",
        tmp.path().display()
    );
    let gateway = Gateway::open(config::parse_config(&content).unwrap())
        .await
        .unwrap();
    let manifest: AccessManifest = toml::from_str(MANIFEST).unwrap();
    gateway
        .access_store()
        .apply_manifest(&manifest)
        .await
        .unwrap();
    gateway
        .engine()
        .ingest_document(IngestRequest {
            corpus_id: "demo".to_string(),
            embedding_model_id: "stub-256".to_string(),
            chunk_size: None,
            chunk_overlap: None,
            source: "runbook.md".to_string(),
            source_type: "markdown".to_string(),
            text: "Restart the ingest worker before rotating keys.".to_string(),
            uploaded_by: "u1".to_string(),
            acl: Acl::default(),
        })
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(gateway));
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

async fn open_session(client: &reqwest::Client, base: &str, body: Value) -> Value {
    let resp = client
        .post(format!("{}/sessions", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "sqlite");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn test_session_lifecycle_and_tool_calls() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let summary = open_session(&client, &base, json!({ "user_id": "u1", "roles": ["Admin"] })).await;
    let id = summary["id"].as_str().unwrap().to_string();
    assert_eq!(summary["tool_backends"], json!(["document_retrieval", "hr"]));
    assert_eq!(summary["corpora"], json!(["demo"]));
    assert_eq!(summary["tool_count"], 3);
    assert_eq!(summary["failures"], json!([]));

    let tools: Value = client
        .get(format!("{}/sessions/{}/tools", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "document_retrieval.upsert",
            "document_retrieval.search",
            "hr.get_policy"
        ]
    );

    let resp = client
        .post(format!("{}/sessions/{}/tools/hr.get_policy", base, id))
        .json(&json!({ "country": "FR" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["structuredContent"]["country"], "FR");

    let resp = client
        .post(format!("{}/sessions/{}/tools/document_retrieval.search", base, id))
        .json(&json!({
            "corpus_ids": ["demo"],
            "query_text": "Restart the ingest worker before rotating keys."
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let results = &body["result"]["structuredContent"]["results"];
    assert_eq!(results.as_array().unwrap().len(), 1);
    assert_eq!(results[0]["chunk"]["source"], "runbook.md");
    assert!(body["result"]["structuredContent"]["context"]
        .as_str()
        .unwrap()
        .contains("runbook.md"));

    let resp = client
        .post(format!("{}/sessions/{}/tools/jira.search_issues", base, id))
        .json(&json!({ "query": "vpn" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let resp = client
        .delete(format!("{}/sessions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .get(format!("{}/sessions/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_session_without_grants_is_empty() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let summary = open_session(&client, &base, json!({ "user_id": "guest" })).await;
    assert_eq!(summary["tool_backends"], json!([]));
    assert_eq!(summary["corpora"], json!([]));
    assert_eq!(summary["tool_count"], 0);
}

#[tokio::test]
async fn test_search_tool_denies_foreign_corpus() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    // "secret" is not among the session's corpora.
    let summary = open_session(&client, &base, json!({ "user_id": "u5", "roles": ["Admin"] })).await;
    let id = summary["id"].as_str().unwrap();
    let resp = client
        .post(format!("{}/sessions/{}/tools/document_retrieval.search", base, id))
        .json(&json!({ "corpus_ids": ["demo", "secret"], "query_text": "keys" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "access_denied");
}

#[tokio::test]
async fn test_query_endpoint() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({
            "user_id": "u1",
            "roles": ["Admin"],
            "corpus_ids": ["demo"],
            "query_text": "rotating keys",
            "k": 3
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["skipped"], json!([]));
    assert!(body["context"].as_str().unwrap().contains("corpus_id"));

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({
            "user_id": "u2",
            "roles": ["Sales"],
            "corpus_ids": ["demo"],
            "query_text": "rotating keys"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .post(format!("{}/query", base))
        .json(&json!({
            "user_id": "u1",
            "roles": ["Admin"],
            "corpus_ids": ["demo"],
            "query_text": "   "
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let tmp = TempDir::new().unwrap();
    let base = start_server(&tmp).await;

    let resp = reqwest::get(format!(
        "{}/sessions/00000000-0000-0000-0000-000000000000/tools",
        base
    ))
    .await
    .unwrap();
    assert_eq!(resp.status(), 404);
}
