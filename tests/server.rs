//! HTTP API tests against a live server on a free local port.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tempfile::TempDir;

use veritext::config::Config;
use veritext::detector::{Detector, DetectorRegistry};
use veritext::jobs::JobManager;
use veritext::models::{Detection, Document, FindingKind, Source, Span};
use veritext::server::run_server;
use veritext::sqlite_store::SqliteReportStore;

/// Flags the first sentence as copied; stalls on documents mentioning "stall".
struct SentenceMatcher;

#[async_trait]
impl Detector for SentenceMatcher {
    fn name(&self) -> &str {
        "sentence-matcher"
    }

    fn kind(&self) -> FindingKind {
        FindingKind::Plagiarism
    }

    async fn detect(&self, doc: &Document) -> Result<Detection> {
        if doc.text.contains("stall") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let end = doc
            .text
            .chars()
            .position(|c| c == '.')
            .map(|i| i + 1)
            .unwrap_or(doc.char_len);
        Ok(Detection {
            spans: vec![Span::plagiarism(0, end, "src-1", 88)],
            sources: vec![Source {
                id: "src-1".to_string(),
                title: "Research Paper on Machine Learning".to_string(),
                url: "https://example.com/ml-paper".to_string(),
                excerpt: String::new(),
            }],
        })
    }
}

fn test_config(tmp: &TempDir, port: u16) -> Config {
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[ingest]
max_bytes = 4096

[pipeline]
detector_timeout_ms = 60000
required_kinds = ["plagiarism"]
"#,
        tmp.path().join("vtx.sqlite").display(),
        port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if client.get(&url).send().await.is_ok() {
            return;
        }
    }
    panic!("server did not start on port {}", port);
}

async fn wait_for_status(client: &reqwest::Client, url: &str, status: &str) -> Value {
    for _ in 0..100 {
        let job: Value = client.get(url).send().await.unwrap().json().await.unwrap();
        if job["status"] == status {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job at {} never reached {}", url, status);
}

async fn start(tmp: &TempDir) -> String {
    let port = find_free_port();
    let cfg = test_config(tmp, port);

    let store = SqliteReportStore::open(&cfg.db.path).await.unwrap();
    let mut registry = DetectorRegistry::new();
    registry.register(Arc::new(SentenceMatcher));
    let jobs = JobManager::new(&cfg, registry, Arc::new(store));

    tokio::spawn(async move {
        run_server(&cfg, jobs).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

#[tokio::test]
async fn upload_poll_and_report() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let content = base64::engine::general_purpose::STANDARD
        .encode("Copied sentence here. The rest is mine.");
    let resp = client
        .post(format!("{}/jobs", base))
        .json(&json!({ "filename": "essay.txt", "content_base64": content }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = wait_for_status(&client, &format!("{}/jobs/{}", base, job_id), "completed").await;
    assert_eq!(job["result"]["scores"]["plagiarism"], 53);
    assert_eq!(job["result"]["scores"]["human"], 100);
    assert_eq!(job["result"]["segments"][0]["label"], "plagiarism");
    assert_eq!(job["result"]["segments"][1]["label"], "original");

    let report: Value = client
        .get(format!("{}/jobs/{}/report", base, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["segments"][0]["text"], "Copied sentence here.");
    assert_eq!(report["severity"]["plagiarism"], "high");
    assert_eq!(report["sources"][0]["title"], "Research Paper on Machine Learning");

    let raw = client
        .post(format!("{}/jobs", base))
        .json(&json!({ "filename": "pasted", "raw_text": "All original. Truly." }))
        .send()
        .await
        .unwrap();
    assert_eq!(raw.status(), 202);

    let list: Value = client
        .get(format!("{}/jobs?limit=10", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["jobs"].as_array().unwrap().len(), 2);

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_documents"], 2);
    assert_eq!(stats["this_month"], 2);
}

#[tokio::test]
async fn rejects_invalid_uploads() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let cases = vec![
        json!({ "filename": "deck.pptx", "content_base64": "aGVsbG8=" }),
        json!({ "filename": "essay.txt", "content_base64": "%%% not base64" }),
        json!({ "filename": "essay.txt", "raw_text": "   " }),
        json!({ "filename": "essay.txt" }),
        json!({ "filename": "essay.txt", "raw_text": "a", "content_base64": "YQ==" }),
        json!({ "filename": "big.txt", "raw_text": "x".repeat(5000) }),
    ];
    for case in cases {
        let resp = client
            .post(format!("{}/jobs", base))
            .json(&case)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "case {}", case["filename"]);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let bad_id = client
        .get(format!("{}/jobs/not-a-uuid", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_id.status(), 400);

    let missing = client
        .get(format!("{}/jobs/{}", base, uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn cancel_over_http() {
    let tmp = TempDir::new().unwrap();
    let base = start(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/jobs", base))
        .json(&json!({
            "filename": "essay.txt",
            "raw_text": "This essay will stall the matcher.",
            "owner": "instructor-3"
        }))
        .send()
        .await
        .unwrap();
    let job_id = resp.json::<Value>().await.unwrap()["job_id"]
        .as_str()
        .unwrap()
        .to_string();
    let job_url = format!("{}/jobs/{}", base, job_id);
    wait_for_status(&client, &job_url, "processing").await;

    let early_report = client
        .get(format!("{}/report", job_url))
        .send()
        .await
        .unwrap();
    assert_eq!(early_report.status(), 409);

    let forbidden = client
        .post(format!("{}/cancel", job_url))
        .json(&json!({ "owner": "student-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(forbidden.status(), 403);

    let cancelled = client
        .post(format!("{}/cancel", job_url))
        .json(&json!({ "owner": "instructor-3" }))
        .send()
        .await
        .unwrap();
    assert_eq!(cancelled.status(), 200);
    let job: Value = cancelled.json().await.unwrap();
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error"]["kind"], "cancelled_error");

    let again = client
        .post(format!("{}/cancel", job_url))
        .json(&json!({ "owner": "instructor-3" }))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
    let body: Value = again.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    let job: Value = client.get(&job_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(job["status"], "failed");
    assert!(job["result"].is_null());
}
