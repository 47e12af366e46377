//! End-to-end sync against the in-memory backend: bootstrap, gate, backfill,
//! change feed, and the status server reporting on all of it.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use finder::backend::{BackendCall, InMemoryBackend, SearchBackend};
use finder::bootstrap::{bootstrap, BootstrapOptions};
use finder::changes::channel;
use finder::config::{parse_config, Config};
use finder::engine::SyncEngine;
use finder::gate::{connect_with_retry, RetryPolicy};
use finder::mapping::load_mapping;
use finder::models::{ChangeEvent, RawDocument};
use finder::server::{self, AppState};
use finder::transform_log::TransformLog;
use finder::watchers::WatcherRegistry;

fn test_config(tmp: &TempDir) -> Config {
    let content = format!(
        r#"
[elasticsearch]
index = "o2r-test"

[sync]
log_size = 3

[start]
attempts = 3
pause_seconds = 0

[fs]
compendium = "{}/compendium"

[[status.users]]
name = "admin"
token = "admin-token"
level = 1000

[[status.users]]
name = "reader"
token = "reader-token"
level = 100
"#,
        tmp.path().display()
    );
    let config = parse_config(&content).unwrap();
    config.validate().unwrap();
    config
}

fn write_compendium(tmp: &TempDir, id: &str) {
    let dir = tmp.path().join("compendium").join(id);
    fs::create_dir_all(dir.join("data")).unwrap();
    fs::write(dir.join("main.Rmd"), "---\ntitle: Test\n---\nsome analysis").unwrap();
    fs::write(dir.join("data").join("values.csv"), "a,b\n1,2\n").unwrap();
    fs::write(dir.join("figure.png"), [0x89, b'P', b'N', b'G']).unwrap();
}

fn raw(value: Value) -> RawDocument {
    RawDocument::from_value(value).unwrap()
}

fn compendium(internal: &str, external: &str) -> RawDocument {
    raw(json!({
        "_id": { "$oid": internal },
        "id": external,
        "__v": 2,
        "metadata": { "o2r": { "title": "A compendium" } },
    }))
}

#[tokio::test]
async fn test_bootstrap_gate_and_sync() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    write_compendium(&tmp, "abc12");

    let backend = Arc::new(InMemoryBackend::with_index("o2r-test"));
    backend.fail_pings(1);
    let log = Arc::new(TransformLog::new(config.sync.log_size));

    let mapping = load_mapping(&config.elasticsearch).unwrap();
    let report = bootstrap(
        backend.as_ref(),
        BootstrapOptions {
            index: &config.elasticsearch.index,
            mapping: &mapping,
            mapping_type: None,
            delete_existing: true,
            apply_mapping: true,
        },
    )
    .await
    .unwrap();
    assert!(report.existed && report.deleted && report.created && report.mapping_applied);
    assert_eq!(backend.mapping("o2r-test"), Some(mapping));

    let registry = WatcherRegistry::from_config(&config, log.clone()).unwrap();
    let engine = SyncEngine::new(backend.clone(), registry);

    let (tx, src) = channel(8);
    let mut src = src
        .with_existing("jobs", vec![raw(json!({ "_id": "j-int", "id": "job01", "compendium_id": "abc12" }))])
        .with_existing("compendia", vec![compendium("c-int", "abc12")]);

    tx.send(ChangeEvent::Insert {
        collection: "compendia".into(),
        document: compendium("c-missing", "zzz99"),
    })
    .await
    .unwrap();
    tx.send(ChangeEvent::Delete {
        collection: "jobs".into(),
        id: "j-int".into(),
    })
    .await
    .unwrap();
    tx.send(ChangeEvent::Insert {
        collection: "users".into(),
        document: raw(json!({ "_id": "u1", "id": "u1" })),
    })
    .await
    .unwrap();
    drop(tx);

    let policy = RetryPolicy::from_config(&config);
    let engine = &engine;
    let src = &mut src;
    let stats = connect_with_retry(backend.as_ref(), &policy, move || async move {
        engine.run(src).await
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::Ping)), 2);
    assert_eq!(stats.indexed, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.failed, 0);

    // Compendia are backfilled before jobs.
    let writes: Vec<String> = backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            BackendCall::IndexDocument { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(writes, vec!["c-int".to_string(), "j-int".to_string()]);

    let doc = backend.document("o2r-test", "c-int").unwrap();
    assert_eq!(doc["id"], "c-int");
    assert_eq!(doc["compendium_id"], "abc12");
    assert!(doc.get("_id").is_none());
    assert!(doc.get("__v").is_none());
    assert_eq!(doc["metadata"]["o2r"]["title"], "A compendium");
    assert_eq!(doc["files"]["path"], "/api/v1/compendium/abc12/data");
    assert_eq!(doc["files"]["type"], "directory");

    let text_paths: Vec<&str> = doc["texts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["path"].as_str().unwrap())
        .collect();
    assert!(text_paths.contains(&"/data/values.csv"));
    assert!(text_paths.contains(&"/main.Rmd"));
    assert!(!text_paths.contains(&"/figure.png"));

    assert!(backend.document("o2r-test", "j-int").is_none());

    let entries = log.entries();
    let logged: Vec<(&str, bool)> = entries
        .iter()
        .map(|e| (e.document.as_str(), e.is_error()))
        .collect();
    assert_eq!(logged, vec![("abc12", false), ("job01", false), ("zzz99", true)]);
}

#[tokio::test]
async fn test_gate_exhaustion_never_starts_sync() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let backend = InMemoryBackend::new();
    backend.fail_pings(u32::MAX);

    let policy = RetryPolicy {
        probe_timeout: Duration::from_millis(50),
        ..RetryPolicy::from_config(&config)
    };
    let started = AtomicBool::new(false);
    let started_ref = &started;
    let result = connect_with_retry(&backend, &policy, move || async move {
        started_ref.store(true, Ordering::SeqCst)
    })
    .await;

    assert!(result.is_err());
    assert!(!started.load(Ordering::SeqCst));
    assert_eq!(backend.count_calls(|c| matches!(c, BackendCall::Ping)), 3);
}

// ============ status server ============

async fn start_status_server(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state));
    format!("http://{}", addr)
}

fn status_state(config: Config, backend: Arc<dyn SearchBackend>) -> (AppState, Arc<TransformLog>) {
    let log = Arc::new(TransformLog::new(config.sync.log_size));
    let state = AppState {
        config: Arc::new(config),
        log: log.clone(),
        backend,
    };
    (state, log)
}

#[tokio::test]
async fn test_status_requires_allowed_user() {
    let tmp = TempDir::new().unwrap();
    let backend: Arc<dyn SearchBackend> = Arc::new(InMemoryBackend::with_index("o2r-test"));
    let (state, _log) = status_state(test_config(&tmp), backend);
    let base = start_status_server(state).await;
    let client = reqwest::Client::new();

    for auth in [None, Some("Bearer reader-token"), Some("Bearer wrong")] {
        let mut req = client.get(format!("{}/status", base));
        if let Some(auth) = auth {
            req = req.header("Authorization", auth);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "not authenticated or not allowed");
    }

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_status_reports_log_and_backend() {
    let tmp = TempDir::new().unwrap();
    write_compendium(&tmp, "abc12");
    let config = test_config(&tmp);
    let backend = Arc::new(InMemoryBackend::with_index("o2r-test"));
    let (state, log) = status_state(config.clone(), backend.clone());

    // Overflow the three-entry log through real transforms.
    let registry = WatcherRegistry::from_config(&config, log.clone()).unwrap();
    let engine = SyncEngine::new(backend.clone(), registry);
    for (internal, external) in [("c1", "gone1"), ("c2", "gone2"), ("c3", "abc12"), ("c4", "gone4")] {
        engine
            .apply(ChangeEvent::Insert {
                collection: "compendia".into(),
                document: compendium(internal, external),
            })
            .await;
    }

    let base = start_status_server(state).await;
    let body: Value = reqwest::Client::new()
        .get(format!("{}/status", base))
        .bearer_auth("admin-token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["name"], "finder");
    assert_eq!(body["levels"]["view_status"], 1000);
    assert_eq!(body["collections"]["compendia"], "compendia");

    let log_docs: Vec<&str> = body["transformationLog"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["document"].as_str().unwrap())
        .collect();
    assert_eq!(log_docs, vec!["gone2", "abc12", "gone4"]);
    assert_eq!(body["transformationLog"][1]["outcome"]["status"], "success");
    assert_eq!(body["transformationLog"][2]["outcome"]["status"], "error");

    assert_eq!(body["elasticsearch"]["location"], "memory://");
    assert!(body["elasticsearch"]["indices"]["o2r-test"].is_object());
    assert!(body["elasticsearch"].get("error").is_none());
}

#[tokio::test]
async fn test_status_survives_backend_failure() {
    let tmp = TempDir::new().unwrap();
    let backend = Arc::new(InMemoryBackend::new());
    backend.fail_operation("info");
    let (state, _log) = status_state(test_config(&tmp), backend);
    let base = start_status_server(state).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/status", base))
        .bearer_auth("admin-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["elasticsearch"]["error"].is_string());
    assert!(body["elasticsearch"].get("indices").is_none());
    assert!(body["transformationLog"].as_array().unwrap().is_empty());
}
