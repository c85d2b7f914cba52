//! End-to-end tests: real HTTP between sync engines and the merge server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bucket_store::{LocalStore, MemoryStore};
use bucket_sync::{ManualClock, SyncRecord};
use bucket_sync_client::{
    HttpTransport, PullOutcome, PushOutcome, SyncConfig, SyncEngine, Transport,
};
use bucket_sync_server::{router, FileDocument, MemoryDocument, MergeStore};
use serde_json::{json, Value};

async fn spawn_server(store: MergeStore) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::new(store));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport(addr: SocketAddr) -> HttpTransport {
    HttpTransport::new(format!("http://{addr}/"), Duration::from_secs(5)).unwrap()
}

fn engine(
    addr: SocketAddr,
    clock: &ManualClock,
    config: SyncConfig,
) -> SyncEngine<MemoryStore, HttpTransport> {
    let store = Arc::new(LocalStore::with_clock(
        MemoryStore::new(),
        Arc::new(clock.clone()),
    ));
    SyncEngine::new(store, transport(addr), config)
}

#[tokio::test]
async fn fresh_server_has_empty_snapshot() {
    let addr = spawn_server(MergeStore::new(MemoryDocument::new())).await;

    let records = transport(addr).snapshot().await.unwrap();

    assert!(records.is_empty());
}

#[tokio::test]
async fn merge_reports_accepted_count_only() {
    let addr = spawn_server(MergeStore::new(MemoryDocument::new())).await;
    let t = transport(addr);

    let first = t
        .merge(&[SyncRecord::new("a", 10, Some("x".into()))])
        .await
        .unwrap();
    let second = t
        .merge(&[
            SyncRecord::new("a", 5, Some("stale".into())),
            SyncRecord::tombstone("b", 1),
        ])
        .await
        .unwrap();

    assert_eq!((first.ok, first.merged), (true, 1));
    assert_eq!((second.ok, second.merged), (true, 1));
    assert_eq!(
        t.snapshot().await.unwrap(),
        vec![
            SyncRecord::new("a", 10, Some("x".into())),
            SyncRecord::tombstone("b", 1),
        ]
    );
}

#[tokio::test]
async fn health_counts_keys() {
    let addr = spawn_server(MergeStore::new(MemoryDocument::new())).await;
    transport(addr)
        .merge(&[SyncRecord::new("a", 1, None), SyncRecord::new("b", 1, None)])
        .await
        .unwrap();

    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, json!({"ok": true, "keys": 2}));
}

#[tokio::test]
async fn malformed_merge_body_is_client_error() {
    let addr = spawn_server(MergeStore::new(MemoryDocument::new())).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/sync/merge"))
        .header("content-type", "application/json")
        .body(r#"{"records":[{"key":"a","ts":-1,"value":null}]}"#)
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn file_backed_server_persists_merges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync-db.json");
    let addr = spawn_server(MergeStore::new(FileDocument::open(&path).unwrap())).await;

    transport(addr)
        .merge(&[SyncRecord::new("teams", 42, Some("[]".into()))])
        .await
        .unwrap();

    let on_disk: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(
        on_disk,
        json!({"records": {"teams": {"ts": 42, "value": "[]"}}})
    );
}

#[tokio::test]
async fn two_engines_replicate_through_server() {
    let addr = spawn_server(MergeStore::new(MemoryDocument::new())).await;
    let clock = ManualClock::new(1_000);
    let config = SyncConfig::default()
        .with_buckets(["teams"])
        .with_protection_window(Duration::from_millis(10));
    let a = engine(addr, &clock, config.clone());
    let b = engine(addr, &clock, config);

    assert_eq!(a.push_now().await, PushOutcome::NotHydrated);
    assert!(matches!(a.pull_now().await, PullOutcome::Completed(_)));
    a.store().write("teams", Some(r#"["Reds"]"#)).unwrap();
    assert_eq!(
        a.push_now().await,
        PushOutcome::Sent {
            records: 1,
            merged: 1
        }
    );

    clock.advance(20);
    assert!(matches!(b.pull_now().await, PullOutcome::Completed(_)));
    assert_eq!(
        b.store().read("teams").unwrap().as_deref(),
        Some(r#"["Reds"]"#)
    );
    assert_eq!(b.store().stamp("teams").unwrap(), 1_000);

    clock.advance(20);
    b.store().clear("teams").unwrap();
    b.push_now().await;

    clock.advance(20);
    a.pull_now().await;
    assert_eq!(a.store().read("teams").unwrap(), None);
    assert_eq!(a.store().stamp("teams").unwrap(), 1_040);
}
