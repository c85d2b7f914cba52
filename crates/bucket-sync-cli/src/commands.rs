use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bucket_store::{BucketInfo, ChangeEvent, LocalStore, SqliteStore};
use bucket_sync::SnapshotResponse;
use bucket_sync_client::{
    HttpTransport, PullOutcome, PushOutcome, SyncEngine, Transport,
};
use bucket_sync_server::ServerConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::AgentConfig;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

/// `bucket-sync serve`: Run the merge server until Ctrl-C.
pub async fn serve(bind: &str, document: &Path) -> Result {
    let config = ServerConfig::new(bind, document);
    bucket_sync_server::serve(config, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await?;
    Ok(())
}

/// `bucket-sync snapshot`: Print the remote snapshot as JSON.
pub async fn snapshot(server: &str) -> Result {
    let transport = HttpTransport::new(server, Duration::from_secs(10))?;
    let records = transport.snapshot().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&SnapshotResponse { records })?
    );
    Ok(())
}

/// `bucket-sync put`: Write one bucket locally and push it.
///
/// `value` of `None` clears the bucket.
pub async fn put(server: &str, db: &Path, key: &str, value: Option<&str>) -> Result {
    if let Some(value) = value {
        serde_json::from_str::<serde_json::Value>(value)
            .map_err(|e| format!("value for {key} is not valid JSON: {e}"))?;
    }

    let config = AgentConfig {
        server: server.to_string(),
        ..AgentConfig::default()
    }
    .sync_config();
    let store = Arc::new(LocalStore::new(SqliteStore::open(db)?));
    let transport = HttpTransport::from_config(server, &config)?;
    let engine = SyncEngine::new(store.clone(), transport, config);

    // Hydrate first so the push cannot be deferred.
    if let PullOutcome::Failed = engine.pull_now().await {
        return Err(format!("cannot reach {server}").into());
    }

    let ts = store.write(key, value)?;
    match engine.push_now().await {
        PushOutcome::Sent { records, merged } => {
            let action = if value.is_some() { "wrote" } else { "cleared" };
            println!("{action} {key} @ {ts} (sent {records}, merged {merged})");
            Ok(())
        }
        other => Err(format!("push did not complete: {other:?}").into()),
    }
}

/// `bucket-sync agent`: Run a sync engine until Ctrl-C.
pub async fn agent(config: AgentConfig) -> Result {
    let sync = config.sync_config();
    let store = Arc::new(LocalStore::new(SqliteStore::open(&config.db)?));
    let transport = HttpTransport::from_config(&config.server, &sync)?;
    let engine = SyncEngine::new(store.clone(), transport, sync);

    let mut changes = store.subscribe();
    engine.start();
    info!(
        server = %config.server,
        db = %config.db.display(),
        buckets = config.buckets.len(),
        "agent running, Ctrl-C to stop"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = changes.recv() => match event {
                Ok(ChangeEvent::Local { key }) => info!(%key, "local change"),
                Ok(ChangeEvent::Remote { applied }) => info!(applied, "remote changes applied"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "change log lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = &mut shutdown => break,
        }
    }

    engine.stop();
    let status = engine.status();
    info!(
        hydrated = status.hydrated,
        last_push_ms = ?status.last_push_ms,
        last_pull_ms = ?status.last_pull_ms,
        "agent stopped"
    );
    Ok(())
}

/// `bucket-sync inspect <db>`: List buckets with their stamps and sizes.
pub fn inspect(db_path: &Path) -> Result {
    if !db_path.is_file() {
        return Err(format!("no database at {}", db_path.display()).into());
    }
    let sqlite = SqliteStore::open_read_only(db_path)?;
    let size = sqlite.file_size()?;
    let journal = sqlite.journal_mode()?;
    let store = LocalStore::new(sqlite);
    let entries = store.entries()?;

    println!(
        "Database: {} (SQLite, {journal} mode)",
        db_path.display()
    );
    println!("Size: {}", format_bytes(size));
    println!();

    if entries.is_empty() {
        println!("  (no buckets)");
        return Ok(());
    }
    for line in bucket_table(&entries) {
        println!("{line}");
    }
    println!();
    Ok(())
}

fn bucket_table(entries: &[BucketInfo]) -> Vec<String> {
    let mut lines = vec![
        format!("  {:<24} {:>16} {:>10}", "Bucket", "Stamp (ms)", "Size"),
        format!("  {}", "-".repeat(52)),
    ];
    for entry in entries {
        let size = match entry.size {
            Some(bytes) => format_bytes(bytes as u64),
            None => "cleared".to_string(),
        };
        let stamp = match entry.ts {
            0 => "-".to_string(),
            ts => ts.to_string(),
        };
        lines.push(format!("  {:<24} {:>16} {:>10}", entry.key, stamp, size));
    }
    lines
}

// ── Formatting helpers ──────────────────────────────────────────────

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
