//! Inspect the offline store of a companion install.
//!
//! Usage: `offline_doctor [config.toml]`
//!
//! Prints queue contents, sync metadata, storage usage and the offline
//! content verification report. Nothing is modified.

use companion_offline::downloads::MediaDownloadManager;
use companion_offline::local_db::LocalStore;
use companion_offline::offline::OperationQueue;
use companion_offline::remote::HttpRemoteService;
use companion_offline::responses::ResponseCache;
use companion_offline::shared::OfflineConfig;
use companion_offline::sync::{NetworkMonitor, SyncMetadataStore};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    companion_offline::init_tracing("warn");

    let config = match std::env::args().nth(1) {
        Some(path) => OfflineConfig::load(path)?,
        None => OfflineConfig::from_env()?,
    };

    println!("OFFLINE STORE DIAGNOSTICS");
    println!("=========================");
    println!("Database: {}", config.database_path.display());
    println!("Remote:   {}", config.remote_base_url);

    let store = Arc::new(LocalStore::from_config(&config));
    if let Err(e) = store.open().await {
        println!("\nStore could not be opened: {}", e);
        return Err(e.into());
    }

    let queue = OperationQueue::new(Arc::clone(&store));
    let stats = queue.stats().await?;
    println!("\nOperation queue");
    println!("  pending:  {}", stats.pending);
    println!("  failed:   {}", stats.failed);
    println!("  rejected: {}", stats.rejected);
    for op in queue.all().await? {
        println!(
            "  #{:<4} {:?} {} {} (attempts: {}, status: {:?}{})",
            op.sequence,
            op.kind,
            op.entity,
            op.target_id,
            op.retry_count,
            op.status,
            op.last_error
                .as_deref()
                .map(|e| format!(", last error: {}", e))
                .unwrap_or_default(),
        );
    }

    let metadata = SyncMetadataStore::new(Arc::clone(&store), config.auto_sync).load().await?;
    println!("\nSync");
    println!("  status:       {:?}", metadata.status);
    println!("  last sync:    {}", metadata.last_sync_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()));
    println!("  total synced: {}", metadata.total_synced);
    println!("  auto sync:    {}", metadata.auto_sync_enabled);
    if let Some(error) = &metadata.last_error {
        println!("  last error:   {}", error);
    }

    let usage = store.usage().await?;
    println!("\nStorage ({} bytes)", usage.total_bytes);
    for collection in &usage.collections {
        println!("  {:<20} {:>6} records {:>10} bytes", collection.name, collection.records, collection.bytes);
    }

    // The doctor never goes online; the remote is only needed to build the manager.
    let network = NetworkMonitor::offline();
    let remote = Arc::new(HttpRemoteService::new(&config)?);
    let responses = ResponseCache::new(Arc::clone(&store), remote.clone(), network.clone());
    let downloads = MediaDownloadManager::new(Arc::clone(&store), remote, network, responses, &config)?;

    let report = downloads.verify().await?;
    println!("\nOffline content");
    for check in &report.collections {
        println!(
            "  {:<20} {}/{} {}",
            check.collection,
            check.found,
            check.expected,
            if check.is_complete() { "ok" } else { "INCOMPLETE" }
        );
    }
    println!("  ready offline: {}", downloads.is_offline_ready().await?);

    store.close().await;
    Ok(())
}
