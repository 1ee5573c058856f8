//! ferryd - send files across a loopback Ferry channel and store what
//! arrives on the far side.
//!
//! Usage: `ferryd <file>...`

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use ferry_core::config::FerryConfig;
use ferry_core::{TransferId, TransferState};
use ferry_services::{
    MemoryChannel, TransferEvent, TransferRegistry, TransferSession, TransferSource,
};

mod collect;
mod storage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });

    let files: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if files.is_empty() {
        anyhow::bail!("usage: ferryd <file>...");
    }
    let download_dir = config.storage.download_dir.clone();
    tracing::info!(
        files = files.len(),
        download_dir = %download_dir.display(),
        chunk_size = config.transfer.effective_chunk_size(),
        "ferryd starting"
    );

    // ── Channel and sessions ─────────────────────────────────────────────────

    let ((local, local_events), (remote, remote_events)) = MemoryChannel::pair();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TransferEvent>();

    let sending = TransferSession::start(
        Arc::new(local),
        local_events,
        TransferRegistry::new(),
        Arc::new(event_tx.clone()),
        config.transfer.clone(),
    );
    let receiving_registry = TransferRegistry::new();
    let receiving = TransferSession::start(
        Arc::new(remote),
        remote_events,
        receiving_registry.clone(),
        Arc::new(event_tx),
        config.transfer.clone(),
    );

    // ── Housekeeping ────────────────────────────────────────────────────────

    let (stop_tx, mut stop_rx) = tokio::sync::broadcast::channel::<()>(1);
    let housekeeping = {
        let registries = [sending.registry().clone(), receiving_registry.clone()];
        let retention = config.transfer.finished_retention();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                tokio::select! {
                    _ = stop_rx.recv() => return,
                    _ = interval.tick() => {
                        for registry in &registries {
                            if let Some(older_than) = retention {
                                registry.evict_finished(older_than);
                            }
                            tracing::debug!(
                                records = registry.len(),
                                active = registry.active().len(),
                                "registry snapshot"
                            );
                        }
                    }
                }
            }
        })
    };

    // ── Send ─────────────────────────────────────────────────────────────────

    let mut handles = Vec::new();
    for path in &files {
        let source = TransferSource::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        let handle = sending
            .send(source)
            .with_context(|| format!("failed to start transfer of {}", path.display()))?;
        handles.push(handle);
    }

    // ── Collect ──────────────────────────────────────────────────────────────

    let expected: HashSet<TransferId> = handles.iter().map(|h| h.transfer_id().clone()).collect();
    let outcome = collect::collect(&mut event_rx, &expected, &download_dir, async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await;
    let stored = outcome.stored;

    let mut sent = 0;
    sending.close();
    for handle in handles {
        let id = handle.transfer_id().clone();
        match handle.finished().await {
            Ok(TransferState::Complete) => sent += 1,
            Ok(state) => tracing::warn!(transfer_id = %id, state = state.name(), "send did not complete"),
            Err(e) => tracing::error!(transfer_id = %id, error = %e, "send task panicked"),
        }
    }
    sending.closed().await;
    receiving.closed().await;
    let _ = stop_tx.send(());
    let _ = housekeeping.await;

    let requested = expected.len();
    tracing::info!(requested, finished = outcome.finished, sent, stored, "ferryd done");
    if stored < requested {
        anyhow::bail!("{} of {} transfers did not arrive", requested - stored, requested);
    }
    Ok(())
}
