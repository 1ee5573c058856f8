//! Drain transfer events until every requested transfer has finished.
//!
//! Both sessions report into one event stream. An incoming `Completed` or
//! `Failed` finishes a transfer, and so does an outgoing `Failed`: the wire
//! has no abort message, so the receiving side would otherwise wait on that
//! transfer until the channel closes.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;

use tokio::sync::mpsc;

use ferry_core::{Direction, TransferId};
use ferry_services::TransferEvent;

use crate::storage;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Transfers that reached a terminal state on either side.
    pub finished: usize,
    /// Artifacts written to the download dir.
    pub stored: usize,
}

/// Consume `events` until every id in `expected` has finished, the stream
/// ends, or `interrupt` resolves.
pub async fn collect(
    events: &mut mpsc::UnboundedReceiver<TransferEvent>,
    expected: &HashSet<TransferId>,
    download_dir: &Path,
    interrupt: impl Future<Output = ()>,
) -> Outcome {
    let mut finished: HashSet<TransferId> = HashSet::new();
    let mut stored = 0;
    tokio::pin!(interrupt);

    while !expected.iter().all(|id| finished.contains(id)) {
        let event = tokio::select! {
            _ = &mut interrupt => {
                tracing::info!("interrupted, closing channel");
                break;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else { break };

        match event {
            TransferEvent::Completed(artifact) => {
                finished.insert(artifact.transfer_id.clone());
                match storage::store_artifact(download_dir, &artifact) {
                    Ok(path) => {
                        stored += 1;
                        tracing::info!(
                            transfer_id = %artifact.transfer_id,
                            path = %path.display(),
                            digest = %artifact.digest(),
                            "artifact stored"
                        );
                    }
                    Err(e) => {
                        tracing::error!(transfer_id = %artifact.transfer_id, error = %e, "failed to store artifact")
                    }
                }
            }
            TransferEvent::Failed {
                transfer_id,
                direction,
                cause,
            } => {
                if direction == Direction::Outgoing {
                    tracing::warn!(transfer_id = %transfer_id, %cause, "send failed, receiver will not complete it");
                }
                finished.insert(transfer_id);
            }
            TransferEvent::Progress {
                transfer_id,
                direction,
                transferred,
                total,
            } => tracing::debug!(transfer_id = %transfer_id, ?direction, transferred, total, "progress"),
            TransferEvent::Sent {
                transfer_id,
                total,
                digest,
            } => tracing::debug!(transfer_id = %transfer_id, bytes = total, digest = %digest, "sent"),
            TransferEvent::Started(_) => {}
        }
    }

    Outcome {
        finished: finished.intersection(expected).count(),
        stored,
    }
}
