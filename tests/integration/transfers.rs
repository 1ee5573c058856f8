use std::collections::HashMap;

use bytes::Bytes;

use ferry_core::config::TransferSettings;
use ferry_core::crypto::hash;
use ferry_core::{Direction, Message, TransferId, TransferState, MAX_CHUNK_SIZE};
use ferry_services::{Channel, TransferEvent, TransferSource};

use crate::*;

/// A multi-chunk file arrives byte-identical with its declared name and type.
#[tokio::test]
async fn test_round_trip_multi_chunk() -> Result<()> {
    let (sender, mut receiver) = connected_peers(TransferSettings::default());
    let data = pattern(3 * MAX_CHUNK_SIZE + 123, 7);

    let handle = sender
        .session
        .send(TransferSource::from_bytes("photo.jpg", "image/jpeg", data.clone()))?;
    let id = handle.transfer_id().clone();

    let artifact = receiver.completed(1).await?.remove(0);
    assert_eq!(artifact.transfer_id, id);
    assert_eq!(artifact.name, "photo.jpg");
    assert_eq!(artifact.mime_type, "image/jpeg");
    assert_eq!(artifact.data.as_ref(), data.as_slice());
    assert_eq!(artifact.digest(), hex_digest(&data));

    assert_eq!(handle.finished().await?, TransferState::Complete);
    let incoming = receiver.registry().get(&id).expect("incoming record");
    assert_eq!(incoming.direction, Direction::Incoming);
    assert_eq!(incoming.transferred_size, data.len() as u64);
    assert_eq!(incoming.state, TransferState::Complete);
    Ok(())
}

fn hex_digest(data: &[u8]) -> String {
    hash(data).iter().map(|b| format!("{b:02x}")).collect()
}

/// Concurrent transfers on one channel interleave but never mix content.
#[tokio::test]
async fn test_concurrent_transfers_stay_separate() -> Result<()> {
    let (sender, mut receiver) = connected_peers(small_chunks(64));

    let mut expected = HashMap::new();
    let mut ids = Vec::new();
    for (i, len) in [1000usize, 777, 64, 1].into_iter().enumerate() {
        let data = pattern(len, i as u8);
        let handle = sender.session.send(TransferSource::from_bytes(
            format!("file-{i}.bin"),
            "application/octet-stream",
            data.clone(),
        ))?;
        ids.push(handle.transfer_id().clone());
        expected.insert(handle.transfer_id().clone(), data);
    }

    // Chunk arrival order, by transfer, until every transfer completes.
    let mut arrivals = Vec::new();
    let mut artifacts = Vec::new();
    while artifacts.len() < expected.len() {
        match receiver.next_event().await? {
            TransferEvent::Progress { transfer_id, .. } => arrivals.push(transfer_id),
            TransferEvent::Completed(artifact) => artifacts.push(artifact),
            _ => {}
        }
    }

    // The two multi-chunk transfers share the wire rather than running back
    // to back.
    let span = |id: &TransferId| {
        let first = arrivals.iter().position(|a| a == id);
        let last = arrivals.iter().rposition(|a| a == id);
        first.zip(last).expect("chunks for every transfer")
    };
    let (first_a, last_a) = span(&ids[0]);
    let (first_b, last_b) = span(&ids[1]);
    assert!(
        first_b < last_a && first_a < last_b,
        "transfers ran back to back: {first_a}..={last_a} vs {first_b}..={last_b}"
    );
    let switches = arrivals.windows(2).filter(|w| w[0] != w[1]).count();
    assert!(switches > ids.len(), "too few switches between transfers: {switches}");

    for artifact in artifacts {
        let want = expected
            .remove(&artifact.transfer_id)
            .expect("artifact for a sent transfer");
        assert_eq!(artifact.data.as_ref(), want.as_slice());
    }
    assert!(expected.is_empty());
    Ok(())
}

/// Both endpoints send at the same time over the same channel.
#[tokio::test]
async fn test_bidirectional_transfers() -> Result<()> {
    let (mut left, mut right) = connected_peers(small_chunks(16));

    let to_right = pattern(500, 1);
    let to_left = pattern(300, 2);
    left.session
        .send(TransferSource::from_bytes("r.bin", "application/octet-stream", to_right.clone()))?;
    right
        .session
        .send(TransferSource::from_bytes("l.bin", "application/octet-stream", to_left.clone()))?;

    assert_eq!(right.completed(1).await?[0].data.as_ref(), to_right.as_slice());
    assert_eq!(left.completed(1).await?[0].data.as_ref(), to_left.as_slice());
    Ok(())
}

/// A zero-byte file completes on its meta message alone.
#[tokio::test]
async fn test_empty_file() -> Result<()> {
    let (sender, mut receiver) = connected_peers(TransferSettings::default());
    let handle = sender
        .session
        .send(TransferSource::from_bytes("empty.txt", "text/plain", Bytes::new()))?;

    let artifact = receiver.completed(1).await?.remove(0);
    assert!(artifact.data.is_empty());
    assert_eq!(artifact.name, "empty.txt");
    assert_eq!(handle.finished().await?, TransferState::Complete);
    Ok(())
}

/// A file read from disk keeps its name and guessed type.
#[tokio::test]
async fn test_file_source_round_trip() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("ferry-it-files-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("readme.txt");
    std::fs::write(&path, b"Ferry integration test: file source")?;

    let (sender, mut receiver) = connected_peers(small_chunks(8));
    sender.session.send(TransferSource::open(&path).await?)?;

    let artifact = receiver.completed(1).await?.remove(0);
    assert_eq!(artifact.name, "readme.txt");
    assert_eq!(artifact.mime_type, "text/plain");
    assert_eq!(artifact.data.as_ref(), b"Ferry integration test: file source");

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

/// Chunks that arrive before their meta are held and applied once it lands.
#[tokio::test]
async fn test_chunks_before_meta() -> Result<()> {
    let (raw, _raw_events, mut receiver) = raw_sender(TransferSettings::default());

    raw.send(Message::chunk("early".into(), Bytes::from_static(b"hello ")))?;
    raw.send(Message::chunk("early".into(), Bytes::from_static(b"world")))?;
    let id = "early".into();
    let staged = wait_until(|| {
        receiver
            .registry()
            .get(&id)
            .filter(|r| r.state == TransferState::AwaitingMeta)
    })
    .await?;
    assert_eq!(staged.transferred_size, 0);

    raw.send(Message::meta("early".into(), "greeting.txt", 11, "text/plain"))?;
    let artifact = receiver.completed(1).await?.remove(0);
    assert_eq!(artifact.data.as_ref(), b"hello world");
    assert_eq!(artifact.name, "greeting.txt");
    Ok(())
}

/// Duplicate metas and unknown message kinds do not disturb a transfer.
#[tokio::test]
async fn test_duplicate_meta_and_unknown_kinds_ignored() -> Result<()> {
    let (raw, _raw_events, mut receiver) = raw_sender(TransferSettings::default());

    raw.send(Message::meta("dup".into(), "a.txt", 4, "text/plain"))?;
    raw.send(Message::Unknown)?;
    raw.send(Message::chunk("dup".into(), Bytes::from_static(b"ab")))?;
    raw.send(Message::meta("dup".into(), "b.txt", 100, "text/html"))?;
    raw.send(Message::chunk("dup".into(), Bytes::from_static(b"cd")))?;

    let artifact = receiver.completed(1).await?.remove(0);
    assert_eq!(artifact.name, "a.txt");
    assert_eq!(artifact.data.as_ref(), b"abcd");
    assert_eq!(receiver.registry().len(), 1);
    Ok(())
}

/// Progress on the receiving side rises monotonically to the total.
#[tokio::test]
async fn test_incoming_progress_is_monotonic() -> Result<()> {
    let (sender, mut receiver) = connected_peers(small_chunks(100));
    sender.session.send(TransferSource::from_bytes(
        "p.bin",
        "application/octet-stream",
        pattern(1050, 3),
    ))?;

    let mut seen = Vec::new();
    loop {
        match receiver.next_event().await? {
            TransferEvent::Progress {
                transferred,
                total,
                direction,
                ..
            } => {
                assert_eq!(direction, Direction::Incoming);
                assert_eq!(total, 1050);
                seen.push(transferred);
            }
            TransferEvent::Completed(_) => break,
            _ => {}
        }
    }
    assert_eq!(seen.len(), 11);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last(), Some(&1050));
    Ok(())
}

/// The bytes crossing the channel are the documented JSON messages.
#[test]
fn test_wire_messages_are_json() -> Result<()> {
    let meta = Message::meta("t1".into(), "a.txt", 3, "text/plain").to_bytes()?;
    let json: serde_json::Value = serde_json::from_slice(&meta)?;
    assert_eq!(json["kind"], "meta");
    assert_eq!(json["transferId"], "t1");
    assert_eq!(json["size"], 3);
    assert_eq!(json["mimeType"], "text/plain");

    let chunk = Message::chunk("t1".into(), Bytes::from_static(&[0xde, 0xad])).to_bytes()?;
    let json: serde_json::Value = serde_json::from_slice(&chunk)?;
    assert_eq!(json["kind"], "chunk");
    assert_eq!(json["payload"], "dead");
    Ok(())
}
