use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use ferry_core::config::TransferSettings;
use ferry_core::{FailureCause, Message, TransferState};
use ferry_services::{Channel, TransferError, TransferEvent, TransferSource};

use crate::*;

/// Closing the channel mid-transfer fails the transfer on both ends and
/// produces no artifact.
#[tokio::test]
async fn test_channel_close_mid_transfer() -> Result<()> {
    let (sender, mut receiver) = connected_peers(small_chunks(4));

    // The source hands out 6 of its 10 bytes, then blocks.
    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(b"abcdef").await?;
    let handle = sender.session.send(TransferSource::new(
        "partial.bin",
        "application/octet-stream",
        10,
        reader,
    ))?;
    let id = handle.transfer_id().clone();

    wait_until(|| {
        receiver
            .registry()
            .get(&id)
            .filter(|r| r.transferred_size == 4)
    })
    .await?;

    receiver.session.close();
    writer.write_all(b"ghij").await?;

    assert_eq!(
        handle.finished().await?,
        TransferState::Failed(FailureCause::ChannelClosed)
    );
    assert_eq!(
        receiver.terminal_state(&id).await?,
        TransferState::Failed(FailureCause::ChannelClosed)
    );
    assert_eq!(receiver.registry().get(&id).map(|r| r.transferred_size), Some(4));

    loop {
        match receiver.next_event().await? {
            TransferEvent::Completed(_) => panic!("no artifact expected"),
            TransferEvent::Failed { cause, .. } => {
                assert_eq!(cause, FailureCause::ChannelClosed);
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Sending on a closed channel is refused up front.
#[tokio::test]
async fn test_send_after_close_is_refused() -> Result<()> {
    let (sender, _receiver) = connected_peers(TransferSettings::default());
    sender.session.close();

    let result = sender
        .session
        .send(TransferSource::from_bytes("late.txt", "text/plain", &b"late"[..]));
    assert!(matches!(result, Err(TransferError::ChannelUnavailable)));
    assert!(sender.registry().is_empty());
    Ok(())
}

/// A transport error is treated like a close.
#[tokio::test]
async fn test_transport_error_fails_incoming() -> Result<()> {
    let (raw, _raw_events, receiver) = raw_sender(TransferSettings::default());
    raw.send(Message::meta("cut".into(), "cut.bin", 100, "application/octet-stream"))?;
    raw.send(Message::chunk("cut".into(), Bytes::from(vec![0u8; 10])))?;
    raw.fail("transport reset");

    assert_eq!(
        receiver.terminal_state(&"cut".into()).await?,
        TransferState::Failed(FailureCause::ChannelClosed)
    );
    Ok(())
}

/// Cancelling stops the sender at its next chunk boundary; the receiver
/// only learns of it when the channel closes.
#[tokio::test]
async fn test_cancel_outgoing() -> Result<()> {
    let (sender, mut receiver) = connected_peers(small_chunks(4));

    let (mut writer, reader) = tokio::io::duplex(64);
    writer.write_all(b"abcd").await?;
    let handle = sender.session.send(TransferSource::new(
        "cancel.bin",
        "application/octet-stream",
        12,
        reader,
    ))?;
    let id = handle.transfer_id().clone();

    wait_until(|| receiver.registry().get(&id).filter(|r| r.transferred_size == 4)).await?;
    sender.session.cancel(&id)?;
    writer.write_all(b"efgh").await?;

    assert_eq!(handle.finished().await?, TransferState::Cancelled);
    assert_eq!(sender.registry().get(&id).map(|r| r.transferred_size), Some(8));
    assert!(matches!(
        sender.session.cancel(&id),
        Err(TransferError::NotInFlight(_))
    ));

    sender.session.close();
    assert_eq!(
        receiver.terminal_state(&id).await?,
        TransferState::Failed(FailureCause::ChannelClosed)
    );
    while let Ok(event) = receiver.next_event().await {
        assert!(!matches!(event, TransferEvent::Completed(_)));
        if matches!(event, TransferEvent::Failed { .. }) {
            break;
        }
    }
    Ok(())
}

/// More bytes than declared fail the incoming transfer.
#[tokio::test]
async fn test_size_overflow() -> Result<()> {
    let (raw, _raw_events, mut receiver) = raw_sender(TransferSettings::default());
    raw.send(Message::meta("big".into(), "big.bin", 4, "application/octet-stream"))?;
    raw.send(Message::chunk("big".into(), Bytes::from_static(b"abcdef")))?;

    assert_eq!(
        receiver.terminal_state(&"big".into()).await?,
        TransferState::Failed(FailureCause::SizeOverflow)
    );
    match receiver.next_event().await? {
        TransferEvent::Started(record) => assert_eq!(record.total_size, 4),
        other => panic!("unexpected event: {other:?}"),
    }
    match receiver.next_event().await? {
        TransferEvent::Failed { cause, .. } => assert_eq!(cause, FailureCause::SizeOverflow),
        other => panic!("unexpected event: {other:?}"),
    }

    // Later chunks for the failed transfer change nothing.
    raw.send(Message::chunk("big".into(), Bytes::from_static(b"x")))?;
    raw.close();
    let registry = receiver.registry().clone();
    receiver.session.closed().await;
    assert_eq!(
        registry.get(&"big".into()).map(|r| r.state),
        Some(TransferState::Failed(FailureCause::SizeOverflow))
    );
    Ok(())
}

/// A source shorter than its declared size fails the sender.
#[tokio::test]
async fn test_short_source() -> Result<()> {
    let (sender, _receiver) = connected_peers(small_chunks(4));
    let reader = std::io::Cursor::new(b"abc".to_vec());
    let handle = sender
        .session
        .send(TransferSource::new("short.bin", "application/octet-stream", 10, reader))?;

    assert_eq!(
        handle.finished().await?,
        TransferState::Failed(FailureCause::SizeMismatch)
    );
    Ok(())
}
