//! The Stream Transport: a bidirectional, length-prefixed request/ACK
//! channel over a direct connection.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{AckPayload, MessageKind, PeerId, ProtocolMessage};
use crate::storage::{InboxRow, QueueStore};
use crate::transport::framing::{read_frame, write_frame};
use crate::transport::traits::{ByteStream, InboundStreamHandler, MessageHandler, StreamOpener};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn ack_message(from: PeerId, trade_id: &str, ack: &AckPayload) -> Result<ProtocolMessage> {
    Ok(ProtocolMessage {
        kind: MessageKind::Ack,
        trade_id: trade_id.to_string(),
        order_id: None,
        sender_id: from,
        payload: serde_json::to_vec(ack)?,
        timestamp: now_unix(),
        message_id: Some(Uuid::new_v4()),
        sequence_num: ack.sequence_num,
        requires_ack: false,
        swap_expiry: 0,
    })
}

/// Direct stream delivery: one stream open per send, closed after the
/// ACK (or immediately, for fire-and-forget messages).
pub struct StreamTransport {
    local_id: PeerId,
    opener: Arc<dyn StreamOpener>,
    store: Arc<QueueStore>,
    handler: Arc<dyn MessageHandler>,
    protocol_id: String,
    max_frame: usize,
    ack_timeout: Duration,
}

impl StreamTransport {
    pub fn new(
        local_id: PeerId,
        opener: Arc<dyn StreamOpener>,
        store: Arc<QueueStore>,
        handler: Arc<dyn MessageHandler>,
        protocol_id: String,
        max_frame: usize,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            opener,
            store,
            handler,
            protocol_id,
            max_frame,
            ack_timeout,
        })
    }

    /// Register this transport as the inbound stream handler for its
    /// protocol id. Call once per process.
    pub async fn start(self: &Arc<Self>) {
        self.opener
            .set_stream_handler(&self.protocol_id, self.clone() as Arc<dyn InboundStreamHandler>)
            .await;
    }

    /// Open a stream to `peer`, send `message`, and — if it requires an
    /// ACK — wait for one.
    pub async fn send(&self, peer: PeerId, mut message: ProtocolMessage) -> Result<()> {
        if message.message_id.is_none() {
            message.message_id = Some(Uuid::new_v4());
        }
        message.timestamp = now_unix();
        message.sender_id = self.local_id;

        let mut stream = tokio::time::timeout(
            Duration::from_secs(30),
            self.opener.open_stream(peer, &self.protocol_id),
        )
        .await
        .map_err(|_| Error::TransportFailed("open_stream timed out".into()))??;

        let bytes = message.to_canonical_bytes()?;
        tokio::time::timeout(
            Duration::from_secs(30),
            write_frame(&mut stream, &bytes, self.max_frame),
        )
        .await
        .map_err(|_| Error::TransportFailed("write timed out".into()))??;

        if !message.requires_ack {
            return Ok(());
        }

        let response = tokio::time::timeout(self.ack_timeout, read_frame(&mut stream, self.max_frame))
            .await
            .map_err(|_| Error::TransportFailed("ack read timed out".into()))??;

        let ack_envelope = ProtocolMessage::from_canonical_bytes(&response)
            .map_err(|e| Error::TransportFailed(e.to_string()))?;
        if ack_envelope.kind != MessageKind::Ack {
            return Err(Error::TransportFailed("expected ack, got other kind".into()));
        }
        let ack: AckPayload =
            serde_json::from_slice(&ack_envelope.payload).map_err(|e| Error::TransportFailed(e.to_string()))?;

        if ack.success {
            Ok(())
        } else {
            Err(Error::Rejected(ack.error))
        }
    }

    async fn handle_inbound(&self, stream: &mut ByteStream) -> Result<()> {
        let frame = tokio::time::timeout(Duration::from_secs(60), read_frame(stream, self.max_frame))
            .await
            .map_err(|_| Error::TransportFailed("read timed out".into()))??;

        let message = ProtocolMessage::from_canonical_bytes(&frame)?;
        let message_id = message
            .message_id
            .ok_or_else(|| Error::Malformed("message missing message_id".into()))?;

        if self.store.has_received(message_id)? {
            let sequence_num = message.sequence_num;
            let ack = AckPayload::success(message_id, sequence_num);
            let response = ack_message(self.local_id, &message.trade_id, &ack)?;
            let bytes = response.to_canonical_bytes()?;
            write_frame(stream, &bytes, self.max_frame).await?;
            return Ok(());
        }

        let inbox_row = InboxRow {
            message_id,
            trade_id: message.trade_id.clone(),
            sender_peer_id: message.sender_id,
            kind: message.kind,
            sequence_num: message.sequence_num,
            received_at: now_unix(),
            processed_at: None,
            ack_sent: false,
        };
        self.store.record_received(&inbox_row)?;

        if let Some(seq) = message.sequence_num {
            self.store.update_remote_sequence(&message.trade_id, seq, now_unix())?;
        }

        let handler_result = self.handler.handle(message.clone()).await;

        if message.requires_ack {
            let ack = match &handler_result {
                Ok(()) => AckPayload::success(message_id, message.sequence_num),
                Err(e) => AckPayload::failure(message_id, message.sequence_num, e.to_string()),
            };
            let response = ack_message(self.local_id, &message.trade_id, &ack)?;
            let bytes = response.to_canonical_bytes()?;
            write_frame(stream, &bytes, self.max_frame).await?;
            self.store.mark_ack_sent(message_id)?;
        }

        self.store.mark_processed(message_id, now_unix())?;
        handler_result
    }
}

#[async_trait]
impl InboundStreamHandler for StreamTransport {
    async fn handle_stream(&self, _peer_id: PeerId, mut stream: ByteStream) {
        if let Err(e) = self.handle_inbound(&mut stream).await {
            tracing::warn!(error = %e, "inbound stream handling failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_message_carries_expected_kind_and_payload() {
        let peer = PeerId::new([1u8; 32]);
        let ack = AckPayload::success(Uuid::new_v4(), Some(3));
        let msg = ack_message(peer, "trade-1", &ack).unwrap();
        assert_eq!(msg.kind, MessageKind::Ack);
        let decoded: AckPayload = serde_json::from_slice(&msg.payload).unwrap();
        assert!(decoded.success);
        assert_eq!(decoded.sequence_num, Some(3));
    }
}
