//! The Broadcast Transport: delivery fallback over a public gossip
//! topic, sealed so only the intended recipient can read it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::config::NetworkNamespace;
use crate::crypto::EnvelopeCodec;
use crate::error::{Error, Result};
use crate::protocol::{AckPayload, MessageKind, PeerId, ProtocolMessage, SealedEnvelope};
use crate::storage::{InboxRow, QueueStore};
use crate::transport::traits::{Broadcast, MessageHandler};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Seals outbound messages and publishes them to a shared topic; filters
/// and unseals inbound gossip addressed to the local identity.
pub struct BroadcastTransport {
    local_id: PeerId,
    codec: EnvelopeCodec,
    gossip: Arc<dyn Broadcast>,
    store: Arc<QueueStore>,
    handler: Arc<dyn MessageHandler>,
    topic: String,
}

impl BroadcastTransport {
    pub fn new(
        local_id: PeerId,
        codec: EnvelopeCodec,
        gossip: Arc<dyn Broadcast>,
        store: Arc<QueueStore>,
        handler: Arc<dyn MessageHandler>,
        namespace: &NetworkNamespace,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id,
            codec,
            gossip,
            store,
            handler,
            topic: namespace.encrypted_topic(),
        })
    }

    /// Seal `message` for `recipient` and publish it to the shared topic.
    pub async fn publish(&self, recipient: PeerId, message: ProtocolMessage) -> Result<()> {
        let envelope = self.codec.encrypt(&recipient, &self.local_id, &message)?;
        let bytes = envelope.to_canonical_bytes()?;
        self.gossip.publish(&self.topic, bytes).await
    }

    /// Subscribe to the shared topic and run the filter/unseal/dispatch
    /// loop until the channel closes. Intended to run as a background
    /// task for the lifetime of the process.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut rx = self.gossip.subscribe(&self.topic).await?;
        while let Some((_publisher, bytes)) = rx.recv().await {
            if let Err(e) = self.handle_gossip(&bytes).await {
                tracing::debug!(error = %e, "discarding broadcast gossip");
            }
        }
        Ok(())
    }

    async fn handle_gossip(&self, bytes: &[u8]) -> Result<()> {
        let envelope = SealedEnvelope::from_canonical_bytes(bytes)?;
        if !envelope.is_for_us(&self.local_id) {
            return Ok(());
        }

        let message = self.codec.decrypt(&self.local_id, &envelope)?;

        if message.kind == MessageKind::Ack {
            return self.handle_ack(&message);
        }

        let message_id = message
            .message_id
            .ok_or_else(|| Error::Malformed("message missing message_id".into()))?;

        if self.store.has_received(message_id)? {
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
            let ack_message = ProtocolMessage {
                kind: MessageKind::Ack,
                trade_id: message.trade_id.clone(),
                order_id: None,
                sender_id: self.local_id,
                payload: serde_json::to_vec(&ack)?,
                timestamp: now_unix(),
                message_id: Some(Uuid::new_v4()),
                sequence_num: ack.sequence_num,
                requires_ack: false,
                swap_expiry: 0,
            };
            self.publish(message.sender_id, ack_message).await?;
            self.store.mark_ack_sent(message_id)?;
        }

        self.store.mark_processed(message_id, now_unix())?;
        handler_result
    }

    /// An ACK arriving out of band over the broadcast topic: transition
    /// the *sender's* outbox row directly instead of dispatching to the
    /// application handler or recording it in the inbox.
    fn handle_ack(&self, message: &ProtocolMessage) -> Result<()> {
        let ack: AckPayload =
            serde_json::from_slice(&message.payload).map_err(|e| Error::Malformed(e.to_string()))?;
        if ack.success {
            self.store.mark_acked(ack.message_id, now_unix())?;
        } else {
            self.store.mark_failed(ack.message_id, &ack.error)?;
        }
        Ok(())
    }
}
