//! Synchronous entry point and the single delivery attempt both the
//! poller and the reconnect watcher reuse.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{DeliveryConfig, NetworkNamespace};
use crate::error::Result;
use crate::protocol::{MessageKind, PeerId, ProtocolMessage};
use crate::resilience::compute_backoff;
use crate::storage::{OutboxRow, OutboxStatus, QueueStore};
use crate::transport::{
    BroadcastTransport, ConnectednessEvents, Connector, PeerDirectory, StreamTransport,
};

pub(super) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Orchestrates the Queue Store and the two transports behind the hybrid
/// send policy described in the component design: direct stream first,
/// sealed broadcast as fallback, backoff retry as insurance.
pub struct DeliveryEngine {
    pub(super) local_id: PeerId,
    pub(super) store: Arc<QueueStore>,
    pub(super) stream: Arc<StreamTransport>,
    pub(super) broadcast: Arc<BroadcastTransport>,
    pub(super) directory: Arc<dyn PeerDirectory>,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) connectedness: Arc<dyn ConnectednessEvents>,
    pub(super) config: DeliveryConfig,
    pub(super) namespace: NetworkNamespace,
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) shutdown_rx: watch::Receiver<bool>,
    pub(super) background_tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl DeliveryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_id: PeerId,
        store: Arc<QueueStore>,
        stream: Arc<StreamTransport>,
        broadcast: Arc<BroadcastTransport>,
        directory: Arc<dyn PeerDirectory>,
        connector: Arc<dyn Connector>,
        connectedness: Arc<dyn ConnectednessEvents>,
        config: DeliveryConfig,
        namespace: NetworkNamespace,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            local_id,
            store,
            stream,
            broadcast,
            directory,
            connector,
            connectedness,
            config,
            namespace,
            shutdown_tx,
            shutdown_rx,
            background_tasks: AsyncMutex::new(Vec::new()),
        })
    }

    pub fn namespace(&self) -> NetworkNamespace {
        self.namespace
    }

    /// Durably enqueue `message` for `peer` under `trade`, minting the next
    /// local sequence number, then spawn an unblocking delivery attempt.
    /// Returns as soon as the row is durable — delivery happens out of
    /// band.
    pub async fn send(
        self: &Arc<Self>,
        peer: PeerId,
        trade: &str,
        swap_expiry: u64,
        mut message: ProtocolMessage,
    ) -> Result<Uuid> {
        let now = now_unix();
        let message_id = message.message_id.unwrap_or_else(Uuid::new_v4);
        message.message_id = Some(message_id);
        message.trade_id = trade.to_string();
        message.sender_id = self.local_id;
        message.timestamp = now;
        message.requires_ack = true;
        message.swap_expiry = swap_expiry;

        let sequence_num = self.store.next_local_sequence(trade, now)?;
        message.sequence_num = Some(sequence_num);

        let message_bytes = message.to_canonical_bytes()?;
        let row = OutboxRow {
            message_id,
            trade_id: trade.to_string(),
            peer_id: peer,
            kind: message.kind,
            message_bytes,
            sequence_num,
            swap_expiry,
            created_at: now,
            retry_count: 0,
            last_attempt_at: None,
            next_retry_at: now,
            acked_at: None,
            status: OutboxStatus::Pending,
            error_reason: None,
        };
        self.store.enqueue(&row)?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.attempt_delivery(&row).await {
                tracing::warn!(message_id = %row.message_id, error = %e, "delivery attempt failed");
            }
        });

        Ok(message_id)
    }

    /// One delivery attempt for an outbox row: expiry check, direct
    /// stream if reachable, sealed broadcast fallback, backoff retry on
    /// total failure. May take minutes (directory lookup + connect).
    pub(super) async fn attempt_delivery(&self, row: &OutboxRow) -> Result<()> {
        let now = now_unix();
        let guard = self.config.stop_before_expiry.as_secs();
        if row.swap_expiry <= now.saturating_add(guard) {
            self.store.mark_expired(row.message_id)?;
            tracing::info!(message_id = %row.message_id, trade_id = %row.trade_id, "swap expired, no further delivery attempts");
            return Ok(());
        }

        self.store.mark_sent(row.message_id, now)?;

        let mut message = ProtocolMessage::from_canonical_bytes(&row.message_bytes)?;
        message.sequence_num = Some(row.sequence_num);

        let mut connected = self.connector.is_connected(row.peer_id).await;
        if !connected {
            connected = self.try_connect(row.peer_id).await;
        }

        if connected {
            match self.stream.send(row.peer_id, message.clone()).await {
                Ok(()) => {
                    self.store.mark_acked(row.message_id, now_unix())?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(message_id = %row.message_id, error = %e, "direct stream delivery failed, falling back to broadcast");
                }
            }
        }

        if self.broadcast.publish(row.peer_id, message.clone()).await.is_ok() {
            // Publish succeeded but the ACK is genuinely pending out of
            // band; schedule a short insurance retry budgeted against
            // the same retry cap, regardless of how many attempts
            // preceded it.
            let delay = compute_backoff(
                0,
                self.config.initial_retry,
                self.config.backoff_multiplier,
                self.config.max_retry,
            );
            self.store
                .schedule_retry(row.message_id, now_unix() + delay.as_secs())?;
            return Ok(());
        }

        self.schedule_or_fail(row.message_id)
    }

    /// Query the peer directory and attempt to connect; failures at
    /// either step are tolerated and simply leave the peer disconnected.
    async fn try_connect(&self, peer_id: PeerId) -> bool {
        let addresses = tokio::time::timeout(
            self.config.directory_lookup_timeout,
            self.directory.find_peer(peer_id, self.config.directory_lookup_timeout),
        )
        .await
        .ok()
        .and_then(|r| r.ok());

        if let Some(addresses) = addresses {
            let _ = tokio::time::timeout(
                self.config.connect_timeout,
                self.connector.connect(&addresses, self.config.connect_timeout),
            )
            .await;
        }

        self.connector.is_connected(peer_id).await
    }

    /// Compute backoff from the row's current retry count (fetched
    /// directly by id rather than by scanning) and either schedule
    /// another attempt or mark the row terminally failed.
    fn schedule_or_fail(&self, message_id: Uuid) -> Result<()> {
        let row = self.store.get_outbox(message_id)?;
        let retry_count = row.map(|r| r.retry_count).unwrap_or(0);

        if retry_count > self.config.max_retries {
            self.store.mark_failed(message_id, "max retries exceeded")?;
            return Ok(());
        }

        let delay = compute_backoff(
            retry_count,
            self.config.initial_retry,
            self.config.backoff_multiplier,
            self.config.max_retry,
        );
        self.store.schedule_retry(message_id, now_unix() + delay.as_secs())
    }

    /// Mark every non-terminal outbox row for `trade` as failed. Used
    /// when the swap state machine declares the trade dead.
    pub fn cancel_pending_for_trade(&self, trade: &str, reason: &str) -> Result<u64> {
        self.store.cancel_pending_for_trade(trade, reason)
    }

    /// Number of non-terminal outbox rows for a trade.
    pub fn pending_count(&self, trade: &str) -> Result<u64> {
        self.store.pending_count(trade)
    }

    /// The outbox row for `message_id`, if one has been enqueued. Lets an
    /// application (or a test) observe the `pending | sent | acked |
    /// failed | expired` lifecycle described in spec §7 without reaching
    /// into this engine's storage internals.
    pub fn outbox_row(&self, message_id: Uuid) -> Result<Option<OutboxRow>> {
        self.store.get_outbox(message_id)
    }

    /// Whether an inbound message with this id has already been recorded,
    /// i.e. whether a duplicate delivery would be absorbed rather than
    /// re-dispatched to the handler.
    pub fn has_received(&self, message_id: Uuid) -> Result<bool> {
        self.store.has_received(message_id)
    }

    /// Send `message` to `peer` over the direct stream transport only,
    /// bypassing the hybrid send policy, durability, and sequencing
    /// `send` provides. Exposed for callers that need to drive the Stream
    /// Transport's request/ACK contract directly.
    pub async fn send_via_stream(&self, peer: PeerId, message: ProtocolMessage) -> Result<()> {
        self.stream.send(peer, message).await
    }

    /// Seal and publish `message` to `peer` over the broadcast topic
    /// only, bypassing the hybrid send policy. Exposed for callers that
    /// need to drive the Broadcast Transport's publish contract directly.
    pub async fn send_via_broadcast(&self, peer: PeerId, message: ProtocolMessage) -> Result<()> {
        self.broadcast.publish(peer, message).await
    }

    /// Retry delay used for the fallback, insurance-retry path, exposed
    /// so background tasks can reuse the same computation.
    pub(super) fn backoff_for(&self, retry_count: u32) -> Duration {
        compute_backoff(
            retry_count,
            self.config.initial_retry,
            self.config.backoff_multiplier,
            self.config.max_retry,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{EnvelopeCodec, Identity};
    use crate::storage::QueueStore;
    use crate::transport::{Broadcast, ByteStream, InboundStreamHandler, MessageHandler, StreamOpener};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct NoopHandler;
    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _message: ProtocolMessage) -> Result<()> {
            Ok(())
        }
    }

    struct UnreachableOpener;
    #[async_trait]
    impl StreamOpener for UnreachableOpener {
        async fn open_stream(&self, _peer_id: PeerId, _protocol_id: &str) -> Result<ByteStream> {
            Err(crate::error::Error::TransportFailed("no route".into()))
        }
        async fn set_stream_handler(
            &self,
            _protocol_id: &str,
            _handler: Arc<dyn InboundStreamHandler>,
        ) {
        }
    }

    struct NeverConnects;
    #[async_trait]
    impl Connector for NeverConnects {
        async fn is_connected(&self, _peer_id: PeerId) -> bool {
            false
        }
        async fn connect(&self, _addresses: &[String], _timeout: Duration) -> Result<()> {
            Err(crate::error::Error::Transient("unreachable".into()))
        }
    }

    pub(super) struct NoEvents;
    #[async_trait]
    impl crate::transport::ConnectednessEvents for NoEvents {
        async fn subscribe(&self) -> mpsc::Receiver<(PeerId, crate::transport::ConnectednessState)> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    struct NoPeerFound;
    #[async_trait]
    impl PeerDirectory for NoPeerFound {
        async fn find_peer(&self, _peer_id: PeerId, _timeout: Duration) -> Result<Vec<String>> {
            Err(crate::error::Error::Transient("peer not found".into()))
        }
    }

    struct DroppingBroadcast {
        published: AtomicBool,
    }
    #[async_trait]
    impl Broadcast for DroppingBroadcast {
        async fn publish(&self, _topic: &str, _bytes: Vec<u8>) -> Result<()> {
            self.published.store(true, Ordering::SeqCst);
            Err(crate::error::Error::Transient("no subscribers".into()))
        }
        async fn subscribe(&self, _topic: &str) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    struct WorkingBroadcast;
    #[async_trait]
    impl Broadcast for WorkingBroadcast {
        async fn publish(&self, _topic: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn subscribe(&self, _topic: &str) -> Result<mpsc::Receiver<(PeerId, Vec<u8>)>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    fn sample_message(sender: PeerId, trade_id: &str, swap_expiry: u64) -> ProtocolMessage {
        ProtocolMessage {
            kind: MessageKind::PubkeyExchange,
            trade_id: trade_id.to_string(),
            order_id: None,
            sender_id: sender,
            payload: vec![1, 2, 3],
            timestamp: 0,
            message_id: None,
            sequence_num: None,
            requires_ack: true,
            swap_expiry,
        }
    }

    /// Build and durably enqueue a row the same way `send` does, but
    /// without spawning a background attempt — tests drive
    /// `attempt_delivery` themselves and a concurrently spawned attempt
    /// would race the assertions.
    async fn enqueue_for_test(
        engine: &Arc<DeliveryEngine>,
        peer: PeerId,
        trade: &str,
        swap_expiry: u64,
        mut message: ProtocolMessage,
    ) -> OutboxRow {
        let now = now_unix();
        let message_id = Uuid::new_v4();
        message.message_id = Some(message_id);
        message.trade_id = trade.to_string();
        message.sender_id = engine.local_id;
        message.timestamp = now;
        message.requires_ack = true;
        message.swap_expiry = swap_expiry;

        let sequence_num = engine.store.next_local_sequence(trade, now).unwrap();
        message.sequence_num = Some(sequence_num);

        let row = OutboxRow {
            message_id,
            trade_id: trade.to_string(),
            peer_id: peer,
            kind: message.kind,
            message_bytes: message.to_canonical_bytes().unwrap(),
            sequence_num,
            swap_expiry,
            created_at: now,
            retry_count: 0,
            last_attempt_at: None,
            next_retry_at: now,
            acked_at: None,
            status: OutboxStatus::Pending,
            error_reason: None,
        };
        engine.store.enqueue(&row).unwrap();
        row
    }

    fn make_engine(
        broadcast_impl: Arc<dyn Broadcast>,
        config: DeliveryConfig,
    ) -> (Arc<DeliveryEngine>, PeerId) {
        let identity = Identity::generate();
        let local_id = identity.peer_id();
        let store = Arc::new(QueueStore::open_in_memory().unwrap());
        let handler: Arc<dyn MessageHandler> = Arc::new(NoopHandler);

        let stream = StreamTransport::new(
            local_id,
            Arc::new(UnreachableOpener),
            store.clone(),
            handler.clone(),
            NetworkNamespace::Testnet.stream_protocol_id(),
            config.max_frame,
            config.ack_timeout,
        );

        let codec = EnvelopeCodec::new(&identity);
        let broadcast = BroadcastTransport::new(
            local_id,
            codec,
            broadcast_impl,
            store.clone(),
            handler,
            &NetworkNamespace::Testnet,
        );

        let engine = DeliveryEngine::new(
            local_id,
            store,
            stream,
            broadcast,
            Arc::new(NoPeerFound),
            Arc::new(NeverConnects),
            Arc::new(NoEvents),
            config,
            NetworkNamespace::Testnet,
        );
        (engine, local_id)
    }

    #[tokio::test]
    async fn expired_row_short_circuits_to_expired_without_sending() {
        let (engine, local_id) = make_engine(Arc::new(WorkingBroadcast), DeliveryConfig::default());
        let peer = PeerId::new([9u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-1", now + 10); // already within the 1h guard

        let row = enqueue_for_test(&engine, peer, "trade-1", now + 10, message).await;
        engine.attempt_delivery(&row).await.unwrap();

        let row = engine.store.get_outbox(row.message_id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Expired);
    }

    #[tokio::test]
    async fn unreachable_peer_falls_through_to_broadcast_insurance_retry() {
        let (engine, local_id) = make_engine(Arc::new(WorkingBroadcast), DeliveryConfig::default());
        let peer = PeerId::new([10u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-2", now + 7200);

        let row = enqueue_for_test(&engine, peer, "trade-2", now + 7200, message).await;
        engine.attempt_delivery(&row).await.unwrap();

        let row = engine.store.get_outbox(row.message_id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Sent);
        assert!(row.next_retry_at > now);
    }

    #[tokio::test]
    async fn total_failure_schedules_backoff_retry() {
        let (engine, local_id) = make_engine(
            Arc::new(DroppingBroadcast { published: AtomicBool::new(false) }),
            DeliveryConfig::default(),
        );
        let peer = PeerId::new([11u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-3", now + 7200);

        let row = enqueue_for_test(&engine, peer, "trade-3", now + 7200, message).await;
        engine.attempt_delivery(&row).await.unwrap();

        let row = engine.store.get_outbox(row.message_id).unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.retry_count, 1);
        assert!(row.next_retry_at >= now + 10);
    }

    #[tokio::test]
    async fn max_retries_exceeded_marks_failed() {
        let mut config = DeliveryConfig::default();
        config.max_retries = 2;
        let (engine, local_id) = make_engine(
            Arc::new(DroppingBroadcast { published: AtomicBool::new(false) }),
            config,
        );
        let peer = PeerId::new([12u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-4", now + 7200);

        let mut row = enqueue_for_test(&engine, peer, "trade-4", now + 7200, message).await;

        for _ in 0..3 {
            if row.status == OutboxStatus::Failed {
                break;
            }
            engine.attempt_delivery(&row).await.unwrap();
            row = engine.store.get_outbox(row.message_id).unwrap().unwrap();
        }

        assert_eq!(row.status, OutboxStatus::Failed);
        assert_eq!(row.error_reason.as_deref(), Some("max retries exceeded"));
    }

    #[tokio::test]
    async fn cancel_pending_for_trade_marks_rows_failed() {
        let (engine, local_id) = make_engine(Arc::new(WorkingBroadcast), DeliveryConfig::default());
        let peer = PeerId::new([13u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-5", now + 7200);
        enqueue_for_test(&engine, peer, "trade-5", now + 7200, message).await;

        let affected = engine.cancel_pending_for_trade("trade-5", "swap declared dead").unwrap();
        assert_eq!(affected, 1);
        assert_eq!(engine.pending_count("trade-5").unwrap(), 0);
    }

    #[tokio::test]
    async fn send_enqueues_durably_before_returning() {
        let (engine, local_id) = make_engine(Arc::new(WorkingBroadcast), DeliveryConfig::default());
        let peer = PeerId::new([14u8; 32]);
        let now = now_unix();
        let message = sample_message(local_id, "trade-6", now + 7200);

        let message_id = engine
            .send(peer, "trade-6", now + 7200, message)
            .await
            .unwrap();

        // No other await point has run yet on this current-thread runtime,
        // so the spawned delivery attempt cannot have executed: the row
        // must already be durable exactly as enqueued.
        let row = engine.store.get_outbox(message_id).unwrap().unwrap();
        assert_eq!(row.trade_id, "trade-6");
        assert_eq!(row.sequence_num, 1);
    }

    #[tokio::test]
    async fn namespace_is_exposed_for_protocol_id_construction() {
        let (engine, _local_id) = make_engine(Arc::new(WorkingBroadcast), DeliveryConfig::default());
        assert_eq!(engine.namespace(), NetworkNamespace::Testnet);
    }
}
