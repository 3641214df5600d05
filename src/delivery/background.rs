//! The three long-lived background activities the Delivery Engine owns:
//! a retry poller, a peer-reconnect watcher, and an hourly cleanup
//! ticker. Each watches the shared shutdown signal and exits promptly on
//! its next loop iteration; none communicate with each other except
//! through the Queue Store.

use std::sync::Arc;

use tokio::time::interval;

use crate::delivery::engine::{now_unix, DeliveryEngine};
use crate::storage::OutboxStatus;
use crate::transport::ConnectednessState;

impl DeliveryEngine {
    /// Bring up both receive paths and all three background activities.
    /// Call once per process; re-arming a fresh shutdown signal after
    /// `shutdown` is not supported — construct a new engine instead.
    ///
    /// Registers the Stream Transport as the inbound handler for its
    /// protocol id and spawns the Broadcast Transport's subscribe/filter/
    /// dispatch loop, so a caller using only this public entry point
    /// receives inbound stream messages and broadcast envelopes without
    /// reaching into either transport directly — then starts the retry
    /// poller, peer-reconnect watcher, and cleanup ticker.
    pub async fn start(self: &Arc<Self>) {
        self.stream.clone().start().await;

        let broadcast = self.broadcast.clone();
        let mut handles = self.background_tasks.lock().await;
        handles.push(tokio::spawn(async move {
            if let Err(e) = broadcast.run().await {
                tracing::warn!(error = %e, "broadcast transport loop exited");
            }
        }));
        handles.push(tokio::spawn(self.clone().retry_poller()));
        handles.push(tokio::spawn(self.clone().peer_reconnect_watcher()));
        handles.push(tokio::spawn(self.clone().cleanup_ticker()));
    }

    /// Signal every background task to stop and wait (briefly) for them
    /// to exit. A mid-flight delivery attempt that doesn't observe the
    /// signal in time is simply abandoned; it left the row at `sent`
    /// with a stale `next_retry_at`, which the poller picks back up the
    /// next time this engine (or a fresh one backed by the same store)
    /// starts.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut handles = self.background_tasks.lock().await;
        for handle in handles.drain(..) {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }
    }

    /// Tick every `poll_interval`: expire due rows, then attempt (or
    /// reschedule) every row whose `next_retry_at` has arrived.
    async fn retry_poller(self: Arc<Self>) {
        let mut ticker = interval(self.config.poll_interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let now = now_unix();
            if let Err(e) = self.store.expire_due(now, self.config.stop_before_expiry.as_secs()) {
                tracing::warn!(error = %e, "expire_due failed, continuing");
                continue;
            }

            let due = match self.store.pending_due(now, self.config.batch_size) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(error = %e, "pending_due failed, continuing");
                    continue;
                }
            };

            for row in due {
                let mut connected = self.connector.is_connected(row.peer_id).await;
                if !connected {
                    connected = tokio::time::timeout(
                        self.config.directory_lookup_timeout,
                        self.try_connect_for_poller(row.peer_id),
                    )
                    .await
                    .unwrap_or(false);
                }

                if !connected {
                    let delay = self.backoff_for(row.retry_count);
                    if let Err(e) = self.store.schedule_retry(row.message_id, now_unix() + delay.as_secs()) {
                        tracing::warn!(message_id = %row.message_id, error = %e, "schedule_retry failed");
                    }
                    continue;
                }

                if let Err(e) = self.attempt_delivery(&row).await {
                    tracing::warn!(message_id = %row.message_id, error = %e, "retry attempt failed");
                }
            }
        }
    }

    async fn try_connect_for_poller(&self, peer_id: crate::protocol::PeerId) -> bool {
        let timeout = std::time::Duration::from_secs(10);
        let addresses = self
            .directory
            .find_peer(peer_id, timeout)
            .await
            .unwrap_or_default();
        if !addresses.is_empty() {
            let _ = self.connector.connect(&addresses, timeout).await;
        }
        self.connector.is_connected(peer_id).await
    }

    /// Subscribe to connectedness transitions and flush every queued
    /// message for a peer the moment it reconnects, in sequence-number
    /// order. Disconnection events are ignored — the retry poller covers
    /// offline peers.
    async fn peer_reconnect_watcher(self: Arc<Self>) {
        let mut events = self.connectedness.subscribe().await;
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some((peer_id, state)) = event else { return };
                    if state != ConnectednessState::Connected {
                        continue;
                    }
                    let rows = match self.store.pending_for_peer(&peer_id) {
                        Ok(rows) => rows,
                        Err(e) => {
                            tracing::warn!(error = %e, "pending_for_peer failed");
                            continue;
                        }
                    };
                    for row in rows {
                        if row.status == OutboxStatus::Acked
                            || row.status == OutboxStatus::Failed
                            || row.status == OutboxStatus::Expired
                        {
                            continue;
                        }
                        if let Err(e) = self.attempt_delivery(&row).await {
                            tracing::warn!(message_id = %row.message_id, error = %e, "reconnect flush attempt failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Tick every `cleanup_interval`: delete terminal outbox rows and
    /// aged inbox rows past `retention`.
    async fn cleanup_ticker(self: Arc<Self>) {
        let mut ticker = interval(self.config.cleanup_interval);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let threshold = now_unix().saturating_sub(self.config.retention.as_secs());
            match self.store.cleanup(threshold) {
                Ok((outbox, inbox)) => {
                    if outbox > 0 || inbox > 0 {
                        tracing::info!(outbox_deleted = outbox, inbox_deleted = inbox, "cleanup ticker ran");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "cleanup failed, continuing"),
            }
        }
    }
}
