//! The Queue Store: durable outbox, inbox, and per-trade sequence
//! counters backed by a single-writer SQLite connection in WAL mode.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{MessageKind, PeerId};

/// Lifecycle state of an outbox row. `Acked`, `Failed`, and `Expired` are
/// terminal: once reached, no further transition occurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Acked,
    Failed,
    Expired,
}

impl OutboxStatus {
    fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Acked => "acked",
            OutboxStatus::Failed => "failed",
            OutboxStatus::Expired => "expired",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "pending" => OutboxStatus::Pending,
            "sent" => OutboxStatus::Sent,
            "acked" => OutboxStatus::Acked,
            "failed" => OutboxStatus::Failed,
            "expired" => OutboxStatus::Expired,
            other => return Err(Error::Malformed(format!("unknown outbox status {other}"))),
        })
    }

    fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Acked | OutboxStatus::Failed | OutboxStatus::Expired)
    }
}

fn kind_to_wire(kind: MessageKind) -> String {
    // MessageKind serializes to its quoted wire string; strip the quotes
    // to get the bare value stored in the `kind` column.
    let quoted = serde_json::to_string(&kind).expect("MessageKind always serializes");
    quoted.trim_matches('"').to_string()
}

fn kind_from_wire(s: &str) -> Result<MessageKind> {
    serde_json::from_str(&format!("\"{s}\"")).map_err(|e| Error::Malformed(e.to_string()))
}

/// A message awaiting or having completed outbound delivery.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub message_id: Uuid,
    pub trade_id: String,
    pub peer_id: PeerId,
    pub kind: MessageKind,
    pub message_bytes: Vec<u8>,
    pub sequence_num: u64,
    pub swap_expiry: u64,
    pub created_at: u64,
    pub retry_count: u32,
    pub last_attempt_at: Option<u64>,
    pub next_retry_at: u64,
    pub acked_at: Option<u64>,
    pub status: OutboxStatus,
    pub error_reason: Option<String>,
}

/// A received message, recorded before dispatch for idempotency.
#[derive(Debug, Clone)]
pub struct InboxRow {
    pub message_id: Uuid,
    pub trade_id: String,
    pub sender_peer_id: PeerId,
    pub kind: MessageKind,
    pub sequence_num: Option<u64>,
    pub received_at: u64,
    pub processed_at: Option<u64>,
    pub ack_sent: bool,
}

/// Per-trade local/remote sequence counters.
#[derive(Debug, Clone)]
pub struct SequenceRow {
    pub trade_id: String,
    pub local_next_sequence: u64,
    pub remote_highest_seen: u64,
    pub updated_at: u64,
}

fn peer_hex(peer_id: &PeerId) -> String {
    peer_id.to_hex()
}

fn peer_from_hex(s: &str) -> Result<PeerId> {
    let bytes = hex::decode(s).map_err(|e| Error::Malformed(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(Error::Malformed("peer id must be 32 bytes".into()));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(PeerId::new(arr))
}

/// Durable, single-writer store for the outbox, inbox, and sequence
/// tables. All mutating operations serialise through one connection
/// guarded by a mutex; reads go through the same connection since
/// rusqlite connections aren't `Sync`.
pub struct QueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl QueueStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS message_outbox (
                message_id TEXT PRIMARY KEY,
                trade_id TEXT NOT NULL,
                peer_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                message_bytes BLOB NOT NULL,
                sequence_num INTEGER NOT NULL,
                swap_expiry INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at INTEGER,
                next_retry_at INTEGER NOT NULL,
                acked_at INTEGER,
                status TEXT NOT NULL,
                error_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_status_retry
                ON message_outbox(status, next_retry_at);
            CREATE INDEX IF NOT EXISTS idx_outbox_trade ON message_outbox(trade_id);
            CREATE INDEX IF NOT EXISTS idx_outbox_peer_status ON message_outbox(peer_id, status);

            CREATE TABLE IF NOT EXISTS message_inbox (
                message_id TEXT PRIMARY KEY,
                trade_id TEXT NOT NULL,
                sender_peer_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                sequence_num INTEGER,
                received_at INTEGER NOT NULL,
                processed_at INTEGER,
                ack_sent INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_inbox_trade ON message_inbox(trade_id);

            CREATE TABLE IF NOT EXISTS message_sequences (
                trade_id TEXT PRIMARY KEY,
                local_next_sequence INTEGER NOT NULL DEFAULT 1,
                remote_highest_seen INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Insert a new pending row. Fails on duplicate `message_id`.
    pub fn enqueue(&self, row: &OutboxRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_outbox
                (message_id, trade_id, peer_id, kind, message_bytes, sequence_num,
                 swap_expiry, created_at, retry_count, last_attempt_at, next_retry_at,
                 acked_at, status, error_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                row.message_id.to_string(),
                row.trade_id,
                peer_hex(&row.peer_id),
                kind_to_wire(row.kind),
                row.message_bytes,
                row.sequence_num as i64,
                row.swap_expiry as i64,
                row.created_at as i64,
                row.retry_count as i64,
                row.last_attempt_at.map(|v| v as i64),
                row.next_retry_at as i64,
                row.acked_at.map(|v| v as i64),
                row.status.as_str(),
                row.error_reason,
            ],
        )?;
        Ok(())
    }

    /// Atomically mint the next per-trade local sequence number, starting
    /// at 1. Must be serialised: two concurrent callers on the same trade
    /// observe distinct numbers. The connection mutex provides that.
    pub fn next_local_sequence(&self, trade_id: &str, now: u64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_sequences (trade_id, local_next_sequence, remote_highest_seen, updated_at)
             VALUES (?1, 1, 0, ?2)
             ON CONFLICT(trade_id) DO UPDATE SET
                local_next_sequence = local_next_sequence + 1,
                updated_at = excluded.updated_at",
            params![trade_id, now as i64],
        )?;
        let seq: i64 = conn.query_row(
            "SELECT local_next_sequence FROM message_sequences WHERE trade_id = ?1",
            params![trade_id],
            |row| row.get(0),
        )?;
        Ok(seq as u64)
    }

    /// Set remote-highest-seen to `max(current, seq)`.
    pub fn update_remote_sequence(&self, trade_id: &str, seq: u64, now: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO message_sequences (trade_id, local_next_sequence, remote_highest_seen, updated_at)
             VALUES (?1, 1, ?2, ?3)
             ON CONFLICT(trade_id) DO UPDATE SET
                remote_highest_seen = MAX(remote_highest_seen, excluded.remote_highest_seen),
                updated_at = excluded.updated_at",
            params![trade_id, seq as i64, now as i64],
        )?;
        Ok(())
    }

    /// Fetch the local/remote sequence counters for a trade, if the trade
    /// has minted or observed a sequence number yet.
    pub fn get_sequence(&self, trade_id: &str) -> Result<Option<SequenceRow>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT trade_id, local_next_sequence, remote_highest_seen, updated_at
             FROM message_sequences WHERE trade_id = ?1",
            params![trade_id],
            |row| {
                Ok(SequenceRow {
                    trade_id: row.get(0)?,
                    local_next_sequence: row.get::<_, i64>(1)? as u64,
                    remote_highest_seen: row.get::<_, i64>(2)? as u64,
                    updated_at: row.get::<_, i64>(3)? as u64,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn mark_sent(&self, message_id: Uuid, now: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_outbox SET status = ?1, last_attempt_at = ?2, retry_count = retry_count + 1
             WHERE message_id = ?3",
            params![OutboxStatus::Sent.as_str(), now as i64, message_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_acked(&self, message_id: Uuid, now: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_outbox SET status = ?1, acked_at = ?2 WHERE message_id = ?3",
            params![OutboxStatus::Acked.as_str(), now as i64, message_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, message_id: Uuid, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_outbox SET status = ?1, error_reason = ?2 WHERE message_id = ?3",
            params![OutboxStatus::Failed.as_str(), reason, message_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_expired(&self, message_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_outbox SET status = ?1 WHERE message_id = ?2",
            params![OutboxStatus::Expired.as_str(), message_id.to_string()],
        )?;
        Ok(())
    }

    /// Status `pending`, `next_retry_at = when`. Does not touch
    /// `retry_count` — that was bumped by `mark_sent`.
    pub fn schedule_retry(&self, message_id: Uuid, when: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_outbox SET status = ?1, next_retry_at = ?2 WHERE message_id = ?3",
            params![OutboxStatus::Pending.as_str(), when as i64, message_id.to_string()],
        )?;
        Ok(())
    }

    fn row_from_sql(row: &rusqlite::Row) -> rusqlite::Result<OutboxRow> {
        let message_id: String = row.get(0)?;
        let trade_id: String = row.get(1)?;
        let peer_id: String = row.get(2)?;
        let kind: String = row.get(3)?;
        let message_bytes: Vec<u8> = row.get(4)?;
        let sequence_num: i64 = row.get(5)?;
        let swap_expiry: i64 = row.get(6)?;
        let created_at: i64 = row.get(7)?;
        let retry_count: i64 = row.get(8)?;
        let last_attempt_at: Option<i64> = row.get(9)?;
        let next_retry_at: i64 = row.get(10)?;
        let acked_at: Option<i64> = row.get(11)?;
        let status: String = row.get(12)?;
        let error_reason: Option<String> = row.get(13)?;

        Ok(OutboxRow {
            message_id: Uuid::parse_str(&message_id).unwrap_or_default(),
            trade_id,
            peer_id: peer_from_hex(&peer_id).unwrap_or_else(|_| PeerId::new([0u8; 32])),
            kind: kind_from_wire(&kind).unwrap_or(MessageKind::Abort),
            message_bytes,
            sequence_num: sequence_num as u64,
            swap_expiry: swap_expiry as u64,
            created_at: created_at as u64,
            retry_count: retry_count as u32,
            last_attempt_at: last_attempt_at.map(|v| v as u64),
            next_retry_at: next_retry_at as u64,
            acked_at: acked_at.map(|v| v as u64),
            status: OutboxStatus::from_str(&status).unwrap_or(OutboxStatus::Failed),
            error_reason,
        })
    }

    const OUTBOX_COLUMNS: &'static str = "message_id, trade_id, peer_id, kind, message_bytes, \
         sequence_num, swap_expiry, created_at, retry_count, last_attempt_at, next_retry_at, \
         acked_at, status, error_reason";

    /// Fetch a single outbox row by id. Equivalent to scanning
    /// `pending_for_trade` for the row and reading off its `retry_count`,
    /// but direct rather than incidental.
    pub fn get_outbox(&self, message_id: Uuid) -> Result<Option<OutboxRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM message_outbox WHERE message_id = ?1",
            Self::OUTBOX_COLUMNS
        );
        conn.query_row(&sql, params![message_id.to_string()], Self::row_from_sql)
            .optional()
            .map_err(Error::from)
    }

    /// Up to 100 rows where status is non-terminal and due, ordered
    /// ascending by `next_retry_at`.
    pub fn pending_due(&self, now: u64, batch_size: usize) -> Result<Vec<OutboxRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM message_outbox
             WHERE status IN ('pending', 'sent') AND next_retry_at <= ?1
             ORDER BY next_retry_at ASC LIMIT ?2",
            Self::OUTBOX_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![now as i64, batch_size as i64], Self::row_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn pending_for_peer(&self, peer_id: &PeerId) -> Result<Vec<OutboxRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM message_outbox
             WHERE peer_id = ?1 AND status NOT IN ('acked', 'failed', 'expired')
             ORDER BY sequence_num ASC",
            Self::OUTBOX_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![peer_hex(peer_id)], Self::row_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn pending_for_trade(&self, trade_id: &str) -> Result<Vec<OutboxRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM message_outbox
             WHERE trade_id = ?1 AND status NOT IN ('acked', 'failed', 'expired')
             ORDER BY sequence_num ASC",
            Self::OUTBOX_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![trade_id], Self::row_from_sql)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn has_received(&self, message_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<String> = conn
            .query_row(
                "SELECT message_id FROM message_inbox WHERE message_id = ?1",
                params![message_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert-or-ignore into the inbox.
    pub fn record_received(&self, row: &InboxRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO message_inbox
                (message_id, trade_id, sender_peer_id, kind, sequence_num,
                 received_at, processed_at, ack_sent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.message_id.to_string(),
                row.trade_id,
                peer_hex(&row.sender_peer_id),
                kind_to_wire(row.kind),
                row.sequence_num.map(|v| v as i64),
                row.received_at as i64,
                row.processed_at.map(|v| v as i64),
                row.ack_sent as i64,
            ],
        )?;
        Ok(())
    }

    pub fn mark_processed(&self, message_id: Uuid, now: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_inbox SET processed_at = ?1 WHERE message_id = ?2",
            params![now as i64, message_id.to_string()],
        )?;
        Ok(())
    }

    pub fn mark_ack_sent(&self, message_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE message_inbox SET ack_sent = 1 WHERE message_id = ?1",
            params![message_id.to_string()],
        )?;
        Ok(())
    }

    /// Bulk-transition non-terminal rows whose `swap_expiry <= now +
    /// guard_seconds` to `expired`. Returns the number of rows affected.
    pub fn expire_due(&self, now: u64, guard_seconds: u64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let threshold = now + guard_seconds;
        let affected = conn.execute(
            "UPDATE message_outbox SET status = ?1
             WHERE status NOT IN ('acked', 'failed', 'expired') AND swap_expiry <= ?2",
            params![OutboxStatus::Expired.as_str(), threshold as i64],
        )?;
        Ok(affected as u64)
    }

    /// Delete terminal outbox rows and inbox rows older than the
    /// threshold. Returns `(outbox_deleted, inbox_deleted)`.
    pub fn cleanup(&self, older_than: u64) -> Result<(u64, u64)> {
        let conn = self.conn.lock().unwrap();
        let outbox_deleted = conn.execute(
            "DELETE FROM message_outbox
             WHERE status IN ('acked', 'failed', 'expired') AND created_at < ?1",
            params![older_than as i64],
        )?;
        let inbox_deleted = conn.execute(
            "DELETE FROM message_inbox WHERE received_at < ?1",
            params![older_than as i64],
        )?;
        Ok((outbox_deleted as u64, inbox_deleted as u64))
    }

    /// Number of non-terminal outbox rows for a trade.
    pub fn pending_count(&self, trade_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM message_outbox
             WHERE trade_id = ?1 AND status NOT IN ('acked', 'failed', 'expired')",
            params![trade_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Mark every non-terminal row for a trade as failed with `reason`.
    /// Returns the number of rows transitioned.
    pub fn cancel_pending_for_trade(&self, trade_id: &str, reason: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE message_outbox SET status = ?1, error_reason = ?2
             WHERE trade_id = ?3 AND status NOT IN ('acked', 'failed', 'expired')",
            params![OutboxStatus::Failed.as_str(), reason, trade_id],
        )?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn sample_row(peer_id: PeerId, trade_id: &str, seq: u64, now: u64) -> OutboxRow {
        OutboxRow {
            message_id: Uuid::new_v4(),
            trade_id: trade_id.to_string(),
            peer_id,
            kind: MessageKind::PubkeyExchange,
            message_bytes: vec![1, 2, 3],
            sequence_num: seq,
            swap_expiry: now + 3600,
            created_at: now,
            retry_count: 0,
            last_attempt_at: None,
            next_retry_at: now,
            acked_at: None,
            status: OutboxStatus::Pending,
            error_reason: None,
        }
    }

    #[test]
    fn sequence_numbers_mint_a_gap_free_prefix() {
        let store = QueueStore::open_in_memory().unwrap();
        let seqs: Vec<u64> = (0..5)
            .map(|_| store.next_local_sequence("trade-1", 1000).unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn remote_sequence_replaces_only_if_larger() {
        let store = QueueStore::open_in_memory().unwrap();
        store.update_remote_sequence("trade-1", 5, 1000).unwrap();
        store.update_remote_sequence("trade-1", 3, 1001).unwrap();
        let row = store.get_sequence("trade-1").unwrap().unwrap();
        assert_eq!(row.remote_highest_seen, 5);
    }

    #[test]
    fn get_sequence_is_none_for_an_unseen_trade() {
        let store = QueueStore::open_in_memory().unwrap();
        assert!(store.get_sequence("never-seen").unwrap().is_none());

        store.next_local_sequence("trade-2", 1000).unwrap();
        let row = store.get_sequence("trade-2").unwrap().unwrap();
        assert_eq!(row.trade_id, "trade-2");
        assert_eq!(row.local_next_sequence, 1);
        assert_eq!(row.remote_highest_seen, 0);
    }

    #[test]
    fn pending_due_excludes_future_and_terminal_rows() {
        let store = QueueStore::open_in_memory().unwrap();
        let peer = PeerId::new([1u8; 32]);
        let mut row = sample_row(peer, "trade-1", 1, 1000);
        row.next_retry_at = 1000;
        store.enqueue(&row).unwrap();

        let mut future_row = sample_row(peer, "trade-1", 2, 1000);
        future_row.next_retry_at = 5000;
        store.enqueue(&future_row).unwrap();

        let due = store.pending_due(1000, 100).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message_id, row.message_id);

        store.mark_acked(row.message_id, 1500).unwrap();
        let due_after_ack = store.pending_due(6000, 100).unwrap();
        assert!(due_after_ack.iter().all(|r| r.message_id != row.message_id));
    }

    #[test]
    fn duplicate_message_id_is_rejected() {
        let store = QueueStore::open_in_memory().unwrap();
        let peer = PeerId::new([2u8; 32]);
        let row = sample_row(peer, "trade-1", 1, 1000);
        store.enqueue(&row).unwrap();
        let err = store.enqueue(&row).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn expire_due_transitions_rows_within_guard() {
        let store = QueueStore::open_in_memory().unwrap();
        let peer = PeerId::new([3u8; 32]);
        let mut row = sample_row(peer, "trade-1", 1, 1000);
        row.swap_expiry = 1000 + 1800; // expires in 30 minutes
        store.enqueue(&row).unwrap();

        let affected = store.expire_due(1000, 3600).unwrap(); // guard 1h
        assert_eq!(affected, 1);

        let due = store.pending_due(1000, 100).unwrap();
        assert!(due.is_empty());
    }

    #[test]
    fn inbox_idempotency_absorbs_duplicates() {
        let store = QueueStore::open_in_memory().unwrap();
        let sender = PeerId::new([4u8; 32]);
        let message_id = Uuid::new_v4();
        let inbox_row = InboxRow {
            message_id,
            trade_id: "trade-1".into(),
            sender_peer_id: sender,
            kind: MessageKind::FundingInfo,
            sequence_num: Some(1),
            received_at: 1000,
            processed_at: None,
            ack_sent: false,
        };
        assert!(!store.has_received(message_id).unwrap());
        store.record_received(&inbox_row).unwrap();
        assert!(store.has_received(message_id).unwrap());
        // Second arrival is a no-op, not an error.
        store.record_received(&inbox_row).unwrap();
    }

    #[test]
    fn get_outbox_reflects_retry_count_after_mark_sent() {
        let store = QueueStore::open_in_memory().unwrap();
        let peer = PeerId::new([6u8; 32]);
        let row = sample_row(peer, "trade-1", 1, 1000);
        store.enqueue(&row).unwrap();

        store.mark_sent(row.message_id, 1001).unwrap();
        let fetched = store.get_outbox(row.message_id).unwrap().unwrap();
        assert_eq!(fetched.retry_count, 1);
        assert_eq!(fetched.status, OutboxStatus::Sent);

        assert!(store.get_outbox(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn cancel_pending_for_trade_marks_all_non_terminal_rows_failed() {
        let store = QueueStore::open_in_memory().unwrap();
        let peer = PeerId::new([5u8; 32]);
        let row1 = sample_row(peer, "trade-1", 1, 1000);
        let row2 = sample_row(peer, "trade-1", 2, 1000);
        store.enqueue(&row1).unwrap();
        store.enqueue(&row2).unwrap();

        let affected = store.cancel_pending_for_trade("trade-1", "swap declared dead").unwrap();
        assert_eq!(affected, 2);
        assert_eq!(store.pending_count("trade-1").unwrap(), 0);
    }
}
