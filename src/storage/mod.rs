//! Durable outbox/inbox/sequence storage for the swap messaging core.

pub mod queue_store;

pub use queue_store::{InboxRow, OutboxRow, OutboxStatus, QueueStore, SequenceRow};
