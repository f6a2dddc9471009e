//! Update batching and delivery.

mod batch;
mod outbox;

pub use batch::{FlushBatch, FlushReason, PendingBatch, UpdateBatcher, UpdateMessage};
pub(crate) use outbox::{erase_queued_changes, jettison_queued};
pub use outbox::{ChannelOutbox, Outbound, Outbox, QueueOutbox};
