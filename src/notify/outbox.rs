//! Session-side delivery of flushed batches.
//!
//! The reflector never touches sockets; every session hands it an
//! [`Outbox`] and whatever drains that outbox (a network writer, a test) is
//! outside this crate.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::batch::UpdateMessage;
use crate::error::{ReflectError, Result};
use crate::payload::Payload;

/// Anything queued for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outbound {
    Update(UpdateMessage),
    /// A request the reflector could not handle, sent back to its sender
    Unimplemented { code: u32 },
    /// Answer to a ping, echoing whatever the ping carried
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },
}

impl Outbound {
    pub fn as_update(&self) -> Option<&UpdateMessage> {
        match self {
            Self::Update(m) => Some(m),
            Self::Unimplemented { .. } | Self::Pong { .. } => None,
        }
    }
}

pub trait Outbox: Send + fmt::Debug {
    fn enqueue(&mut self, message: Outbound) -> Result<()>;

    /// Messages queued but not yet transmitted, if this outbox can expose
    /// them. Superseding updates erase stale entries from here.
    fn queued_mut(&mut self) -> Option<&mut VecDeque<Outbound>> {
        None
    }
}

/// In-memory queue that keeps everything until drained.
#[derive(Debug, Default)]
pub struct QueueOutbox {
    queue: VecDeque<Outbound>,
}

impl QueueOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outbound> {
        self.queue.iter()
    }

    pub fn drain(&mut self) -> Vec<Outbound> {
        self.queue.drain(..).collect()
    }
}

impl Outbox for QueueOutbox {
    fn enqueue(&mut self, message: Outbound) -> Result<()> {
        self.queue.push_back(message);
        Ok(())
    }

    fn queued_mut(&mut self) -> Option<&mut VecDeque<Outbound>> {
        Some(&mut self.queue)
    }
}

/// Forwards to a tokio channel; what's been sent can no longer be revised.
#[derive(Debug)]
pub struct ChannelOutbox {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelOutbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Outbox for ChannelOutbox {
    fn enqueue(&mut self, message: Outbound) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| ReflectError::NotFound("session channel closed".to_string()))
    }
}

/// Remove every queued change for `path`, dropping messages left empty.
/// Returns the number of payloads erased.
pub(crate) fn erase_queued_changes(outbox: &mut dyn Outbox, path: &str) -> usize {
    let Some(queue) = outbox.queued_mut() else {
        return 0;
    };
    let mut erased = 0;
    queue.retain_mut(|msg| match msg {
        Outbound::Update(update) => {
            erased += update.erase_changes(path);
            !update.is_empty()
        }
        Outbound::Unimplemented { .. } | Outbound::Pong { .. } => true,
    });
    erased
}

/// Drop queued changed payloads and removed paths `selected` picks,
/// dropping messages left empty. Returns the number of items dropped.
pub(crate) fn jettison_queued(
    outbox: &mut dyn Outbox,
    selected: &mut dyn FnMut(&str, Option<&Payload>) -> bool,
) -> usize {
    let Some(queue) = outbox.queued_mut() else {
        return 0;
    };
    let mut dropped = 0;
    queue.retain_mut(|msg| match msg {
        Outbound::Update(update) => {
            dropped += update.jettison(&mut *selected);
            !update.is_empty()
        }
        Outbound::Unimplemented { .. } | Outbound::Pong { .. } => true,
    });
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(path: &str, v: i64) -> Outbound {
        let mut m = UpdateMessage::default();
        m.changed.insert(path.to_string(), vec![Payload::new(json!({"v": v}))]);
        Outbound::Update(m)
    }

    #[test]
    fn test_queue_outbox_erases_superseded() {
        let mut out = QueueOutbox::new();
        out.enqueue(update("/a", 1)).unwrap();
        out.enqueue(update("/b", 1)).unwrap();
        out.enqueue(Outbound::Unimplemented { code: 7 }).unwrap();
        assert_eq!(erase_queued_changes(&mut out, "/a"), 1);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.as_update().is_none_or(|u| !u.changed.contains_key("/a"))));
    }

    #[test]
    fn test_jettison_drops_emptied_messages_only() {
        let mut out = QueueOutbox::new();
        out.enqueue(update("/h/s/a", 1)).unwrap();
        out.enqueue(Outbound::Pong { payload: None }).unwrap();
        let mut mixed = UpdateMessage::default();
        mixed.changed.insert("/h/s/b".into(), vec![Payload::new(json!({"v": 2}))]);
        mixed.removed.push("/h/s/a".into());
        out.enqueue(Outbound::Update(mixed)).unwrap();

        let dropped = jettison_queued(&mut out, &mut |path, _| path == "/h/s/a");
        assert_eq!(dropped, 2);
        assert_eq!(out.len(), 2);
        let kept = out.drain();
        assert_eq!(kept[0], Outbound::Pong { payload: None });
        let last = kept[1].as_update().unwrap();
        assert!(last.changed.contains_key("/h/s/b"));
        assert!(last.removed.is_empty());
    }

    #[tokio::test]
    async fn test_channel_outbox_delivers_in_order() {
        let (mut out, mut rx) = ChannelOutbox::new();
        out.enqueue(update("/a", 1)).unwrap();
        out.enqueue(update("/a", 2)).unwrap();
        // Channel outboxes can't be revised
        assert_eq!(erase_queued_changes(&mut out, "/a"), 0);
        assert_eq!(rx.recv().await, Some(update("/a", 1)));
        assert_eq!(rx.recv().await, Some(update("/a", 2)));
    }

    #[test]
    fn test_closed_channel_reports_error() {
        let (mut out, rx) = ChannelOutbox::new();
        drop(rx);
        assert!(out.enqueue(update("/a", 1)).is_err());
    }

    #[test]
    fn test_bounce_serializes_with_kind_tag() {
        let json = serde_json::to_value(Outbound::Unimplemented { code: 42 }).unwrap();
        assert_eq!(json, json!({"kind": "unimplemented", "code": 42}));
        let pong = Outbound::Pong { payload: Some(Payload::new(json!({"seq": 3}))) };
        assert_eq!(serde_json::to_value(pong).unwrap(), json!({"kind": "pong", "payload": {"seq": 3}}));
    }
}
