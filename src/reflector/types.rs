//! Public types for the reflector.

use serde::{Deserialize, Serialize};

use crate::filter::QueryFilter;
use crate::payload::Payload;
use crate::session_id::SessionId;
use crate::set_options::SetNodeFlags;
use crate::tree::IndexOp;

/// Snapshot of one attached session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub host: String,
    /// Absolute path of the session anchor, `/host/id`
    pub path: String,
    /// Nodes this session currently owns (anchor excluded)
    pub node_count: u32,
    pub max_nodes: u32,
    pub subscription_count: usize,
    pub reflect_to_self: bool,
    pub subscriptions_enabled: bool,
}

/// Synchronous callbacks for server-side observers of the namespace.
///
/// Called after the change is committed, before any session is notified.
pub trait ReflectorHooks: Send {
    fn on_node_created(&mut self, _path: &str, _payload: &Payload) {}

    /// `old` is `None` for a node's first payload.
    fn on_node_changed(&mut self, _path: &str, _old: Option<&Payload>, _new: &Payload) {}

    fn on_node_index_changed(&mut self, _path: &str, _op: &IndexOp) {}
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SetNode {
        path: String,
        payload: Payload,
        #[serde(default)]
        flags: SetNodeFlags,
    },
    RemoveNodes {
        pattern: String,
        #[serde(default)]
        filter: Option<QueryFilter>,
        #[serde(default)]
        quiet: bool,
    },
    InsertOrdered {
        pattern: String,
        payload: Payload,
        #[serde(default)]
        before: Option<String>,
    },
    Reorder {
        pattern: String,
        #[serde(default)]
        before: Option<String>,
    },
    Subscribe {
        pattern: String,
        #[serde(default)]
        filter: Option<QueryFilter>,
        #[serde(default)]
        quiet: bool,
    },
    /// Drops every registered pattern whose text `pattern` matches
    Unsubscribe {
        pattern: String,
    },
    /// One-off query answered straight to the requester
    GetData {
        pattern: String,
        #[serde(default)]
        filter: Option<QueryFilter>,
    },
    /// Drop not-yet-delivered results; no pattern drops them all
    JettisonResults {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        filter: Option<QueryFilter>,
    },
    Ping {
        #[serde(default)]
        payload: Option<Payload>,
    },
    /// Sub-commands run in order; one failing does not stop the rest
    Batch {
        commands: Vec<Command>,
    },
    /// Anything this reflector does not implement
    Unknown {
        code: u32,
    },
}

impl Command {
    /// Name used for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetNode { .. } => "set_node",
            Self::RemoveNodes { .. } => "remove_nodes",
            Self::InsertOrdered { .. } => "insert_ordered",
            Self::Reorder { .. } => "reorder",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetData { .. } => "get_data",
            Self::JettisonResults { .. } => "jettison_results",
            Self::Ping { .. } => "ping",
            Self::Batch { .. } => "batch",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// What a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Number of nodes or registrations touched
    Applied { affected: usize },
    /// Per-sub-command results, in order
    Batch(Vec<crate::Result<CommandOutcome>>),
    /// Sent back to the client as unimplemented
    Bounced { code: u32 },
}
