//! # Reflect Engine
//!
//! The core of a message-reflection server: clients keep data in a shared
//! hierarchical namespace, subscribe to wildcard patterns over it, and get
//! batched notifications as matching nodes are created, changed, reordered
//! or removed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Reflector                           │
//! │  • One per server, passed around explicitly                │
//! │  • Dispatches client Commands on behalf of a session       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  NodeTree  (/host/session/...)              │
//! │  • Arena of named nodes, optional ordered child index      │
//! │  • Every node carries a shared SubscriberSet               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ TreeObserver
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Notification pipeline                     │
//! │  • Per-session PathMatcher decides relevance + filters     │
//! │  • UpdateBatcher: ceiling, ordering flushes, supersede     │
//! │  • Outbox per session (queue or tokio channel)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SubscriberSetPool                        │
//! │  • Hash-consed sets: equal content, one allocation         │
//! │  • LRU-bounded cache                                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use reflect_engine::{Command, QueueOutbox, Reflector, ReflectorConfig, SessionId};
//! use serde_json::json;
//!
//! let mut reflector = Reflector::new(ReflectorConfig::default());
//! reflector.attach(SessionId::from("writer"), Some("hostA"), Box::new(QueueOutbox::new())).unwrap();
//! reflector.attach(SessionId::from("reader"), Some("hostB"), Box::new(QueueOutbox::new())).unwrap();
//!
//! let subscribe = serde_json::from_value(json!({"op": "subscribe", "pattern": "chat/*"})).unwrap();
//! reflector.execute("reader", subscribe).unwrap();
//!
//! let post = serde_json::from_value::<Command>(json!({
//!     "op": "set_node",
//!     "path": "chat/1",
//!     "payload": {"text": "hello"}
//! }))
//! .unwrap();
//! reflector.execute("writer", post).unwrap();
//!
//! let out = reflector.take_outgoing("reader");
//! assert!(out[0].as_update().unwrap().changed.contains_key("/hostA/writer/chat/1"));
//! ```
//!
//! ## Modules
//!
//! - [`reflector`]: The [`Reflector`] and its client-facing operations
//! - [`tree`]: The namespace and its ordered indexes
//! - [`pool`]: Shared subscriber sets
//! - [`matcher`]: Wildcard patterns, registries and traversal
//! - [`notify`]: Update batching and delivery
//! - [`filter`]: Payload predicates

pub mod config;
pub mod error;
pub mod filter;
pub mod matcher;
pub mod metrics;
pub mod notify;
pub mod payload;
pub mod pool;
pub mod reflector;
pub mod session_id;
pub mod set_options;
pub mod tree;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::ReflectorConfig;
pub use error::{ReflectError, Result};
pub use filter::{FieldOperator, FilterValue, QueryFilter};
pub use matcher::{PathMatcher, PathPattern, PutOutcome, SubscriptionRegistry, TraversalMode, Visit};
pub use notify::{ChannelOutbox, FlushReason, Outbound, Outbox, QueueOutbox, UpdateBatcher, UpdateMessage};
pub use payload::Payload;
pub use pool::{PoolStats, SubscriberSet, SubscriberSetPool, SubscriberSetRef};
pub use reflector::{Command, CommandOutcome, Reflector, ReflectorHooks, SessionInfo};
pub use session_id::SessionId;
pub use set_options::SetNodeFlags;
pub use tree::{IndexOp, NodeId, NodeTree};
pub use metrics::LatencyTimer;
