//! Structurally shared subscriber sets.
//!
//! - [`SubscriberSet`]: immutable session → count record
//! - [`SubscriberSetPool`]: hash-consing, LRU-bounded cache producing them

pub mod set_pool;
pub mod subscriber_set;

pub use set_pool::{PoolStats, SubscriberSetPool};
pub use subscriber_set::{SubscriberSet, SubscriberSetRef};
