//! Payload data structure.
//!
//! A [`Payload`] is the opaque content blob stored on every node. It wraps a
//! JSON object behind an [`Arc`] so that nodes, pending update batches and
//! outgoing messages all share one allocation. Two payloads can be compared
//! by reference ([`Payload::ptr_eq`]) or by content (`==`).

use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Shared, immutable node content.
///
/// # Example
///
/// ```
/// use reflect_engine::Payload;
/// use serde_json::json;
///
/// let p = Payload::new(json!({"status": "ready", "count": 3}));
/// let q = p.clone();
///
/// assert!(p.ptr_eq(&q));
/// assert_eq!(p.get("status"), Some(&json!("ready")));
/// assert!(Payload::empty().is_empty());
/// ```
#[derive(Clone)]
pub struct Payload(Arc<Value>);

fn empty_value() -> &'static Arc<Value> {
    static EMPTY: OnceLock<Arc<Value>> = OnceLock::new();
    EMPTY.get_or_init(|| Arc::new(Value::Object(Map::new())))
}

impl Payload {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// The shared empty payload given to intermediate nodes.
    pub fn empty() -> Self {
        Self(Arc::clone(empty_value()))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Look up a top-level field. Non-object payloads have no fields.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.as_object().and_then(|m| m.get(field))
    }

    /// Number of top-level fields (0 for non-objects).
    pub fn field_count(&self) -> usize {
        self.0.as_object().map_or(0, Map::len)
    }

    pub fn is_empty(&self) -> bool {
        match self.0.as_ref() {
            Value::Object(m) => m.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    /// Reference equality: both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// A payload holding the nested object under `field`, if there is one.
    pub fn sub_payload(&self, field: &str) -> Option<Payload> {
        match self.get(field) {
            Some(v @ Value::Object(_)) => Some(Payload::new(v.clone())),
            _ => None,
        }
    }

    /// Approximate in-memory size, used for batch accounting.
    pub fn size_bytes(&self) -> usize {
        serde_json::to_string(self.0.as_ref()).map_or(0, |s| s.len())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Payload({})", self.0)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Payload::new)
    }
}
