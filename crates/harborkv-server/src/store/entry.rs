use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Fixed per-entry overhead charged against the memory cap, on top of the
/// payload bytes (map slot, lock, expiry bookkeeping).
pub const ENTRY_OVERHEAD_BYTES: u64 = 64;

/// The closed set of value shapes a key can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Int(i64),
    List(VecDeque<String>),
    Set(HashSet<String>),
    SortedSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::Hash(_) => "hash",
        }
    }

    /// Parse a wire string into the tightest variant: integers become `Int`.
    pub fn adapt(raw: &str) -> Value {
        match raw.parse::<i64>() {
            Ok(n) => Value::Int(n),
            Err(_) => Value::Str(raw.to_string()),
        }
    }

    /// Render the value back as a wire string for bulk replies.
    pub fn as_wire_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// True for a container variant holding no elements.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::SortedSet(z) => z.is_empty(),
            Value::Hash(h) => h.is_empty(),
            _ => false,
        }
    }

    pub fn payload_bytes(&self) -> u64 {
        match self {
            Value::Str(s) => s.len() as u64,
            Value::Int(_) => 8,
            Value::List(l) => l.iter().map(|s| s.len() as u64 + 8).sum(),
            Value::Set(s) => s.iter().map(|m| m.len() as u64 + 8).sum(),
            Value::SortedSet(z) => z.keys().map(|m| m.len() as u64 + 16).sum(),
            Value::Hash(h) => h.iter().map(|(k, v)| (k.len() + v.len()) as u64 + 8).sum(),
        }
    }
}

/// A stored value plus its per-key metadata. `expires_at_ms == 0` means the
/// key never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub value: Value,
    pub expires_at_ms: u64,
}

impl KeyEntry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at_ms: 0,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }

    pub fn has_expiry(&self) -> bool {
        self.expires_at_ms != 0
    }
}

pub fn entry_size_bytes(key: &str, entry: &KeyEntry) -> u64 {
    key.len() as u64 + entry.value.payload_bytes() + ENTRY_OVERHEAD_BYTES
}
