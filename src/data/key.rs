use serde::{Deserialize, Serialize};

/// Identity of a record within a store.
///
/// Integer keys sort before string keys, matching the order an object store
/// walks its primary keys in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    String(String),
}

impl Key {
    /// Convert a JSON scalar into a key. Fractional numbers, booleans,
    /// null and containers have no key form.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(Key::Int),
            serde_json::Value::String(s) => Some(Key::String(s.clone())),
            _ => None,
        }
    }

    /// Structural equality against a JSON value.
    pub fn matches_json(&self, value: &serde_json::Value) -> bool {
        match (self, value) {
            (Key::Int(i), serde_json::Value::Number(n)) => match n.as_i64() {
                Some(v) => v == *i,
                None => n.as_f64() == Some(*i as f64),
            },
            (Key::String(s), serde_json::Value::String(v)) => s == v,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}
