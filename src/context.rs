//! Context store threaded through a sequential run
//!
//! An insertion-ordered key/value bag. Step results that are JSON objects are
//! merged into it so later steps can see earlier output. The sequence
//! metadata keys in [`PROTECTED_KEYS`] are only ever written by the engine;
//! [`Context::merge_result`] skips them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Id of the sequential run the current step belongs to
pub const SEQUENCE_ID: &str = "sequenceId";
/// Zero-based index of the current step
pub const SEQUENCE_POSITION: &str = "sequencePosition";
/// Snapshot of every earlier step's outcome
pub const PREVIOUS_RESULTS: &str = "previousResults";

/// Keys step results may never overwrite
pub const PROTECTED_KEYS: [&str; 3] = [SEQUENCE_ID, SEQUENCE_POSITION, PREVIOUS_RESULTS];

pub fn is_protected(key: &str) -> bool {
    PROTECTED_KEYS.contains(&key)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
    #[serde(skip)]
    depth: usize,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Required keys absent from this context, in the order given
    pub fn missing_keys<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        required
            .into_iter()
            .filter(|k| !self.values.contains_key(k.as_str()))
            .cloned()
            .collect()
    }

    /// Merge the keys of an object payload, skipping protected keys.
    ///
    /// Returns the keys that were written. Non-object payloads are ignored.
    pub fn merge_result(&mut self, payload: &Value) -> Vec<String> {
        let Value::Object(fields) = payload else {
            return Vec::new();
        };
        let mut merged = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            if is_protected(key) {
                continue;
            }
            self.values.insert(key.clone(), value.clone());
            merged.push(key.clone());
        }
        merged
    }

    /// Macro re-entrancy depth this context was created at
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Copy of this context one macro level deeper
    pub fn nested(&self) -> Self {
        Self {
            values: self.values.clone(),
            depth: self.depth + 1,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Engine-side write of sequence metadata
    pub(crate) fn set_reserved(&mut self, key: &'static str, value: Value) {
        debug_assert!(is_protected(key));
        self.values.insert(key.to_string(), value);
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self { values, depth: 0 }
    }
}
