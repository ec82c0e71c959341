//! Structured log fields
//!
//! A [`Fields`] map is the unit every stage of the chain works with: tags
//! arrive as one, the duration producer returns one, and the logger receives
//! one per record.

use serde::Serialize;
use serde_json::Value;
use std::collections::btree_map::{self, BTreeMap};

/// Field names the interceptor chain writes itself
///
/// Values under these keys always come from the chain, even when a tag or a
/// custom duration producer supplies the same key.
pub mod keys {
    /// Full method name, e.g. `/pkg.Service/Method`
    pub const METHOD: &str = "grpc.method";
    /// Service part of the full method name
    pub const SERVICE: &str = "grpc.service";
    /// Method part of the full method name
    pub const METHOD_NAME: &str = "grpc.method_name";
    /// `unary`, `client_stream`, `server_stream` or `bidi_stream`
    pub const METHOD_TYPE: &str = "grpc.method_type";
    /// Terminal status code name
    pub const CODE: &str = "grpc.code";
    /// Severity chosen for the summary record
    pub const SEVERITY: &str = "grpc.severity";
    /// Status message of a failed call
    pub const ERROR: &str = "grpc.error";

    /// `request` or `response` on payload records
    pub const PAYLOAD: &str = "grpc.payload";
    /// Rendered request message
    pub const REQUEST_CONTENT: &str = "grpc.request.content";
    /// Rendered response message
    pub const RESPONSE_CONTENT: &str = "grpc.response.content";
    /// Set when payload content was cut to the size limit
    pub const PAYLOAD_TRUNCATED: &str = "grpc.payload.truncated";

    /// Default elapsed-time field, in milliseconds
    pub const TIME_MS: &str = "grpc.time_ms";
    /// Elapsed-time field used by the seconds producer
    pub const TIME_S: &str = "grpc.time_s";

    /// Keys reserved for the summary record
    pub const RESERVED: &[&str] = &[METHOD, SERVICE, METHOD_NAME, METHOD_TYPE, CODE, SEVERITY, ERROR];
}

/// Mapping of field name to serializable value
///
/// Keys are unique. Inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
    /// Create an empty field map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, replacing any previous value under the same key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a field value as a string slice
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Copy every field of `other` into `self`; `other` wins on collisions
    pub fn extend(&mut self, other: &Fields) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Copy only the fields of `other` whose keys are absent from `self`
    pub fn merge_missing(&mut self, other: &Fields) {
        for (key, value) in &other.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    /// Iterate over fields in key order
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map holds no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let mut fields = Fields::new();
        fields.insert("peer.address", "10.0.0.1:5000");
        fields.insert("peer.address", "10.0.0.2:5000");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get_str("peer.address"), Some("10.0.0.2:5000"));
    }

    #[test]
    fn test_extend_later_wins() {
        let mut base = Fields::new().with("a", 1).with("b", 2);
        let other = Fields::new().with("b", 3).with("c", 4);
        base.extend(&other);
        assert_eq!(base.get("b"), Some(&Value::from(3)));
        assert_eq!(base.len(), 3);
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut base = Fields::new().with("a", 1);
        base.merge_missing(&Fields::new().with("a", 9).with("z", 0));
        assert_eq!(base.get("a"), Some(&Value::from(1)));
        assert!(base.contains_key("z"));
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let fields: Fields = [("grpc.code", "OK")].into_iter().collect();
        assert_eq!(serde_json::to_string(&fields).unwrap(), r#"{"grpc.code":"OK"}"#);
    }
}
