//! Query identity for data-provider
//!
//! A [`QueryValue`] is the parameter object a node is specialized with. Two query
//! values are equivalent when their canonical serialization is identical, which
//! ignores key insertion order at every nesting level. The canonical form is the
//! [`QueryKey`] used both as the cache index and as the child-identity index, so
//! `node.query(q)` called twice with structurally equal values yields the same
//! child node.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{ProviderError, ProviderResult};

/// Parameter object used to specialize a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryValue(Map<String, Value>);

impl QueryValue {
    /// Create an empty query value
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build a query value from anything serializable to a JSON object
    pub fn from_serialize<T: Serialize>(value: &T) -> ProviderResult<Self> {
        Self::try_from(serde_json::to_value(value)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// The query value as a JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Canonical key of this query value
    pub fn key(&self) -> QueryKey {
        canonical_key(Some(self))
    }

    /// Whether every key of `base` is present here with an equal value
    ///
    /// Nested objects are compared the same way, so `{"q": {"a": 1, "b": 2}}`
    /// extends `{"q": {"a": 1}}`. Any other value must match exactly.
    pub fn extends(&self, base: &QueryValue) -> bool {
        map_extends(&self.0, &base.0)
    }
}

fn map_extends(map: &Map<String, Value>, base: &Map<String, Value>) -> bool {
    base.iter().all(|(key, expected)| match (map.get(key), expected) {
        (Some(Value::Object(actual)), Value::Object(expected)) => map_extends(actual, expected),
        (Some(actual), expected) => actual == expected,
        (None, _) => false,
    })
}

impl From<Map<String, Value>> for QueryValue {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for QueryValue {
    type Error = ProviderError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(ProviderError::InvalidQuery(format!(
                "expected an object, got {other}"
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Canonical string identity of a query value
///
/// The empty key is reserved for "no query" and designates the node itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    /// Key designating the node itself rather than a child
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonicalize a query value into its key
///
/// `None` maps to the root key. Object keys are emitted in sorted order at every
/// level, so the result does not depend on insertion order (nor on whether
/// `serde_json` was built with `preserve_order`).
pub fn canonical_key(query: Option<&QueryValue>) -> QueryKey {
    match query {
        None => QueryKey::root(),
        Some(query) => {
            let mut out = String::new();
            write_canonical_map(&query.0, &mut out);
            QueryKey(out)
        }
    }
}

fn write_canonical_map(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        // Serializing a string never fails
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        if let Some(value) = map.get(key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_map(map, out),
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Strategy deciding the query value of a child when `query()` is called on an
/// already specialized node: `(current, incoming) -> merged`
pub type QueryMergeFn = Arc<dyn Fn(&QueryValue, &QueryValue) -> QueryValue + Send + Sync>;

/// Default merge policy: incoming keys shallowly override the current ones
pub fn shallow_merge(current: &QueryValue, incoming: &QueryValue) -> QueryValue {
    let mut merged = current.clone();
    for (key, value) in incoming.iter() {
        merged.0.insert(key.clone(), value.clone());
    }
    merged
}

/// Merge policy that shallow-merges the given object-valued keys independently
///
/// Useful for adapters whose queries carry sub-objects such as `queryString` or
/// `urlParams`, where a later `query()` should add parameters instead of replacing
/// the whole sub-object.
pub fn nested_merge(nested_keys: &[&str]) -> QueryMergeFn {
    let nested_keys: Vec<String> = nested_keys.iter().map(|key| key.to_string()).collect();
    Arc::new(move |current: &QueryValue, incoming: &QueryValue| {
        let mut merged = shallow_merge(current, incoming);
        for key in &nested_keys {
            if let (Some(Value::Object(old)), Some(Value::Object(new))) =
                (current.get(key), incoming.get(key))
            {
                let mut combined = old.clone();
                for (k, v) in new {
                    combined.insert(k.clone(), v.clone());
                }
                merged.0.insert(key.clone(), Value::Object(combined));
            }
        }
        merged
    })
}

pub(crate) fn default_merge() -> QueryMergeFn {
    Arc::new(shallow_merge)
}
