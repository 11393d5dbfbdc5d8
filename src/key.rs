//! # Query keys and their canonical hash.
//!
//! A [`QueryKey`] is an ordered list of JSON values supplied by the caller. Keys do
//! not need to be normalized: two keys that are deeply equal after sorting every
//! object's fields produce the same [`QueryHash`].
//!
//! ## Rules
//! - Objects are normalized recursively: fields sorted lexicographically at every level.
//! - Arrays keep positional order (order is meaningful for keys).
//! - Scalars serialize by value.
//!
//! ## Example
//! ```rust
//! use queryvisor::QueryKey;
//! use serde_json::json;
//!
//! let a = QueryKey::new().part("todos").part(json!({ "page": 1, "done": false }));
//! let b = QueryKey::new().part("todos").part(json!({ "done": false, "page": 1 }));
//! assert_eq!(a.hash(), b.hash());
//! assert_eq!(a.hash().as_str(), r#"["todos",{"done":false,"page":1}]"#);
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::KeyError;

/// Caller-supplied structured identifier of a cacheable fetch.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    /// Creates an empty key.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a part convertible into a JSON value.
    pub fn part(mut self, part: impl Into<Value>) -> Self {
        self.0.push(part.into());
        self
    }

    /// Appends any serializable part.
    ///
    /// Fails when the value cannot be represented as JSON (e.g. a map with non-string keys).
    pub fn try_part<S: Serialize + ?Sized>(mut self, part: &S) -> Result<Self, KeyError> {
        self.0.push(serde_json::to_value(part)?);
        Ok(self)
    }

    /// Returns the key parts in order.
    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Computes the canonical hash of this key.
    pub fn hash(&self) -> QueryHash {
        hash_key(self)
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        Self(parts)
    }
}

impl FromIterator<Value> for QueryKey {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Canonical string form of a [`QueryKey`], used as the cache lookup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHash(String);

impl QueryHash {
    /// Returns the hash as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Hashes a key: recursive field sort, then compact JSON.
pub fn hash_key(key: &QueryKey) -> QueryHash {
    let normalized = Value::Array(key.0.iter().map(normalize).collect());
    QueryHash(normalized.to_string())
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut sorted: Vec<(&String, &Value)> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));

            let mut out = Map::with_capacity(sorted.len());
            for (name, inner) in sorted {
                out.insert(name.clone(), normalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn field_order_does_not_matter() {
        let a = QueryKey::from(vec![json!("user"), json!({"id": 1, "meta": {"z": 1, "a": 2}})]);
        let b = QueryKey::from(vec![json!("user"), json!({"meta": {"a": 2, "z": 1}, "id": 1})]);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(
            a.hash().as_str(),
            r#"["user",{"id":1,"meta":{"a":2,"z":1}}]"#
        );
    }

    #[test]
    fn array_order_matters() {
        let a = QueryKey::new().part(json!([1, 2, 3]));
        let b = QueryKey::new().part(json!([3, 2, 1]));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn objects_inside_arrays_are_normalized() {
        let a = QueryKey::new().part(json!([{"b": 1, "a": 2}, null]));
        let b = QueryKey::new().part(json!([{"a": 2, "b": 1}, null]));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn scalars_serialize_by_value() {
        let key = QueryKey::new()
            .part("todos")
            .part(7)
            .part(true)
            .part(Value::Null)
            .part(1.5);
        assert_eq!(key.hash().to_string(), r#"["todos",7,true,null,1.5]"#);
        assert_ne!(
            QueryKey::new().part("1").hash(),
            QueryKey::new().part(1).hash()
        );
    }

    #[test]
    fn try_part_serializes_structs() {
        #[derive(Serialize)]
        struct Filter {
            status: &'static str,
            page: u32,
        }

        let key = QueryKey::new()
            .part("todos")
            .try_part(&Filter {
                status: "open",
                page: 2,
            })
            .unwrap();
        assert_eq!(key.hash().as_str(), r#"["todos",{"page":2,"status":"open"}]"#);
    }

    #[test]
    fn try_part_rejects_non_string_map_keys() {
        let mut bad: HashMap<(u8, u8), u8> = HashMap::new();
        bad.insert((1, 2), 3);
        let err = QueryKey::new().try_part(&bad).unwrap_err();
        assert_eq!(err.as_label(), "key_serialize");
    }

    proptest! {
        #[test]
        fn insertion_order_never_changes_hash(
            fields in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..8)
        ) {
            let forward: Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: Map<String, Value> =
                fields.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

            let a = QueryKey::new().part("scope").part(Value::Object(forward));
            let b = QueryKey::new().part("scope").part(Value::Object(backward));
            prop_assert_eq!(a.hash(), b.hash());
        }

        #[test]
        fn distinct_values_produce_distinct_hashes(x in any::<i64>(), y in any::<i64>()) {
            prop_assume!(x != y);
            let a = QueryKey::new().part(json!({"id": x}));
            let b = QueryKey::new().part(json!({"id": y}));
            prop_assert_ne!(a.hash(), b.hash());
        }
    }
}
