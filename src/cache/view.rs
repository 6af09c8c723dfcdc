//! Read-only JSON views
//!
//! Payloads handed out by the caches are [`View`]s: structurally shared,
//! immutable copies of decoded API responses. Callers that need to edit a
//! payload must ask for an owned tree with [`thaw`].

use std::fmt;
use std::sync::Arc;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

use super::error::{CacheError, Result};

/// Immutable JSON tree
///
/// Containers are reference counted, so cloning a view is cheap and every
/// clone observes the same data. Mapping entries keep the order they had in
/// the source document.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum View {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(Arc<str>),
    Sequence(Arc<[View]>),
    Mapping(Arc<[(String, View)]>),
}

/// Converts any serializable value into a frozen view
///
/// Fails with [`CacheError::UnsupportedType`] when the value has no JSON
/// representation (for example a map keyed by something other than strings).
pub fn freeze<T: Serialize + ?Sized>(value: &T) -> Result<View> {
    let tree = serde_json::to_value(value).map_err(|e| CacheError::UnsupportedType(e.to_string()))?;
    Ok(View::from(tree))
}

/// Converts a view back into a plain, mutable JSON tree
pub fn thaw(view: &View) -> Value {
    match view {
        View::Null => Value::Null,
        View::Bool(b) => Value::Bool(*b),
        View::Number(n) => Value::Number(n.clone()),
        View::String(s) => Value::String(s.to_string()),
        View::Sequence(items) => Value::Array(items.iter().map(thaw).collect()),
        View::Mapping(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), thaw(value)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

impl From<Value> for View {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => View::Null,
            Value::Bool(b) => View::Bool(b),
            Value::Number(n) => View::Number(n),
            Value::String(s) => View::String(s.into()),
            Value::Array(items) => {
                View::Sequence(items.into_iter().map(View::from).collect::<Vec<_>>().into())
            }
            Value::Object(map) => View::Mapping(
                map.into_iter()
                    .map(|(key, value)| (key, View::from(value)))
                    .collect::<Vec<_>>()
                    .into(),
            ),
        }
    }
}

impl From<&Value> for View {
    fn from(value: &Value) -> Self {
        View::from(value.clone())
    }
}

impl View {
    /// Looks up a key in a mapping
    pub fn get(&self, key: &str) -> Option<&View> {
        match self {
            View::Mapping(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Looks up a position in a sequence
    pub fn at(&self, index: usize) -> Option<&View> {
        match self {
            View::Sequence(items) => items.get(index),
            _ => None,
        }
    }

    /// Navigates with a JSON pointer (`/stats/seasonStatLinks/0/TotwRoundsLink`)
    pub fn pointer(&self, pointer: &str) -> Option<&View> {
        if pointer.is_empty() {
            return Some(self);
        }
        let rest = pointer.strip_prefix('/')?;
        rest.split('/')
            .map(|token| token.replace("~1", "/").replace("~0", "~"))
            .try_fold(self, |node, token| match node {
                View::Mapping(_) => node.get(&token),
                View::Sequence(_) => token.parse::<usize>().ok().and_then(|i| node.at(i)),
                _ => None,
            })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            View::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            View::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            View::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            View::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            View::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, View::Null)
    }

    /// Items of a sequence; empty for every other node
    pub fn items(&self) -> &[View] {
        match self {
            View::Sequence(items) => items,
            _ => &[],
        }
    }

    /// Entries of a mapping in document order; empty for every other node
    pub fn entries(&self) -> impl Iterator<Item = (&str, &View)> {
        let entries: &[(String, View)] = match self {
            View::Mapping(entries) => entries,
            _ => &[],
        };
        entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of children of a container, zero for scalars
    pub fn len(&self) -> usize {
        match self {
            View::Sequence(items) => items.len(),
            View::Mapping(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a value that upstream sends either as a number or a numeric string
    pub fn as_lenient_u64(&self) -> Option<u64> {
        match self {
            View::Number(n) => n.as_u64(),
            View::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Serialize for View {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            View::Null => serializer.serialize_unit(),
            View::Bool(b) => serializer.serialize_bool(*b),
            View::Number(n) => n.serialize(serializer),
            View::String(s) => serializer.serialize_str(s),
            View::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            View::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries.iter() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}
