//! Plain data describing databases, tables, indexes and records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single stored object. Records are flat key/value maps; the only
/// structure imposed on them is the table's key path.
pub type Record = serde_json::Map<String, Value>;

/// One entry of the platform's database enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u32,
}

/// Snapshot of a database, taken from a connection just before it is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
    pub version: u32,
    pub tables: Vec<String>,
}

impl Database {
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.iter().any(|table| table == name)
    }
}

/// Definition of a secondary index over one field of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIndex {
    pub field_name: String,
    pub unique: bool,
    /// Carried for the table form only. IndexedDB has no notion of an
    /// auto-incrementing secondary index, so this is never sent to the
    /// platform.
    pub auto_increment: bool,
}

impl FieldIndex {
    pub fn new(field_name: impl Into<String>) -> Self {
        FieldIndex {
            field_name: field_name.into(),
            ..FieldIndex::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Description of an existing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub key_path: KeyPath,
    pub auto_increment: bool,
    pub indexes: Vec<String>,
}

/// The path to the key in a table.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum KeyPath {
    /// Keys are stored *out-of-line*.
    None,
    /// The path to the single key.
    Single(String),
    /// The paths to all the parts of the key.
    Multi(Vec<String>),
}

impl KeyPath {
    /// Reads the key of `record`, if the record carries every part of it.
    pub fn extract(&self, record: &Record) -> Option<Value> {
        match self {
            KeyPath::None => None,
            KeyPath::Single(path) => record.get(path).cloned(),
            KeyPath::Multi(paths) => paths
                .iter()
                .map(|path| record.get(path).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Whether `field` is (part of) this key path.
    pub fn contains(&self, field: &str) -> bool {
        match self {
            KeyPath::None => false,
            KeyPath::Single(path) => path == field,
            KeyPath::Multi(paths) => paths.iter().any(|path| path == field),
        }
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(inner: Vec<String>) -> KeyPath {
        KeyPath::Multi(inner)
    }
}

impl<S> From<&[S]> for KeyPath
where
    S: AsRef<str>,
{
    fn from(inner: &[S]) -> KeyPath {
        KeyPath::Multi(inner.iter().map(|s| s.as_ref().to_owned()).collect())
    }
}

impl From<String> for KeyPath {
    fn from(inner: String) -> KeyPath {
        if inner.is_empty() {
            KeyPath::None
        } else {
            KeyPath::Single(inner)
        }
    }
}

impl<'a> From<&'a str> for KeyPath {
    fn from(inner: &'a str) -> KeyPath {
        KeyPath::from(inner.to_owned())
    }
}

impl From<()> for KeyPath {
    fn from((): ()) -> KeyPath {
        KeyPath::None
    }
}

#[cfg(test)]
mod test {
    use super::{KeyPath, Record};
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn extract_single() {
        let rec = record(json!({"id": 3, "name": "x"}));
        assert_eq!(KeyPath::from("id").extract(&rec), Some(json!(3)));
        assert_eq!(KeyPath::from("missing").extract(&rec), None);
        assert_eq!(KeyPath::None.extract(&rec), None);
    }

    #[test]
    fn extract_multi_needs_every_part() {
        let rec = record(json!({"a": 1, "b": "two"}));
        let both = KeyPath::from(&["a", "b"][..]);
        assert_eq!(both.extract(&rec), Some(json!([1, "two"])));

        let partial = KeyPath::from(&["a", "c"][..]);
        assert_eq!(partial.extract(&rec), None);
    }

    #[test]
    fn empty_string_is_out_of_line() {
        assert_eq!(KeyPath::from(""), KeyPath::None);
        assert!(KeyPath::from("id").contains("id"));
        assert!(!KeyPath::None.contains("id"));
    }
}
