use std::{cmp::Ordering, collections::BTreeMap};

use serde_json::Value;

use crate::{
    error::{Error, Result},
    schema::{FieldIndex, KeyPath, Record},
};

/// A primary or index key, ordered the way IndexedDB orders keys:
/// numbers before strings before arrays.
#[derive(Debug, Clone)]
pub(crate) enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    pub(crate) fn from_value(value: &Value) -> Result<Key> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(Key::Number)
                .ok_or_else(|| data_error(value)),
            Value::String(s) => Ok(Key::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Result<Vec<_>>>()
                .map(Key::Array),
            _ => Err(data_error(value)),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Key::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                Value::from(*n as i64)
            }
            Key::Number(n) => Value::from(*n),
            Key::String(s) => Value::from(s.as_str()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

/// The largest key a key generator hands out.
const MAX_GENERATED_KEY: u64 = 1 << 53;

fn data_error(value: &Value) -> Error {
    Error::Platform(format!("DataError: {value} is not a valid key"))
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

#[derive(Debug, Clone)]
struct Index {
    key_path: KeyPath,
    unique: bool,
}

impl Index {
    /// Values that are not valid keys are simply not indexed.
    fn key_of(&self, record: &Record) -> Option<Key> {
        self.key_path
            .extract(record)
            .and_then(|value| Key::from_value(&value).ok())
    }
}

/// An object store held in memory.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) key_path: KeyPath,
    pub(crate) auto_increment: bool,
    next_key: u64,
    records: BTreeMap<Key, Record>,
    indexes: BTreeMap<String, Index>,
}

impl Table {
    pub(crate) fn new(key_path: KeyPath, auto_increment: bool) -> Result<Self> {
        if auto_increment && matches!(key_path, KeyPath::Multi(_)) {
            return Err(Error::Platform(
                "InvalidAccessError: a compound key path cannot auto increment".to_owned(),
            ));
        }

        Ok(Table {
            key_path,
            auto_increment,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        })
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn create_index(&mut self, index: &FieldIndex) -> Result<()> {
        let name = &index.field_name;
        if self.indexes.contains_key(name) {
            return Err(Error::Constraint(format!(
                "an index called \"{name}\" already exists"
            )));
        }

        let index = Index {
            key_path: KeyPath::Single(name.clone()),
            unique: index.unique,
        };

        if index.unique {
            let mut seen = Vec::new();
            for key in self.records.values().filter_map(|record| index.key_of(record)) {
                if seen.contains(&key) {
                    return Err(Error::Constraint(format!(
                        "existing records hold duplicate values for unique index \"{name}\""
                    )));
                }
                seen.push(key);
            }
        }

        self.indexes.insert(name.clone(), index);
        Ok(())
    }

    pub(crate) fn get(&self, key: &Value) -> Result<Option<Record>> {
        let key = Key::from_value(key)?;
        Ok(self.records.get(&key).cloned())
    }

    pub(crate) fn get_all(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    /// Inserts or replaces a record, generating its key when the table
    /// auto increments and the record carries none.
    pub(crate) fn put(&mut self, record: &Record) -> Result<Value> {
        let mut record = record.clone();

        let (key, next_key) = match self.key_path.extract(&record) {
            Some(value) => {
                let key = Key::from_value(&value)?;
                let next_key = match &key {
                    #[allow(
                        clippy::cast_possible_truncation,
                        clippy::cast_sign_loss,
                        clippy::cast_precision_loss
                    )]
                    Key::Number(n) if self.auto_increment && *n >= self.next_key as f64 => {
                        if n.floor() >= MAX_GENERATED_KEY as f64 {
                            MAX_GENERATED_KEY + 1
                        } else {
                            n.floor() as u64 + 1
                        }
                    }
                    _ => self.next_key,
                };
                (key, next_key)
            }
            None if self.auto_increment && self.next_key > MAX_GENERATED_KEY => {
                return Err(Error::Constraint(
                    "the key generator has run out of keys".to_owned(),
                ))
            }
            None if self.auto_increment => {
                #[allow(clippy::cast_precision_loss)]
                let key = Key::Number(self.next_key as f64);
                if let KeyPath::Single(path) = &self.key_path {
                    record.insert(path.clone(), key.to_value());
                }
                (key, self.next_key + 1)
            }
            None => {
                return Err(Error::Platform(format!(
                    "DataError: record has no value at key path {:?}",
                    self.key_path
                )))
            }
        };

        for (name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            let Some(value) = index.key_of(&record) else {
                continue;
            };
            let taken = self.records.iter().any(|(other, existing)| {
                *other != key && index.key_of(existing).as_ref() == Some(&value)
            });
            if taken {
                return Err(Error::Constraint(format!(
                    "unique index \"{name}\" already holds {}",
                    value.to_value()
                )));
            }
        }

        let key_value = key.to_value();
        self.next_key = next_key;
        self.records.insert(key, record);
        Ok(key_value)
    }

    pub(crate) fn delete(&mut self, key: &Value) -> Result<()> {
        let key = Key::from_value(key)?;
        self.records.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Key, Table};
    use crate::{
        schema::{FieldIndex, KeyPath, Record},
        Error,
    };
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn key_ordering() {
        let mut keys = vec![
            Key::from_value(&json!([1])).unwrap(),
            Key::from_value(&json!("b")).unwrap(),
            Key::from_value(&json!(10)).unwrap(),
            Key::from_value(&json!("a")).unwrap(),
            Key::from_value(&json!(2.5)).unwrap(),
        ];
        keys.sort();

        let values: Vec<Value> = keys.iter().map(Key::to_value).collect();
        assert_eq!(values, vec![json!(2.5), json!(10), json!("a"), json!("b"), json!([1])]);
    }

    #[test]
    fn invalid_keys() {
        assert!(Key::from_value(&json!(true)).is_err());
        assert!(Key::from_value(&json!(null)).is_err());
        assert!(Key::from_value(&json!({"a": 1})).is_err());
    }

    #[test]
    fn auto_increment_injects_key() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();

        let first = table.put(&record(json!({"name": "a"}))).unwrap();
        let second = table.put(&record(json!({"name": "b"}))).unwrap();
        assert_eq!(first, json!(1));
        assert_eq!(second, json!(2));

        let stored = table.get(&json!(2)).unwrap().unwrap();
        assert_eq!(stored.get("id"), Some(&json!(2)));
    }

    #[test]
    fn explicit_key_advances_generator() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();

        table.put(&record(json!({"id": 10}))).unwrap();
        let next = table.put(&record(json!({}))).unwrap();
        assert_eq!(next, json!(11));
    }

    #[test]
    fn missing_key_without_generator() {
        let mut table = Table::new(KeyPath::from("id"), false).unwrap();
        let err = table.put(&record(json!({"name": "a"}))).unwrap_err();
        assert!(matches!(err, Error::Platform(msg) if msg.starts_with("DataError")));
    }

    #[test]
    fn compound_key_cannot_auto_increment() {
        assert!(Table::new(KeyPath::from(&["a", "b"][..]), true).is_err());
    }

    #[test]
    fn put_replaces() {
        let mut table = Table::new(KeyPath::from("id"), false).unwrap();
        table.put(&record(json!({"id": "k", "v": 1}))).unwrap();
        table.put(&record(json!({"id": "k", "v": 2}))).unwrap();

        let all = table.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("v"), Some(&json!(2)));
    }

    #[test]
    fn unique_index() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();
        table.create_index(&FieldIndex::new("email").unique()).unwrap();

        table.put(&record(json!({"email": "a@x"}))).unwrap();
        table.put(&record(json!({"email": "b@x"}))).unwrap();
        let err = table.put(&record(json!({"email": "a@x"}))).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)));
        assert_eq!(table.get_all().len(), 2);

        // Rewriting a record with its own value is not a collision.
        table.put(&record(json!({"id": 1, "email": "a@x", "n": 1}))).unwrap();
    }

    #[test]
    fn failed_put_does_not_consume_key() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();
        table.create_index(&FieldIndex::new("email").unique()).unwrap();

        table.put(&record(json!({"email": "a"}))).unwrap();
        table.put(&record(json!({"email": "a"}))).unwrap_err();
        assert_eq!(table.put(&record(json!({"email": "b"}))).unwrap(), json!(2));
    }

    #[test]
    fn unique_index_over_existing_duplicates() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();
        table.put(&record(json!({"sku": "A"}))).unwrap();
        table.put(&record(json!({"sku": "A"}))).unwrap();

        assert!(table.create_index(&FieldIndex::new("sku").unique()).is_err());
        table.create_index(&FieldIndex::new("sku")).unwrap();
        assert_eq!(table.index_names(), vec!["sku".to_owned()]);
    }

    #[test]
    fn huge_explicit_key_exhausts_generator() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();
        assert_eq!(table.put(&record(json!({"id": 1e20}))).unwrap(), json!(1e20));

        let err = table.put(&record(json!({"sku": "x"}))).unwrap_err();
        assert!(matches!(err, Error::Constraint(_)), "{err}");
        assert_eq!(table.get_all().len(), 1);
    }

    #[test]
    fn generator_stops_after_largest_key() {
        let mut table = Table::new(KeyPath::from("id"), true).unwrap();
        table
            .put(&record(json!({"id": 9_007_199_254_740_991_u64})))
            .unwrap();

        assert_eq!(
            table.put(&record(json!({"sku": "a"}))).unwrap(),
            json!(9_007_199_254_740_992.0_f64)
        );
        assert!(table.put(&record(json!({"sku": "b"}))).is_err());
    }

    #[test]
    fn delete_missing_is_ok() {
        let mut table = Table::new(KeyPath::from("id"), false).unwrap();
        table.delete(&json!(1)).unwrap();
        assert!(table.delete(&json!(false)).is_err());
    }
}
