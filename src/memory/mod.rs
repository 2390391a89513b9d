//! An in-process backend with the same observable behaviour as the browser:
//! versioned upgrades that roll back on failure, deletes blocked by open
//! connections, generated keys and unique indexes.

mod table;

use std::{
    cell::Cell,
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::Value;

use crate::{
    backend::{Backend, Connection, SchemaUpgrade, Transaction, TransactionMode},
    error::{Error, Result},
    schema::{DatabaseInfo, FieldIndex, KeyPath, Record},
};

use self::table::Table;

#[derive(Debug, Clone, Default)]
struct StoredDatabase {
    version: u32,
    tables: BTreeMap<String, Table>,
    connections: usize,
}

type Databases = BTreeMap<String, StoredDatabase>;

/// A backend keeping every database in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    databases: Arc<Mutex<Databases>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Databases> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_table<T>(
        &self,
        database: &str,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T>,
    ) -> Result<T> {
        let mut databases = self.lock();
        let table = databases
            .get_mut(database)
            .and_then(|db| db.tables.get_mut(table))
            .ok_or_else(|| missing_table(database, table))?;
        f(table)
    }
}

fn missing_table(database: &str, table: &str) -> Error {
    Error::NotFound(format!(
        "no table named \"{table}\" in database \"{database}\""
    ))
}

impl Backend for MemoryBackend {
    type Connection = MemoryConnection;

    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        Ok(self
            .lock()
            .iter()
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                version: db.version,
            })
            .collect())
    }

    async fn open<F>(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: F,
    ) -> Result<MemoryConnection>
    where
        F: FnOnce(u32, &mut dyn SchemaUpgrade) -> Result<()> + 'static,
    {
        if version == Some(0) {
            return Err(Error::Connection(
                "TypeError: the version must be greater than zero".to_owned(),
            ));
        }

        let stored = self.lock().get(name).cloned();
        let old_version = stored.as_ref().map_or(0, |db| db.version);
        let new_version = version.unwrap_or_else(|| old_version.max(1));

        if new_version < old_version {
            return Err(Error::Connection(format!(
                "VersionError: requested version {new_version} is less than the existing version {old_version}"
            )));
        }

        if new_version > old_version {
            // Work on a copy so a failed upgrade leaves nothing behind.
            let mut staged = stored.unwrap_or_default();
            let mut upgrade = MemoryUpgrade {
                db: &mut staged,
                old_version,
                new_version,
            };
            let upgrader: &mut dyn SchemaUpgrade = &mut upgrade;
            on_upgrade(old_version, upgrader)?;

            log::debug!("upgraded \"{name}\" from version {old_version} to {new_version}");
            staged.version = new_version;
            let mut databases = self.lock();
            staged.connections = databases.get(name).map_or(0, |db| db.connections);
            databases.insert(name.to_owned(), staged);
        }

        if let Some(db) = self.lock().get_mut(name) {
            db.connections += 1;
        }

        Ok(MemoryConnection {
            backend: self.clone(),
            name: name.to_owned(),
            version: new_version,
            closed: Cell::new(false),
        })
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let mut databases = self.lock();
        if databases.get(name).is_some_and(|db| db.connections > 0) {
            return Err(Error::Blocked(name.to_owned()));
        }
        databases.remove(name);
        Ok(())
    }
}

struct MemoryUpgrade<'a> {
    db: &'a mut StoredDatabase,
    old_version: u32,
    new_version: u32,
}

impl<'a> SchemaUpgrade for MemoryUpgrade<'a> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn table_names(&self) -> Vec<String> {
        self.db.tables.keys().cloned().collect()
    }

    fn create_table(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> Result<()> {
        if self.db.tables.contains_key(name) {
            return Err(Error::Constraint(format!(
                "an object store called \"{name}\" already exists"
            )));
        }
        let table = Table::new(key_path.clone(), auto_increment)?;
        self.db.tables.insert(name.to_owned(), table);
        Ok(())
    }

    fn create_index(&mut self, table: &str, index: &FieldIndex) -> Result<()> {
        self.db
            .tables
            .get_mut(table)
            .ok_or_else(|| Error::NotFound(format!("no table named \"{table}\"")))?
            .create_index(index)
    }

    fn delete_table(&mut self, name: &str) -> Result<()> {
        self.db
            .tables
            .remove(name)
            .map(drop)
            .ok_or_else(|| Error::NotFound(format!("no table named \"{name}\"")))
    }
}

/// A connection to a [`MemoryBackend`] database. Closed on drop.
#[derive(Debug)]
pub struct MemoryConnection {
    backend: MemoryBackend,
    name: String,
    version: u32,
    closed: Cell<bool>,
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn table_names(&self) -> Vec<String> {
        self.backend
            .lock()
            .get(&self.name)
            .map(|db| db.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(&self, table: &str, mode: TransactionMode) -> Result<MemoryTransaction> {
        if self.closed.get() {
            return Err(Error::Platform(
                "InvalidStateError: the database connection is closing".to_owned(),
            ));
        }
        if !self.table_names().iter().any(|name| name == table) {
            return Err(missing_table(&self.name, table));
        }

        Ok(MemoryTransaction {
            backend: self.backend.clone(),
            database: self.name.clone(),
            table: table.to_owned(),
            mode,
        })
    }

    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(db) = self.backend.lock().get_mut(&self.name) {
            db.connections = db.connections.saturating_sub(1);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// A transaction on one table of a [`MemoryBackend`] database. Every
/// request is applied as soon as it is made.
#[derive(Debug)]
pub struct MemoryTransaction {
    backend: MemoryBackend,
    database: String,
    table: String,
    mode: TransactionMode,
}

impl MemoryTransaction {
    fn read<T>(&self, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        self.backend.with_table(&self.database, &self.table, f)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(Error::Platform(
                "ReadOnlyError: the transaction is read-only".to_owned(),
            ));
        }
        self.read(f)
    }
}

impl Transaction for MemoryTransaction {
    fn key_path(&self) -> Result<KeyPath> {
        self.read(|table| Ok(table.key_path.clone()))
    }

    fn auto_increment(&self) -> Result<bool> {
        self.read(|table| Ok(table.auto_increment))
    }

    fn index_names(&self) -> Result<Vec<String>> {
        self.read(|table| Ok(table.index_names()))
    }

    async fn get(&self, key: &Value) -> Result<Option<Record>> {
        self.read(|table| table.get(key))
    }

    async fn get_all(&self) -> Result<Vec<Record>> {
        self.read(|table| Ok(table.get_all()))
    }

    async fn put(&self, record: &Record) -> Result<Value> {
        self.write(|table| table.put(record))
    }

    async fn delete(&self, key: &Value) -> Result<()> {
        self.write(|table| table.delete(key))
    }

    async fn done(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::MemoryBackend;
    use crate::{
        backend::{Backend, Connection, Transaction, TransactionMode},
        schema::{DatabaseInfo, FieldIndex, KeyPath},
        Error,
    };
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn open_creates_database() {
        let backend = MemoryBackend::new();
        block_on(async {
            let db = backend.open("test", None, |_, _| Ok(())).await.unwrap();
            assert_eq!(db.name(), "test");
            assert_eq!(db.version(), 1);
            assert!(db.table_names().is_empty());

            let list = backend.databases().await.unwrap();
            assert_eq!(
                list,
                vec![DatabaseInfo {
                    name: "test".to_owned(),
                    version: 1
                }]
            );
        });
    }

    #[test]
    fn upgrade_runs_only_on_higher_version() {
        let backend = MemoryBackend::new();
        block_on(async {
            backend
                .open("test", Some(2), |old, upgrader| {
                    assert_eq!(old, 0);
                    assert_eq!(upgrader.new_version(), 2);
                    upgrader.create_table("items", &KeyPath::from("id"), true)
                })
                .await
                .unwrap();

            let db = backend
                .open("test", Some(2), |_, _| panic!("no upgrade expected"))
                .await
                .unwrap();
            assert_eq!(db.table_names(), vec!["items".to_owned()]);

            let err = backend.open("test", Some(1), |_, _| Ok(())).await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)));

            let err = backend.open("test", Some(0), |_, _| Ok(())).await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)));
        });
    }

    #[test]
    fn failed_upgrade_rolls_back() {
        let backend = MemoryBackend::new();
        block_on(async {
            backend.open("test", Some(1), |_, _| Ok(())).await.unwrap();

            let err = backend
                .open("test", Some(2), |_, upgrader| {
                    upgrader.create_table("items", &KeyPath::from("id"), true)?;
                    Err(Error::Platform("stop".to_owned()))
                })
                .await
                .unwrap_err();
            assert_eq!(err, Error::Platform("stop".to_owned()));

            let db = backend.open("test", None, |_, _| Ok(())).await.unwrap();
            assert_eq!(db.version(), 1);
            assert!(db.table_names().is_empty());
        });
    }

    #[test]
    fn delete_blocked_by_open_connection() {
        let backend = MemoryBackend::new();
        block_on(async {
            let db = backend.open("test", None, |_, _| Ok(())).await.unwrap();

            let err = backend.delete_database("test").await.unwrap_err();
            assert_eq!(err, Error::Blocked("test".to_owned()));
            assert_eq!(backend.databases().await.unwrap().len(), 1);

            db.close();
            backend.delete_database("test").await.unwrap();
            assert!(backend.databases().await.unwrap().is_empty());
        });
    }

    #[test]
    fn dropping_a_connection_closes_it() {
        let backend = MemoryBackend::new();
        block_on(async {
            drop(backend.open("test", None, |_, _| Ok(())).await.unwrap());
            backend.delete_database("test").await.unwrap();
        });
    }

    #[test]
    fn transactions() {
        let backend = MemoryBackend::new();
        block_on(async {
            let db = backend
                .open("test", Some(1), |_, upgrader| {
                    upgrader.create_table("items", &KeyPath::from("id"), true)?;
                    upgrader.create_index("items", &FieldIndex::new("sku").unique())
                })
                .await
                .unwrap();

            let err = db.transaction("missing", TransactionMode::ReadOnly).unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));

            let tx = db.transaction("items", TransactionMode::ReadWrite).unwrap();
            assert_eq!(tx.key_path().unwrap(), KeyPath::from("id"));
            assert!(tx.auto_increment().unwrap());
            assert_eq!(tx.index_names().unwrap(), vec!["sku".to_owned()]);

            let mut record = serde_json::Map::new();
            record.insert("sku".to_owned(), json!("A1"));
            let key = tx.put(&record).await.unwrap();
            tx.done().await.unwrap();

            let tx = db.transaction("items", TransactionMode::ReadOnly).unwrap();
            let stored = tx.get(&key).await.unwrap().unwrap();
            assert_eq!(stored.get("sku"), Some(&json!("A1")));
            assert!(tx.delete(&key).await.is_err());

            db.close();
            assert!(db.transaction("items", TransactionMode::ReadOnly).is_err());
        });
    }
}
