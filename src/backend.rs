//! The seam between the adapter and whatever actually stores the data.
//!
//! A backend is a key-value store with versioned schema migration: schema
//! changes only happen inside an upgrade, which runs when a database is
//! opened at a higher version than the stored one. [`crate::web::WebBackend`]
//! binds this to the browser; [`crate::memory::MemoryBackend`] keeps
//! everything in process.

use serde_json::Value;

use crate::{
    error::Result,
    schema::{DatabaseInfo, FieldIndex, KeyPath, Record},
};

/// The access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Schema access while an upgrade is running.
///
/// Everything done through this handle is discarded if the upgrade closure
/// returns an error.
pub trait SchemaUpgrade {
    /// The version the database had before this upgrade (0 on creation).
    fn old_version(&self) -> u32;

    /// The version the database will have once the upgrade succeeds.
    fn new_version(&self) -> u32;

    fn table_names(&self) -> Vec<String>;

    fn has_table(&self, name: &str) -> bool {
        self.table_names().iter().any(|table| table == name)
    }

    fn create_table(&mut self, name: &str, key_path: &KeyPath, auto_increment: bool)
        -> Result<()>;

    /// Creates an index named after the field, over that field.
    fn create_index(&mut self, table: &str, index: &FieldIndex) -> Result<()>;

    fn delete_table(&mut self, name: &str) -> Result<()>;
}

/// A factory of connections, one per named database.
#[allow(async_fn_in_trait)]
pub trait Backend {
    type Connection: Connection;

    /// Enumerates every database known to the backend.
    async fn databases(&self) -> Result<Vec<DatabaseInfo>>;

    /// Opens `name`, creating it if needed.
    ///
    /// With `version: None` the database is opened at its current version
    /// (or created at version 1). When the requested version is higher than
    /// the stored one, `on_upgrade` runs inside the upgrade; if it fails the
    /// upgrade is rolled back and `open` returns its error.
    async fn open<F>(
        &self,
        name: &str,
        version: Option<u32>,
        on_upgrade: F,
    ) -> Result<Self::Connection>
    where
        F: FnOnce(u32, &mut dyn SchemaUpgrade) -> Result<()> + 'static;

    /// Deletes a database. Fails with [`crate::Error::Blocked`] while
    /// another connection to it is open.
    async fn delete_database(&self, name: &str) -> Result<()>;
}

/// An open database.
#[allow(async_fn_in_trait)]
pub trait Connection {
    type Transaction: Transaction;

    fn name(&self) -> String;

    fn version(&self) -> u32;

    fn table_names(&self) -> Vec<String>;

    /// Starts a transaction scoped to a single table.
    fn transaction(&self, table: &str, mode: TransactionMode) -> Result<Self::Transaction>;

    /// Closes the connection. Further transactions fail.
    fn close(&self);
}

/// A transaction over one table.
#[allow(async_fn_in_trait)]
pub trait Transaction {
    fn key_path(&self) -> Result<KeyPath>;

    fn auto_increment(&self) -> Result<bool>;

    fn index_names(&self) -> Result<Vec<String>>;

    async fn get(&self, key: &Value) -> Result<Option<Record>>;

    async fn get_all(&self) -> Result<Vec<Record>>;

    /// Inserts or replaces `record`, returning its primary key.
    async fn put(&self, record: &Record) -> Result<Value>;

    /// Copies the fields of `partial` over the record stored under `key` and
    /// stores the result, which is returned. `None` when there is no such
    /// record.
    async fn merge(&self, key: &Value, partial: &Record) -> Result<Option<Record>> {
        let Some(mut record) = self.get(key).await? else {
            return Ok(None);
        };
        for (field, value) in partial {
            record.insert(field.clone(), value.clone());
        }
        self.put(&record).await?;
        Ok(Some(record))
    }

    async fn delete(&self, key: &Value) -> Result<()>;

    /// Waits for the transaction to commit.
    async fn done(self) -> Result<()>;
}
