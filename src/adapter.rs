//! One async operation per administrative action.
//!
//! Every operation opens its own connection and closes it before returning,
//! whatever the outcome. Schema changes go through an upgrade: the caller
//! either passes the version to upgrade to, or uses [`StorageAdapter::add_table`]
//! and [`StorageAdapter::remove_table`], which read the current version and
//! bump it themselves.

use std::{cell::Cell, rc::Rc};

use serde_json::Value;

use crate::{
    backend::{Backend, Connection, SchemaUpgrade, Transaction, TransactionMode},
    error::{Error, Result},
    schema::{Database, DatabaseInfo, FieldIndex, KeyPath, Record, TableInfo},
};

/// Closes the connection and records what it looked like.
fn snapshot(db: &impl Connection) -> Database {
    let database = Database {
        name: db.name(),
        version: db.version(),
        tables: db.table_names(),
    };
    db.close();
    database
}

#[derive(Debug, Clone)]
pub struct StorageAdapter<B> {
    backend: B,
}

impl<B: Backend> StorageAdapter<B> {
    pub fn new(backend: B) -> Self {
        StorageAdapter { backend }
    }

    /// Opens (creating if needed) `name` at `version`.
    pub async fn create_database(&self, name: &str, version: u32) -> Result<Database> {
        log::debug!("creating database \"{name}\" at version {version}");
        let db = self.backend.open(name, Some(version), |_, _| Ok(())).await?;
        Ok(snapshot(&db))
    }

    pub async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        self.backend.databases().await
    }

    pub async fn delete_database(&self, name: &str) -> Result<()> {
        log::debug!("deleting database \"{name}\"");
        self.backend.delete_database(name).await
    }

    /// Creates `table_name` while upgrading `db_name` to `new_version`.
    ///
    /// The primary key always auto increments and must name a field. One
    /// index is created per field with a non-empty name. Fails with
    /// [`Error::DuplicateName`], leaving the database untouched, if the
    /// table already exists.
    pub async fn create_table(
        &self,
        db_name: &str,
        new_version: u32,
        table_name: &str,
        primary_key: impl Into<KeyPath>,
        fields: &[FieldIndex],
    ) -> Result<Database> {
        let database = db_name.to_owned();
        let table = table_name.to_owned();
        let key_path = primary_key.into();
        if key_path == KeyPath::None {
            return Err(Error::Constraint(format!(
                "table \"{table}\" needs a primary key"
            )));
        }
        let fields: Vec<FieldIndex> = fields
            .iter()
            .filter(|field| !field.field_name.is_empty())
            .cloned()
            .collect();

        for field in fields.iter().filter(|field| field.auto_increment) {
            log::warn!(
                "ignoring auto increment on index \"{}\": only primary keys can auto increment",
                field.field_name
            );
        }

        log::debug!("creating table \"{table}\" in \"{database}\" at version {new_version}");
        self.upgrade(db_name, new_version, move |upgrader| {
            if upgrader.has_table(&table) {
                return Err(Error::DuplicateName { database, table });
            }

            upgrader.create_table(&table, &key_path, true)?;
            for field in &fields {
                upgrader.create_index(&table, field)?;
            }
            Ok(())
        })
        .await
    }

    /// Lists the tables of `db_name` at its current version.
    pub async fn list_tables(&self, db_name: &str) -> Result<Vec<String>> {
        let db = self.connect(db_name).await?;
        Ok(snapshot(&db).tables)
    }

    /// Removes `table_name` while upgrading `db_name` to `new_version`.
    pub async fn delete_table(
        &self,
        db_name: &str,
        new_version: u32,
        table_name: &str,
    ) -> Result<Database> {
        let table = table_name.to_owned();

        log::debug!("deleting table \"{table}\" from \"{db_name}\" at version {new_version}");
        self.upgrade(db_name, new_version, move |upgrader| {
            upgrader.delete_table(&table)
        })
        .await
    }

    /// [`Self::create_table`] at the version following the current one.
    pub async fn add_table(
        &self,
        db_name: &str,
        table_name: &str,
        primary_key: impl Into<KeyPath>,
        fields: &[FieldIndex],
    ) -> Result<Database> {
        let version = self.next_version(db_name).await?;
        self.create_table(db_name, version, table_name, primary_key, fields)
            .await
    }

    /// [`Self::delete_table`] at the version following the current one.
    pub async fn remove_table(&self, db_name: &str, table_name: &str) -> Result<Database> {
        let version = self.next_version(db_name).await?;
        self.delete_table(db_name, version, table_name).await
    }

    pub async fn describe_table(&self, db_name: &str, table_name: &str) -> Result<TableInfo> {
        let db = self.connect(db_name).await?;
        let info = describe(&db, table_name);
        db.close();
        info
    }

    /// Inserts or replaces `record`, returning its primary key.
    pub async fn create_record(
        &self,
        db_name: &str,
        table_name: &str,
        record: &Record,
    ) -> Result<Value> {
        log::debug!("writing a record to \"{db_name}\".\"{table_name}\"");
        let db = self.connect(db_name).await?;
        let key = write(&db, table_name, record).await;
        db.close();
        key
    }

    pub async fn list_records(&self, db_name: &str, table_name: &str) -> Result<Vec<Record>> {
        let db = self.connect(db_name).await?;
        let records = read_all(&db, table_name).await;
        db.close();
        records
    }

    pub async fn get_record(
        &self,
        db_name: &str,
        table_name: &str,
        key: &Value,
    ) -> Result<Option<Record>> {
        let db = self.connect(db_name).await?;
        let record = read(&db, table_name, key).await;
        db.close();
        record
    }

    /// Copies the fields of `partial` over the record stored under `id` and
    /// writes the result back. Fields absent from `partial` are kept.
    pub async fn update_record(
        &self,
        db_name: &str,
        table_name: &str,
        id: &Value,
        partial: &Record,
    ) -> Result<Record> {
        log::debug!("updating record {id} in \"{db_name}\".\"{table_name}\"");
        let db = self.connect(db_name).await?;
        let record = merge(&db, table_name, id, partial).await;
        db.close();
        record
    }

    pub async fn delete_record(&self, db_name: &str, table_name: &str, key: &Value) -> Result<()> {
        log::debug!("deleting record {key} from \"{db_name}\".\"{table_name}\"");
        let db = self.connect(db_name).await?;
        let deleted = remove(&db, table_name, key).await;
        db.close();
        deleted
    }

    async fn connect(&self, db_name: &str) -> Result<B::Connection> {
        self.backend.open(db_name, None, |_, _| Ok(())).await
    }

    async fn next_version(&self, db_name: &str) -> Result<u32> {
        let db = self.connect(db_name).await?;
        let version = db.version();
        db.close();
        version
            .checked_add(1)
            .ok_or_else(|| Error::Connection(format!("\"{db_name}\" is at the highest version")))
    }

    /// Opens `db_name` at `version` and runs `f` in the upgrade. Fails if
    /// the version did not cause an upgrade.
    async fn upgrade<F>(&self, db_name: &str, version: u32, f: F) -> Result<Database>
    where
        F: FnOnce(&mut dyn SchemaUpgrade) -> Result<()> + 'static,
    {
        let upgraded = Rc::new(Cell::new(false));
        let flag = upgraded.clone();

        let db = self
            .backend
            .open(db_name, Some(version), move |_, upgrader| {
                flag.set(true);
                f(upgrader)
            })
            .await?;
        let database = snapshot(&db);

        if upgraded.get() {
            Ok(database)
        } else {
            Err(Error::Connection(format!(
                "VersionError: \"{db_name}\" is already at version {}; schema changes need a higher version",
                database.version
            )))
        }
    }
}

fn describe(db: &impl Connection, table: &str) -> Result<TableInfo> {
    let tx = db.transaction(table, TransactionMode::ReadOnly)?;
    Ok(TableInfo {
        name: table.to_owned(),
        key_path: tx.key_path()?,
        auto_increment: tx.auto_increment()?,
        indexes: tx.index_names()?,
    })
}

async fn write<C: Connection>(db: &C, table: &str, record: &Record) -> Result<Value> {
    let tx = db.transaction(table, TransactionMode::ReadWrite)?;
    let key = tx.put(record).await?;
    tx.done().await?;
    Ok(key)
}

async fn read_all<C: Connection>(db: &C, table: &str) -> Result<Vec<Record>> {
    let tx = db.transaction(table, TransactionMode::ReadOnly)?;
    tx.get_all().await
}

async fn read<C: Connection>(db: &C, table: &str, key: &Value) -> Result<Option<Record>> {
    let tx = db.transaction(table, TransactionMode::ReadOnly)?;
    tx.get(key).await
}

async fn merge<C: Connection>(db: &C, table: &str, id: &Value, partial: &Record) -> Result<Record> {
    let tx = db.transaction(table, TransactionMode::ReadWrite)?;
    let record = tx
        .merge(id, partial)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no record with key {id} in \"{table}\"")))?;
    tx.done().await?;
    Ok(record)
}

async fn remove<C: Connection>(db: &C, table: &str, key: &Value) -> Result<()> {
    let tx = db.transaction(table, TransactionMode::ReadWrite)?;
    tx.delete(key).await?;
    tx.done().await
}
