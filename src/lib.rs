//! IndexedDB administration: databases, object stores ("tables") and
//! records, behind a backend trait with a browser binding and an in-memory
//! implementation.

#[macro_use]
mod macros;

mod adapter;
mod backend;
mod controller;
mod error;
mod schema;

pub mod memory;
pub mod web;

pub use crate::{
    adapter::StorageAdapter,
    backend::{Backend, Connection, SchemaUpgrade, Transaction, TransactionMode},
    controller::{DeleteTarget, FormController, RecordForm, RecordRow},
    error::{Error, Result},
    schema::{Database, DatabaseInfo, FieldIndex, KeyPath, Record, TableInfo},
};
