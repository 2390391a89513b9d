use std::sync::Arc;
use wasm_bindgen::{JsCast, JsValue};

use super::{dom_error, object_store::ObjectStore, transaction::WebTransaction};
use crate::{
    backend::{Connection, SchemaUpgrade, TransactionMode},
    error::{Error, Result},
    schema::{FieldIndex, KeyPath},
};

fn version_of(db: &web_sys::IdbDatabase) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let version = db.version() as u32;
    version
}

fn store_names(db: &web_sys::IdbDatabase) -> Vec<String> {
    to_collection!(db.object_store_names() => Vec<String> : push)
}

/// A handle on the database during an upgrade.
#[derive(Debug)]
pub struct DbDuringUpgrade {
    db: web_sys::IdbDatabase,
    request: Arc<web_sys::IdbOpenDbRequest>,
    old_version: u32,
}

impl DbDuringUpgrade {
    pub(crate) fn from_raw_unchecked(
        raw: JsValue,
        request: Arc<web_sys::IdbOpenDbRequest>,
        old_version: u32,
    ) -> Self {
        DbDuringUpgrade {
            db: raw.unchecked_into(),
            request,
            old_version,
        }
    }

    /// The upgrade transaction's view of an existing store.
    fn object_store(&self, name: &str) -> Result<web_sys::IdbObjectStore> {
        self.request
            .transaction()
            .ok_or_else(|| Error::Platform("InvalidStateError: no upgrade transaction".to_owned()))?
            .object_store(name)
            .map_err(dom_error)
    }
}

impl SchemaUpgrade for DbDuringUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        version_of(&self.db)
    }

    fn table_names(&self) -> Vec<String> {
        store_names(&self.db)
    }

    fn create_table(
        &mut self,
        name: &str,
        key_path: &KeyPath,
        auto_increment: bool,
    ) -> Result<()> {
        if self.has_table(name) {
            return Err(Error::Constraint(format!(
                "an object store called \"{name}\" already exists"
            )));
        }

        let key_path: JsValue = key_path.clone().into();
        let parameters = web_sys::IdbObjectStoreParameters::new();
        parameters.set_key_path(&key_path);
        parameters.set_auto_increment(auto_increment);

        self.db
            .create_object_store_with_optional_parameters(name, &parameters)
            .map_err(dom_error)?;
        Ok(())
    }

    fn create_index(&mut self, table: &str, index: &FieldIndex) -> Result<()> {
        let parameters = web_sys::IdbIndexParameters::new();
        parameters.set_unique(index.unique);

        self.object_store(table)?
            .create_index_with_str_and_optional_parameters(
                &index.field_name,
                &index.field_name,
                &parameters,
            )
            .map_err(dom_error)?;
        Ok(())
    }

    fn delete_table(&mut self, name: &str) -> Result<()> {
        self.db.delete_object_store(name).map_err(dom_error)
    }
}

/// An open IndexedDB connection.
#[derive(Debug, Clone)]
pub struct WebConnection {
    pub(crate) inner: Arc<web_sys::IdbDatabase>,
}

impl WebConnection {
    pub(crate) fn from_raw_unchecked(raw: JsValue) -> Self {
        WebConnection {
            inner: Arc::new(raw.unchecked_into()),
        }
    }
}

impl Connection for WebConnection {
    type Transaction = WebTransaction;

    fn name(&self) -> String {
        self.inner.name()
    }

    fn version(&self) -> u32 {
        version_of(&self.inner)
    }

    fn table_names(&self) -> Vec<String> {
        store_names(&self.inner)
    }

    fn transaction(&self, table: &str, mode: TransactionMode) -> Result<WebTransaction> {
        let inner = self
            .inner
            .transaction_with_str_and_mode(table, mode.into())
            .map_err(dom_error)?;
        let store = inner.object_store(table).map_err(dom_error)?;

        Ok(WebTransaction::new(inner, ObjectStore::new(store)))
    }

    fn close(&self) {
        self.inner.close();
    }
}
