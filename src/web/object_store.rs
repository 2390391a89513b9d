use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};

use super::{dom_error, from_js, request::IndexedDbRequest, to_js};
use crate::{
    error::Result,
    schema::{KeyPath, Record},
};

/// An object store bound to a transaction.
#[derive(Debug)]
pub(crate) struct ObjectStore {
    inner: web_sys::IdbObjectStore,
}

impl ObjectStore {
    pub(crate) fn new(inner: web_sys::IdbObjectStore) -> Self {
        ObjectStore { inner }
    }

    /// The key path of the object store. No key path means keys are stored
    /// out-of-line.
    pub(crate) fn key_path(&self) -> Result<KeyPath> {
        self.inner.key_path().map(KeyPath::from).map_err(dom_error)
    }

    pub(crate) fn auto_increment(&self) -> bool {
        self.inner.auto_increment()
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        to_collection!(self.inner.index_names() => Vec<String> : push)
    }

    /// Get the record stored under `key`, if any.
    pub(crate) async fn get(&self, key: &Value) -> Result<Option<Record>> {
        let key = to_js(key)?;
        let request = IndexedDbRequest::new(self.inner.get(&key).map_err(dom_error)?);

        let object = request.await?;
        if object.is_undefined() || object.is_null() {
            Ok(None)
        } else {
            from_js(&object).map(Some)
        }
    }

    pub(crate) async fn get_all(&self) -> Result<Vec<Record>> {
        let request = IndexedDbRequest::new(self.inner.get_all().map_err(dom_error)?);
        from_js(&request.await?)
    }

    /// Insert or replace `record`, returning the key it was stored under.
    pub(crate) async fn put(&self, record: &Record) -> Result<Value> {
        let value = to_js(record)?;
        let request = IndexedDbRequest::new(self.inner.put(&value).map_err(dom_error)?);
        from_js(&request.await?)
    }

    /// Copies `partial` over the stored object and writes it back. Only the
    /// fields of `partial` go through JSON, so the rest of the stored value
    /// (dates, blobs, binary data) is written back as the platform read it.
    pub(crate) async fn merge(&self, key: &Value, partial: &Record) -> Result<Option<Record>> {
        let key = to_js(key)?;
        let request = IndexedDbRequest::new(self.inner.get(&key).map_err(dom_error)?);

        let stored = request.await?;
        if stored.is_undefined() || stored.is_null() {
            return Ok(None);
        }
        let partial = to_js(partial)?;
        let merged: js_sys::Object = js_sys::Object::assign(stored.unchecked_ref(), partial.unchecked_ref());

        let request = IndexedDbRequest::new(self.inner.put(&merged).map_err(dom_error)?);
        request.await?;
        from_js(&merged).map(Some)
    }

    pub(crate) async fn delete(&self, key: &Value) -> Result<()> {
        let key = to_js(key)?;
        let request = IndexedDbRequest::new(self.inner.delete(&key).map_err(dom_error)?);
        request.await?;
        Ok(())
    }
}

impl From<KeyPath> for JsValue {
    fn from(key_path: KeyPath) -> JsValue {
        match key_path {
            KeyPath::None => JsValue::NULL,
            KeyPath::Single(path) => JsValue::from(path),
            KeyPath::Multi(paths) => from_collection!(paths).into(),
        }
    }
}

impl From<JsValue> for KeyPath {
    fn from(val: JsValue) -> KeyPath {
        if let Some(path) = val.as_string() {
            KeyPath::Single(path)
        } else if let Ok(paths) = val.dyn_into::<js_sys::Array>() {
            KeyPath::Multi(paths.iter().filter_map(|path| path.as_string()).collect())
        } else {
            KeyPath::None
        }
    }
}
