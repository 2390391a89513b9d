//! The browser's IndexedDB, wrapped as a [`Backend`].
//!
//! Every callback the platform fires is turned into a future outcome:
//! `success` resolves, `error` rejects, `blocked` rejects a delete with
//! [`Error::Blocked`] and `upgradeneeded` runs the upgrade closure passed to
//! [`Backend::open`].

mod db;
mod object_store;
mod request;
mod transaction;

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use crate::{
    backend::{Backend, SchemaUpgrade},
    error::{Error, Result},
    schema::DatabaseInfo,
};

pub use self::{db::WebConnection, transaction::WebTransaction};
use self::request::OpenDbRequest;

/// The IndexedDB factory of the current global scope.
#[derive(Debug, Clone)]
pub struct WebBackend {
    factory: web_sys::IdbFactory,
}

impl WebBackend {
    /// Binds to `indexedDB` on the window, or on the worker scope when
    /// running inside a web worker.
    pub fn new() -> Result<Self> {
        Ok(WebBackend {
            factory: indexed_db()?,
        })
    }
}

fn indexed_db() -> Result<web_sys::IdbFactory> {
    let unavailable = || Error::Connection("IndexedDB not available".to_owned());

    if let Some(window) = web_sys::window() {
        return window.indexed_db().map_err(dom_error)?.ok_or_else(unavailable);
    }

    let worker: web_sys::WorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| Error::Connection("not running in a window or a worker".to_owned()))?;
    worker.indexed_db().map_err(dom_error)?.ok_or_else(unavailable)
}

impl Backend for WebBackend {
    type Connection = WebConnection;

    async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let databases = js_sys::Reflect::get(&self.factory, &JsValue::from_str("databases"))
            .map_err(dom_error)?
            .dyn_into::<js_sys::Function>()
            .map_err(|_| {
                Error::Platform("NotSupportedError: indexedDB.databases() is missing".to_owned())
            })?;
        let promise = databases
            .call0(&self.factory)
            .map_err(dom_error)?
            .dyn_into::<js_sys::Promise>()
            .map_err(|value| Error::Platform(describe(&value)))?;

        let list = JsFuture::from(promise).await.map_err(dom_error)?;
        from_js(&list)
    }

    async fn open<F>(&self, name: &str, version: Option<u32>, on_upgrade: F) -> Result<WebConnection>
    where
        F: FnOnce(u32, &mut dyn SchemaUpgrade) -> Result<()> + 'static,
    {
        let request = match version {
            Some(version) => self.factory.open_with_u32(name, version),
            None => self.factory.open(name),
        }
        .map_err(|e| Error::Connection(dom_error(e).to_string()))?;

        let raw = OpenDbRequest::open(request, name, on_upgrade).await?;
        Ok(WebConnection::from_raw_unchecked(raw))
    }

    async fn delete_database(&self, name: &str) -> Result<()> {
        let request = self
            .factory
            .delete_database(name)
            .map_err(|e| Error::Connection(dom_error(e).to_string()))?;

        OpenDbRequest::delete(request, name).await?;
        Ok(())
    }
}

/// Sorts a thrown value or DOM exception into an [`Error`] by its name.
pub(crate) fn dom_error(err: JsValue) -> Error {
    match err.dyn_into::<web_sys::DomException>() {
        Ok(e) => match e.name().as_str() {
            "ConstraintError" => Error::Constraint(e.message()),
            "NotFoundError" => Error::NotFound(e.message()),
            name => Error::Platform(format!("{name}: {}", e.message())),
        },
        Err(other) => Error::Platform(describe(&other)),
    }
}

pub(crate) fn describe(value: &JsValue) -> String {
    value.as_string().unwrap_or_else(|| format!("{value:?}"))
}

/// Values cross into JS as JSON, so records keep exactly the shape
/// `serde_json` gives them.
pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue> {
    let json = serde_json::to_string(value)?;
    js_sys::JSON::parse(&json).map_err(|e| Error::Serialization(describe(&e)))
}

pub(crate) fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T> {
    if value.is_undefined() {
        return Err(Error::Serialization("undefined is not JSON".to_owned()));
    }
    let json = js_sys::JSON::stringify(value).map_err(|e| Error::Serialization(describe(&e)))?;
    let json = json
        .as_string()
        .ok_or_else(|| Error::Serialization("value has no JSON form".to_owned()))?;
    Ok(serde_json::from_str(&json)?)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
