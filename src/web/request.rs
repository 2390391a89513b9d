use futures::{
    task::{Context, Poll},
    Future,
};
use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Mutex},
};

use wasm_bindgen::{closure::Closure, JsCast, JsValue};

use super::{db::DbDuringUpgrade, describe, dom_error, lock};
use crate::{
    backend::SchemaUpgrade,
    error::{Error, Result},
};

fn request_error(request: &web_sys::IdbRequest) -> Error {
    match request.error() {
        Ok(Some(e)) => dom_error(e.into()),
        Ok(None) => Error::Platform("request failed without an error".to_owned()),
        Err(e) => dom_error(e),
    }
}

/// A pending request on an object store.
pub(crate) struct IndexedDbRequest {
    inner: Arc<web_sys::IdbRequest>,
    onsuccess: Mutex<Option<Closure<dyn FnMut()>>>,
    onerror: Mutex<Option<Closure<dyn FnMut()>>>,
}

impl IndexedDbRequest {
    pub(crate) fn new(request: web_sys::IdbRequest) -> Self {
        Self {
            inner: Arc::new(request),
            onsuccess: Mutex::new(None),
            onerror: Mutex::new(None),
        }
    }

    fn set_onsuccess(&self, closure: Option<Closure<dyn FnMut()>>) {
        self.inner
            .set_onsuccess(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onsuccess) = closure;
    }

    fn set_onerror(&self, closure: Option<Closure<dyn FnMut()>>) {
        self.inner
            .set_onerror(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onerror) = closure;
    }
}

impl Future for IndexedDbRequest {
    type Output = Result<JsValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        use web_sys::IdbRequestReadyState as ReadyState;

        match self.inner.ready_state() {
            ReadyState::Pending => {
                let waker = cx.waker().to_owned();
                let onsuccess =
                    Closure::wrap(Box::new(move || waker.wake_by_ref()) as Box<dyn FnMut()>);
                self.set_onsuccess(Some(onsuccess));

                let waker = cx.waker().to_owned();
                let onerror =
                    Closure::wrap(Box::new(move || waker.wake_by_ref()) as Box<dyn FnMut()>);
                self.set_onerror(Some(onerror));

                Poll::Pending
            }
            ReadyState::Done => match self.inner.result() {
                Ok(val) => Poll::Ready(Ok(val)),
                Err(_) => Poll::Ready(Err(request_error(&self.inner))),
            },
            _ => Poll::Ready(Err(Error::Platform("unexpected ready state".to_owned()))),
        }
    }
}

/// Wraps a request returned by `indexedDB.open()` or
/// `indexedDB.deleteDatabase()`.
///
/// Upgrades run through the closure given to [`OpenDbRequest::open`]. If it
/// fails, the upgrade transaction is aborted and the request resolves to the
/// closure's error rather than the platform's `AbortError`.
pub(crate) struct OpenDbRequest {
    // A ref for this is moved into the upgradeneeded closure.
    inner: Arc<web_sys::IdbOpenDbRequest>,
    name: String,
    fail_on_blocked: bool,
    blocked: Arc<Mutex<bool>>,
    upgrade_error: Arc<Mutex<Option<Error>>>,
    onsuccess: Mutex<Option<Closure<dyn FnMut()>>>,
    onerror: Mutex<Option<Closure<dyn FnMut()>>>,
    onblocked: Mutex<Option<Closure<dyn FnMut()>>>,
    onupgradeneeded: Mutex<Option<Closure<dyn FnMut(web_sys::IdbVersionChangeEvent)>>>,
}

impl OpenDbRequest {
    fn new(request: web_sys::IdbOpenDbRequest, name: &str, fail_on_blocked: bool) -> Self {
        OpenDbRequest {
            inner: Arc::new(request),
            name: name.to_owned(),
            fail_on_blocked,
            blocked: Arc::new(Mutex::new(false)),
            upgrade_error: Arc::new(Mutex::new(None)),
            onsuccess: Mutex::new(None),
            onerror: Mutex::new(None),
            onblocked: Mutex::new(None),
            onupgradeneeded: Mutex::new(None),
        }
    }

    pub(crate) fn open<F>(request: web_sys::IdbOpenDbRequest, name: &str, on_upgrade: F) -> Self
    where
        F: FnOnce(u32, &mut dyn SchemaUpgrade) -> Result<()> + 'static,
    {
        let request = Self::new(request, name, false);
        let request_copy = request.inner.clone();
        let upgrade_error = request.upgrade_error.clone();
        let mut on_upgrade = Some(on_upgrade);

        let onupgradeneeded = move |event: web_sys::IdbVersionChangeEvent| {
            let Some(on_upgrade) = on_upgrade.take() else {
                return;
            };
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let old_version = event.old_version() as u32;

            let outcome = request_copy.result().map_err(dom_error).and_then(|raw| {
                let mut db =
                    DbDuringUpgrade::from_raw_unchecked(raw, request_copy.clone(), old_version);
                let upgrader: &mut dyn SchemaUpgrade = &mut db;
                on_upgrade(old_version, upgrader)
            });

            if let Err(e) = outcome {
                log::warn!("aborting upgrade: {e}");
                if let Some(transaction) = request_copy.transaction() {
                    if let Err(abort) = transaction.abort() {
                        log::warn!("couldn't abort upgrade: {}", describe(&abort));
                    }
                }
                *lock(&*upgrade_error) = Some(e);
            }
        };

        let onupgradeneeded = Closure::wrap(
            Box::new(onupgradeneeded) as Box<dyn FnMut(web_sys::IdbVersionChangeEvent)>
        );
        request.set_onupgradeneeded(Some(onupgradeneeded));

        // Another tab holds an older version open. The request stays pending
        // until that connection closes.
        let db_name = request.name.clone();
        let onblocked = Closure::wrap(Box::new(move || {
            log::warn!("opening \"{db_name}\" is blocked by another connection");
        }) as Box<dyn FnMut()>);
        request.set_onblocked(Some(onblocked));

        request
    }

    pub(crate) fn delete(request: web_sys::IdbOpenDbRequest, name: &str) -> Self {
        Self::new(request, name, true)
    }

    fn set_onsuccess(&self, closure: Option<Closure<dyn FnMut()>>) {
        self.inner
            .set_onsuccess(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onsuccess) = closure;
    }

    fn set_onerror(&self, closure: Option<Closure<dyn FnMut()>>) {
        self.inner
            .set_onerror(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onerror) = closure;
    }

    fn set_onblocked(&self, closure: Option<Closure<dyn FnMut()>>) {
        self.inner
            .set_onblocked(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onblocked) = closure;
    }

    fn set_onupgradeneeded(
        &self,
        closure: Option<Closure<dyn FnMut(web_sys::IdbVersionChangeEvent)>>,
    ) {
        self.inner
            .set_onupgradeneeded(closure.as_ref().map(|c| c.as_ref().unchecked_ref()));
        *lock(&self.onupgradeneeded) = closure;
    }
}

impl fmt::Debug for OpenDbRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "OpenDbRequest({:?})", self.name)
    }
}

impl Future for OpenDbRequest {
    type Output = Result<JsValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        use web_sys::IdbRequestReadyState as ReadyState;

        if *lock(&*self.blocked) {
            return Poll::Ready(Err(Error::Blocked(self.name.clone())));
        }

        match self.inner.ready_state() {
            ReadyState::Pending => {
                // If we're not ready set up callbacks to notify the executor.
                let waker = cx.waker().to_owned();
                let onsuccess =
                    Closure::wrap(Box::new(move || waker.wake_by_ref()) as Box<dyn FnMut()>);
                self.set_onsuccess(Some(onsuccess));

                let waker = cx.waker().to_owned();
                let onerror =
                    Closure::wrap(Box::new(move || waker.wake_by_ref()) as Box<dyn FnMut()>);
                self.set_onerror(Some(onerror));

                if self.fail_on_blocked {
                    let waker = cx.waker().to_owned();
                    let blocked = self.blocked.clone();
                    let onblocked = Closure::wrap(Box::new(move || {
                        *lock(&*blocked) = true;
                        waker.wake_by_ref();
                    }) as Box<dyn FnMut()>);
                    self.set_onblocked(Some(onblocked));
                }

                Poll::Pending
            }
            ReadyState::Done => {
                if let Some(e) = lock(&*self.upgrade_error).take() {
                    return Poll::Ready(Err(e));
                }

                match self.inner.result() {
                    Ok(val) => Poll::Ready(Ok(val)),
                    Err(_) => Poll::Ready(Err(Error::Connection(
                        request_error(&self.inner).to_string(),
                    ))),
                }
            }
            _ => Poll::Ready(Err(Error::Platform("unexpected ready state".to_owned()))),
        }
    }
}
