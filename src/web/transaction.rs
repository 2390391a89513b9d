use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::Waker,
};

use futures::{
    task::{Context, Poll},
    Future,
};

use serde_json::Value;
use wasm_bindgen::{closure::Closure, JsCast};
use web_sys::{IdbTransaction, IdbTransactionMode};

use super::{dom_error, lock, object_store::ObjectStore};
use crate::{
    backend::{Transaction, TransactionMode},
    error::{Error, Result},
    schema::{KeyPath, Record},
};

impl From<TransactionMode> for IdbTransactionMode {
    fn from(mode: TransactionMode) -> IdbTransactionMode {
        match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        }
    }
}

/// A transaction on one object store.
#[derive(Debug)]
pub struct WebTransaction {
    store: ObjectStore,
    completion: TransactionFuture,
}

impl WebTransaction {
    pub(crate) fn new(inner: IdbTransaction, store: ObjectStore) -> Self {
        WebTransaction {
            store,
            completion: TransactionFuture::new(inner),
        }
    }
}

impl Transaction for WebTransaction {
    fn key_path(&self) -> Result<KeyPath> {
        self.store.key_path()
    }

    fn auto_increment(&self) -> Result<bool> {
        Ok(self.store.auto_increment())
    }

    fn index_names(&self) -> Result<Vec<String>> {
        Ok(self.store.index_names())
    }

    async fn get(&self, key: &Value) -> Result<Option<Record>> {
        self.store.get(key).await
    }

    async fn get_all(&self) -> Result<Vec<Record>> {
        self.store.get_all().await
    }

    async fn put(&self, record: &Record) -> Result<Value> {
        self.store.put(record).await
    }

    async fn merge(&self, key: &Value, partial: &Record) -> Result<Option<Record>> {
        self.store.merge(key, partial).await
    }

    async fn delete(&self, key: &Value) -> Result<()> {
        self.store.delete(key).await
    }

    async fn done(self) -> Result<()> {
        self.completion.await
    }
}

#[derive(Debug, Clone, Copy)]
enum TransactionState {
    Pending,
    Completed,
    Error,
    Aborted,
}

/// Resolves once the transaction commits or fails.
///
/// The listeners are attached as soon as the transaction is created, so a
/// transaction that finishes before anyone awaits it is still observed.
/// They are detached again on drop, since the transaction may outlive us.
struct TransactionFuture {
    inner: IdbTransaction,
    state: Arc<Mutex<TransactionState>>,
    waker: Arc<Mutex<Option<Waker>>>,
    _on_complete: Closure<dyn FnMut()>,
    _on_error: Closure<dyn FnMut()>,
    _on_abort: Closure<dyn FnMut()>,
}

impl std::fmt::Debug for TransactionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFuture")
            .field("state", &*lock(&*self.state))
            .finish()
    }
}

impl TransactionFuture {
    fn new(transaction: IdbTransaction) -> Self {
        let state = Arc::new(Mutex::new(TransactionState::Pending));
        let waker: Arc<Mutex<Option<Waker>>> = Arc::new(Mutex::new(None));

        let listener = |outcome: TransactionState| {
            let state = state.clone();
            let waker = waker.clone();
            Closure::wrap(Box::new(move || {
                // An error is followed by an abort; keep the first outcome.
                let mut state = lock(&*state);
                if matches!(*state, TransactionState::Pending) {
                    *state = outcome;
                }
                drop(state);
                if let Some(waker) = lock(&*waker).take() {
                    waker.wake();
                }
            }) as Box<dyn FnMut()>)
        };

        let on_complete = listener(TransactionState::Completed);
        let on_error = listener(TransactionState::Error);
        let on_abort = listener(TransactionState::Aborted);

        transaction.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        transaction.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        transaction.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        TransactionFuture {
            inner: transaction,
            state,
            waker,
            _on_complete: on_complete,
            _on_error: on_error,
            _on_abort: on_abort,
        }
    }
}

impl Drop for TransactionFuture {
    fn drop(&mut self) {
        self.inner.set_oncomplete(None);
        self.inner.set_onerror(None);
        self.inner.set_onabort(None);
    }
}

impl Future for TransactionFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let state = *lock(&*self.state);
        match state {
            TransactionState::Pending => {
                *lock(&*self.waker) = Some(cx.waker().clone());
                Poll::Pending
            }
            TransactionState::Completed => Poll::Ready(Ok(())),
            TransactionState::Error | TransactionState::Aborted => {
                Poll::Ready(Err(match self.inner.error() {
                    Some(e) => dom_error(e.into()),
                    None => Error::Platform("AbortError: the transaction was aborted".to_owned()),
                }))
            }
        }
    }
}
