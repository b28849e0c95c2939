//! Realtime subscriptions over the store's change bus.
//!
//! A [`Subscription`] is a live stream of full-state [`Snapshot`]s.  It runs
//! its query once up front, then again after every committed change its
//! filter accepts.  Dropping or disposing the handle stops the background
//! task; snapshots produced after disposal are discarded.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use chatly_shared::constants::SUBSCRIPTION_BUFFER;
use chatly_store::{Change, Reader, Store};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::error::CoreError;

/// One emission of a subscription: the complete current result set.
///
/// When the query fails the emission carries no items and the failure in
/// `fault`; the stream stays open and recovers on the next change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    pub fault: Option<String>,
}

impl<T> Snapshot<T> {
    pub fn ok(items: Vec<T>) -> Self {
        Self { items, fault: None }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            fault: Some(message.into()),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Transform the items, keeping the fault.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Snapshot<U> {
        Snapshot {
            items: self.items.into_iter().map(f).collect(),
            fault: self.fault,
        }
    }
}

/// Cancels a background task and marks it disposed.
#[derive(Debug, Clone)]
pub struct Disposer {
    task: AbortHandle,
    disposed: Arc<AtomicBool>,
}

impl Disposer {
    pub(crate) fn new(task: AbortHandle, disposed: Arc<AtomicBool>) -> Self {
        Self { task, disposed }
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.task.abort();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Bag of disposers released together on teardown (or on drop).
#[derive(Debug, Default)]
pub struct Disposers {
    handles: Vec<Disposer>,
}

impl Disposers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disposer: Disposer) {
        self.handles.push(disposer);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn dispose_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.dispose();
        }
    }
}

impl Drop for Disposers {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// Live stream of snapshots.  Implements [`Stream`].
pub struct Subscription<T> {
    rx: mpsc::Receiver<Snapshot<T>>,
    task: JoinHandle<()>,
    disposed: Arc<AtomicBool>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<T> Unpin for Subscription<T> {}

impl<T> Subscription<T> {
    /// Wait for the next snapshot.  `None` once disposed or the store is
    /// gone.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot<T>> {
        if self.is_disposed() {
            return None;
        }
        let snapshot = self.rx.recv().await?;
        (!self.is_disposed()).then_some(snapshot)
    }

    /// Handle that can cancel this subscription from elsewhere.
    pub fn disposer(&self) -> Disposer {
        Disposer::new(self.task.abort_handle(), Arc::clone(&self.disposed))
    }

    pub fn dispose(&mut self) {
        self.disposer().dispose();
        self.rx.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Snapshot<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.is_disposed() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(_)) if self.is_disposed() => Poll::Ready(None),
            other => other,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Spawn a subscription that runs `query` now and after every change for
/// which `relevant` returns true.
///
/// The change receiver is taken before the first query so no commit can
/// slip between the initial read and the first wait.  Changes that arrive
/// while a query runs are coalesced into a single re-query.
pub(crate) fn subscribe<T, Q, P>(
    store: &Store,
    label: &'static str,
    relevant: P,
    query: Q,
) -> Subscription<T>
where
    T: Send + 'static,
    Q: Fn(Reader<'_>) -> Result<Vec<T>, CoreError> + Send + Sync + 'static,
    P: Fn(&Change) -> bool + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let disposed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&disposed);
    let store = store.clone();
    let query = Arc::new(query);
    let mut changes = store.changes();

    let task = tokio::spawn(async move {
        debug!(subscription = label, "subscription started");
        loop {
            let q = Arc::clone(&query);
            let snapshot = match store.read(move |r| q(r)).await {
                Ok(items) => Snapshot::ok(items),
                Err(e) => {
                    warn!(subscription = label, error = %e, "subscription query failed");
                    Snapshot::fault(e.to_string())
                }
            };
            if flag.load(Ordering::SeqCst) || tx.send(snapshot).await.is_err() {
                break;
            }

            loop {
                match changes.recv().await {
                    Ok(change) if relevant(&change) => break,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(subscription = label, skipped, "subscriber lagged, re-reading");
                        break;
                    }
                    Err(RecvError::Closed) => {
                        debug!(subscription = label, "change bus closed");
                        return;
                    }
                }
            }
            loop {
                match changes.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
        }
        debug!(subscription = label, "subscription stopped");
    });

    Subscription { rx, task, disposed }
}
