//! Resettable, re-awaitable gates.
//!
//! DESIGN
//! ======
//! A `Gate<T>` is a one-shot value that can be re-armed. Each arming is an
//! epoch backed by its own `watch` channel: `wait()` subscribes to the epoch
//! that is current at call time, so a waiter only ever observes the outcome
//! of that epoch. `reset()` on a settled gate drops the old channel and opens
//! a new pending epoch; `reset()` on a pending gate keeps the epoch so
//! nobody already waiting is orphaned.
//!
//! Waiters are `'static` boxed futures and can be handed to other tasks.

use std::sync::Mutex;

use futures::future::BoxFuture;
use tokio::sync::watch;

/// Error observed by a waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The gate was explicitly rejected.
    #[error("gate rejected: {0}")]
    Rejected(String),
    /// The epoch was dropped without ever settling.
    #[error("gate abandoned before settling")]
    Abandoned,
}

/// Settlement state of the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Resolved,
    Rejected,
}

/// Future returned by [`Gate::wait`].
pub type Waiter<T> = BoxFuture<'static, Result<T, GateError>>;

type Outcome<T> = Option<Result<T, GateError>>;

struct Epoch<T> {
    id: u64,
    tx: watch::Sender<Outcome<T>>,
}

/// A resolvable value that can be reset into a fresh pending epoch.
pub struct Gate<T> {
    name: &'static str,
    epoch: Mutex<Epoch<T>>,
}

impl<T> Gate<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { name, epoch: Mutex::new(Epoch { id: 0, tx }) }
    }

    /// Await the outcome of the epoch that is current right now.
    pub fn wait(&self) -> Waiter<T> {
        let mut rx = self.lock().tx.subscribe();
        Box::pin(async move {
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .map(|settled| settled.clone())
                .map_err(|_| GateError::Abandoned)?;
            outcome.unwrap_or(Err(GateError::Abandoned))
        })
    }

    /// Resolve the current epoch. A settled epoch keeps its first outcome.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the current epoch. A settled epoch keeps its first outcome.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(Err(GateError::Rejected(reason.into())))
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        match &*self.lock().tx.borrow() {
            None => GateState::Pending,
            Some(Ok(_)) => GateState::Resolved,
            Some(Err(_)) => GateState::Rejected,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state() == GateState::Pending
    }

    /// Identifier of the current epoch; bumped by every effective reset.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.lock().id
    }

    /// The resolved value of the current epoch, if any.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &*self.lock().tx.borrow() {
            Some(Ok(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Start a new pending epoch if the current one has settled.
    pub fn reset(&self) {
        let mut epoch = self.lock();
        if epoch.tx.borrow().is_none() {
            return;
        }
        let (tx, _rx) = watch::channel(None);
        epoch.id += 1;
        epoch.tx = tx;
        tracing::trace!(gate = self.name, epoch = epoch.id, "gate reset");
    }

    fn settle(&self, outcome: Result<T, GateError>) -> bool {
        let epoch = self.lock();
        let settled = epoch.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if settled {
            tracing::trace!(gate = self.name, epoch = epoch.id, "gate settled");
        }
        settled
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Epoch<T>> {
        self.epoch.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod tests;
