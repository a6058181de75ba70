//! Typed authentication events and their listeners.
//!
//! Listeners run synchronously, in registration order, on whatever task
//! triggered the event. A listener can veto the default reaction to an
//! event by returning [`Propagation::Veto`]; today only the `user-error`
//! alert honors vetoes.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::user::User;

// =============================================================================
// EVENTS
// =============================================================================

/// Label attached to every `user` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserState {
    Updated,
    SignedIn,
    SignedOut,
    ChangedUser,
    UserError,
}

impl UserState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::SignedIn => "signed-in",
            Self::SignedOut => "signed-out",
            Self::ChangedUser => "changed-user",
            Self::UserError => "user-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserEvent {
    pub state: UserState,
    pub authorized: bool,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationErrorEvent {
    pub method: String,
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthEvent {
    SigningIn,
    User(UserEvent),
    ClearUser,
    AuthenticationError(AuthenticationErrorEvent),
}

impl AuthEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SigningIn => "signing-in",
            Self::User(_) => "user",
            Self::ClearUser => "clear-user",
            Self::AuthenticationError(_) => "authentication-error",
        }
    }
}

// =============================================================================
// LISTENERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Continue,
    /// Suppress the default reaction to this event.
    Veto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&AuthEvent) -> Propagation + Send + Sync>;

struct Registration {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> Propagation + Send + Sync + 'static,
    {
        self.register(Arc::new(listener), false)
    }

    /// Register a listener that is removed after its first event.
    pub fn one<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> Propagation + Send + Sync + 'static,
    {
        self.register(Arc::new(listener), true)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener. Returns `false` if any listener
    /// vetoed.
    pub fn trigger(&self, event: &AuthEvent) -> bool {
        let snapshot: Vec<Listener> = {
            let mut listeners = self.lock();
            let snapshot = listeners.iter().map(|r| r.listener.clone()).collect();
            listeners.retain(|r| !r.once);
            snapshot
        };

        tracing::trace!(event = event.name(), listeners = snapshot.len(), "trigger");

        let mut proceed = true;
        for listener in &snapshot {
            if listener(event) == Propagation::Veto {
                proceed = false;
            }
        }
        proceed
    }

    fn register(&self, listener: Listener, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Registration { id, once, listener });
        id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.listeners.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
