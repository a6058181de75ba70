//! Cross-window message bus contract.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every window embedding the drop-in runs its own sessions. Windows share no
//! memory; they agree on a single leader through the bus and exchange small
//! messages by topic. Only the leader talks to the server. Followers ask the
//! leader for the user (`request:user` on the `message` topic) and receive
//! the answer on the `distribute` topic.
//!
//! DESIGN
//! ======
//! The session depends on two capabilities: `LeaderElection` and
//! `MessageTopic`. `MessageBus` is their union. `LocalHub` is an in-process
//! bus connecting several windows of one process; the first window to join
//! is the leader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::User;

/// Component name carried in every message scope.
pub const AUTH_COMPONENT: &str = "dropin.authentication";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("unknown subscription {0}")]
    UnknownSubscription(Uuid),
    #[error("window {0} is not connected")]
    Disconnected(WindowId),
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Requests a follower sends up to the leader.
    Message,
    /// Answers the leader sends down to a follower.
    Distribute,
}

/// Routing scope: which component and which session a message is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub component: String,
    pub base_url: String,
}

impl Scope {
    #[must_use]
    pub fn authentication(base_url: &str) -> Self {
        Self { component: AUTH_COMPONENT.to_owned(), base_url: base_url.to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Payload {
    #[serde(rename = "request:user")]
    RequestUser,
    #[serde(rename = "user")]
    User { user: Option<User> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(flatten)]
    pub scope: Scope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub Uuid);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A delivered message together with the window it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: WindowId,
    pub message: BusMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub Uuid);

pub type Handler = Arc<dyn Fn(Envelope) + Send + Sync>;

// =============================================================================
// CAPABILITIES
// =============================================================================

#[async_trait::async_trait]
pub trait LeaderElection: Send + Sync {
    /// Resolves once election has settled: `true` iff this window leads.
    async fn await_leadership(&self) -> bool;
}

pub trait MessageTopic: Send + Sync {
    fn on(&self, topic: Topic, scope: Scope, handler: Handler) -> SubscriptionId;

    /// # Errors
    ///
    /// Returns an error if the subscription is not registered.
    fn off(&self, topic: Topic, scope: &Scope, id: SubscriptionId) -> Result<(), BusError>;

    /// Send a message up to the leader window.
    fn post_to_parent(&self, message: BusMessage);

    /// Answer the window an envelope came from.
    fn post_to_source(&self, origin: &Envelope, message: BusMessage);
}

pub trait MessageBus: LeaderElection + MessageTopic {}

impl<T: LeaderElection + MessageTopic> MessageBus for T {}

// =============================================================================
// LOCAL HUB
// =============================================================================

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    scope: Scope,
    handler: Handler,
}

#[derive(Default)]
struct HubInner {
    leader: Option<WindowId>,
    windows: HashMap<WindowId, Vec<Subscription>>,
}

/// In-process bus shared by the windows of one process.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LocalHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new window. The first window to join leads.
    #[must_use]
    pub fn join(&self) -> LocalBus {
        let window = WindowId(Uuid::new_v4());
        let mut inner = self.lock();
        inner.windows.insert(window, Vec::new());
        if inner.leader.is_none() {
            inner.leader = Some(window);
        }
        tracing::debug!(%window, leader = inner.leader == Some(window), "window joined");
        LocalBus { hub: self.clone(), window }
    }

    #[must_use]
    pub fn leader(&self) -> Option<WindowId> {
        self.lock().leader
    }

    fn handlers_for(&self, window: WindowId, topic: Topic, scope: &Scope) -> Vec<Handler> {
        self.lock()
            .windows
            .get(&window)
            .map(|subs| {
                subs.iter()
                    .filter(|s| s.topic == topic && &s.scope == scope)
                    .map(|s| s.handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn deliver(&self, to: WindowId, topic: Topic, envelope: Envelope) {
        let handlers = self.handlers_for(to, topic, &envelope.message.scope);
        tracing::trace!(%to, ?topic, handlers = handlers.len(), "deliver");
        for handler in handlers {
            handler(envelope.clone());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// One window's connection to a [`LocalHub`].
#[derive(Clone)]
pub struct LocalBus {
    hub: LocalHub,
    window: WindowId,
}

impl LocalBus {
    #[must_use]
    pub fn window(&self) -> WindowId {
        self.window
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.hub.leader() == Some(self.window)
    }
}

#[async_trait::async_trait]
impl LeaderElection for LocalBus {
    async fn await_leadership(&self) -> bool {
        self.is_leader()
    }
}

impl MessageTopic for LocalBus {
    fn on(&self, topic: Topic, scope: Scope, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        let mut inner = self.hub.lock();
        inner.windows.entry(self.window).or_default().push(Subscription { id, topic, scope, handler });
        id
    }

    fn off(&self, topic: Topic, scope: &Scope, id: SubscriptionId) -> Result<(), BusError> {
        let mut inner = self.hub.lock();
        let subs = inner.windows.get_mut(&self.window).ok_or(BusError::Disconnected(self.window))?;
        let before = subs.len();
        subs.retain(|s| !(s.id == id && s.topic == topic && &s.scope == scope));
        if subs.len() == before {
            return Err(BusError::UnknownSubscription(id.0));
        }
        Ok(())
    }

    fn post_to_parent(&self, message: BusMessage) {
        let Some(leader) = self.hub.leader() else {
            tracing::warn!(window = %self.window, "no leader to post to");
            return;
        };
        self.hub.deliver(leader, Topic::Message, Envelope { source: self.window, message });
    }

    fn post_to_source(&self, origin: &Envelope, message: BusMessage) {
        self.hub.deliver(origin.source, Topic::Distribute, Envelope { source: self.window, message });
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
