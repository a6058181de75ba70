//! Cross-window relay.
//!
//! The leader answers `request:user` from other windows once its own user is
//! known; followers commit whatever user the leader distributes. Handlers
//! hold a weak reference so a dropped session is not kept alive by the bus.

use std::sync::{Arc, Weak};

use super::{AuthSession, SessionInner};
use crate::bus::{BusMessage, Envelope, Handler, Payload, Topic};
use crate::user::User;

fn handler(inner: Weak<SessionInner>, f: fn(&AuthSession, Envelope)) -> Handler {
    Arc::new(move |envelope| {
        if let Some(inner) = inner.upgrade() {
            f(&AuthSession { inner }, envelope);
        }
    })
}

impl AuthSession {
    /// Subscribe the relay handlers. Only the first call per session (or per
    /// `destroy`) has an effect.
    pub(super) fn subscribe_once(&self) {
        {
            let mut state = self.lock();
            if state.initialized {
                return;
            }
            state.initialized = true;
        }

        let bus = &self.inner.deps.bus;
        let scope = &self.inner.scope;
        let weak = Arc::downgrade(&self.inner);
        let message_id = bus.on(Topic::Message, scope.clone(), handler(weak.clone(), Self::on_window_message));
        let distribute_id = bus.on(Topic::Distribute, scope.clone(), handler(weak, Self::on_distribute));

        self.lock().subscriptions = vec![(Topic::Message, message_id), (Topic::Distribute, distribute_id)];
        tracing::debug!(base_url = %self.inner.base_url, "relay subscribed");
    }

    fn on_window_message(&self, envelope: Envelope) {
        if envelope.message.payload != Payload::RequestUser {
            return;
        }
        tracing::debug!(source = %envelope.source, "window requested user");

        let authenticated = self.inner.authenticated.wait();
        let session = self.clone();
        tokio::spawn(async move {
            if authenticated.await.is_err() {
                return;
            }
            let message = BusMessage { payload: Payload::User { user: session.user() }, scope: session.inner.scope.clone() };
            session.inner.deps.bus.post_to_source(&envelope, message);
        });
    }

    fn on_distribute(&self, envelope: Envelope) {
        if let Payload::User { user } = envelope.message.payload {
            tracing::debug!(source = %envelope.source, "user distributed");
            self.process_user(user.unwrap_or_else(User::unknown), "distribute:user");
        }
    }
}
