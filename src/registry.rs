//! Registry of authentication sessions, keyed by normalized base URL.
//!
//! DESIGN
//! ======
//! URLs are normalized with [`session_key`] so `https://A.example/` and
//! `https://a.example` share one session, and the page's own origin maps to
//! the local key. The default (local) session initializes itself once the
//! page is ready, unless another session was registered in the meantime:
//! with several back-ends in play the host must pick one explicitly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::events::{AuthEvent, ListenerId, Propagation};
use crate::host::NavigationSignal;
use crate::origin::{LOCAL_KEY, session_key};
use crate::session::{AuthSession, SessionDeps};

/// Pause after the page is ready before the default session initializes.
const AUTO_INIT_DELAY: Duration = Duration::from_millis(1);

struct RegistryInner {
    deps: SessionDeps,
    sessions: Mutex<HashMap<String, AuthSession>>,
}

#[derive(Clone)]
pub struct AuthRegistry {
    inner: Arc<RegistryInner>,
}

impl AuthRegistry {
    #[must_use]
    pub fn new(deps: SessionDeps) -> Self {
        Self { inner: Arc::new(RegistryInner { deps, sessions: Mutex::new(HashMap::new()) }) }
    }

    #[must_use]
    pub fn key_for(&self, url: &str) -> String {
        session_key(url, &self.inner.deps.page.origin())
    }

    /// The session for `url`, created on first use.
    pub fn get_or_create(&self, url: &str) -> AuthSession {
        let key = self.key_for(url);
        self.lock()
            .entry(key)
            .or_insert_with_key(|key| AuthSession::new(key, self.inner.deps.clone()))
            .clone()
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<AuthSession> {
        let key = self.key_for(url);
        self.lock().get(&key).cloned()
    }

    /// Tear down and forget the session for `url`. Returns whether one existed.
    pub fn remove(&self, url: &str) -> bool {
        let key = self.key_for(url);
        let Some(session) = self.lock().remove(&key) else {
            return false;
        };
        if let Err(err) = session.destroy() {
            tracing::error!(error = %err, key = %key, "session teardown failed");
        }
        true
    }

    /// The session for the page's own origin.
    ///
    /// On first access an auto-init is scheduled for when the page is ready;
    /// it only runs if this is still the only registered session by then.
    pub fn default_session(&self) -> AuthSession {
        let (session, created) = {
            let mut sessions = self.lock();
            if let Some(session) = sessions.get(LOCAL_KEY) {
                (session.clone(), false)
            } else {
                let session = AuthSession::new(LOCAL_KEY, self.inner.deps.clone());
                sessions.insert(LOCAL_KEY.to_owned(), session.clone());
                (session, true)
            }
        };

        if created {
            let registry = self.clone();
            let candidate = session.clone();
            tokio::spawn(async move {
                registry.inner.deps.page.when_ready().await;
                tokio::time::sleep(AUTO_INIT_DELAY).await;
                if registry.is_sole_default(&candidate) {
                    tracing::debug!("auto-initializing default session");
                    drop(candidate.init(None));
                } else {
                    tracing::debug!(sessions = registry.len(), "skipping auto-init");
                }
            });
        }
        session
    }

    /// Listen on the default session.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> Propagation + Send + Sync + 'static,
    {
        self.default_session().on(listener)
    }

    /// Forward a page navigation signal to every session.
    pub fn navigation(&self, signal: NavigationSignal) {
        let sessions: Vec<AuthSession> = self.lock().values().cloned().collect();
        for session in sessions {
            session.navigation(signal);
        }
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn is_sole_default(&self, candidate: &AuthSession) -> bool {
        let sessions = self.lock();
        sessions.len() == 1 && sessions.get(LOCAL_KEY).is_some_and(|s| s.ptr_eq(candidate))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AuthSession>> {
        self.inner.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
