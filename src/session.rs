//! Per-origin authentication session.
//!
//! ARCHITECTURE
//! ============
//! One `AuthSession` exists per normalized base URL. It owns the committed
//! user, the JWT cache and three gates (`authenticated`, `authorized`,
//! `signed_out`) that dependent subsystems await. Network round-trips and
//! leadership waits run on spawned Tokio tasks; public operations return a
//! gate [`Waiter`] immediately, so sessions must be driven from within a
//! Tokio runtime.
//!
//! Every path that learns something about the user funnels into
//! [`AuthSession::process_user`], which classifies the transition, commits it,
//! and emits events.
//!
//! CONCURRENCY
//! ===========
//! State lives behind one mutex that is never held across an `.await` or
//! while listeners run. `updating` collapses overlapping user probes;
//! `signing_out` defers JWT sign-in until sign-out settles. A generation
//! counter fences responses: `sign_in`, `sign_out`, `init` with a new JWT
//! source and `destroy` bump it, and a response that arrives for an older
//! generation is dropped. A pending sign-out is only abandoned by `destroy`,
//! which bumps a separate lifetime counter.
//!
//! A classification and the commit it describes happen under the same lock,
//! so concurrent commits see each other's result and cannot both report the
//! same transition.

#[path = "session_flows.rs"]
mod session_flows;
#[path = "session_messages.rs"]
mod session_messages;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Url;

use crate::bus::{MessageBus, Scope, SubscriptionId, Topic};
use crate::config::{AuthConfig, LOGIN_PATH, LOGOUT_PATH, USER_PATH};
use crate::error::AuthError;
use crate::events::{AuthEvent, EventEmitter, ListenerId, Propagation, UserEvent, UserState};
use crate::gate::{Gate, GateState, Waiter};
use crate::host::{Alert, AlertKind, HostPage, NavigationSignal};
use crate::jwt::{JwtCache, JwtError, JwtSource};
use crate::origin::base_url_for;
use crate::transition::{AUTH_ERROR_MESSAGE, classify};
use crate::transport::HttpTransport;
use crate::user::User;

// =============================================================================
// DEPENDENCIES
// =============================================================================

/// Capabilities a session is built from. Shared by every session of a registry.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn HttpTransport>,
    pub bus: Arc<dyn MessageBus>,
    pub page: Arc<dyn HostPage>,
    pub config: AuthConfig,
}

impl SessionDeps {
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        bus: Arc<dyn MessageBus>,
        page: Arc<dyn HostPage>,
        config: AuthConfig,
    ) -> Self {
        Self { transport, bus, page, config }
    }
}

#[derive(Debug, Clone)]
struct Endpoints {
    login: Url,
    logout: Url,
    user: Url,
}

impl Endpoints {
    fn resolve(base_url: &str) -> Result<Self, String> {
        let base = Url::parse(base_url).map_err(|e| e.to_string())?;
        let join = |path: &str| base.join(path).map_err(|e| e.to_string());
        Ok(Self { login: join(LOGIN_PATH)?, logout: join(LOGOUT_PATH)?, user: join(USER_PATH)? })
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Default)]
struct SessionState {
    user: Option<User>,
    /// `None` until the first user has been committed.
    authenticated: Option<bool>,
    jwt: JwtCache,
    updating: bool,
    navigating: bool,
    signing_out: bool,
    initialized: bool,
    generation: u64,
    /// Bumped by `destroy`; work started before a teardown is discarded.
    lifetime: u64,
    subscriptions: Vec<(Topic, SubscriptionId)>,
}

/// Snapshot of the three gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStates {
    pub authenticated: GateState,
    pub authorized: GateState,
    pub signed_out: GateState,
}

struct SessionInner {
    key: String,
    base_url: String,
    scope: Scope,
    endpoints: Result<Endpoints, String>,
    deps: SessionDeps,
    state: Mutex<SessionState>,
    authenticated: Gate<User>,
    authorized: Gate<()>,
    signed_out: Gate<()>,
    events: EventEmitter,
}

#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("key", &self.inner.key)
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Create a session for an already-normalized registry key.
    #[must_use]
    pub fn new(key: &str, deps: SessionDeps) -> Self {
        let base_url = base_url_for(key, &deps.page.origin(), &deps.config.application_path);
        let endpoints = Endpoints::resolve(&base_url);
        if let Err(reason) = &endpoints {
            tracing::warn!(%base_url, %reason, "session base url is not usable");
        }
        tracing::debug!(key, %base_url, "create authentication session");

        Self {
            inner: Arc::new(SessionInner {
                key: key.to_owned(),
                scope: Scope::authentication(&base_url),
                base_url,
                endpoints,
                deps,
                state: Mutex::new(SessionState::default()),
                authenticated: Gate::new("authenticated"),
                authorized: Gate::new("authorized"),
                signed_out: Gate::new("signed_out"),
                events: EventEmitter::new(),
            }),
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Whether `user`, or the committed user when `None`, is signed in.
    #[must_use]
    pub fn is_authorized(&self, user: Option<&User>) -> bool {
        match user {
            Some(user) => user.is_authorized(),
            None => self.lock().user.as_ref().is_some_and(User::is_authorized),
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated == Some(true)
    }

    /// Tri-state: `None` until a user has been committed once.
    #[must_use]
    pub fn authentication_state(&self) -> Option<bool> {
        self.lock().authenticated
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Whether a JWT source is configured.
    #[must_use]
    pub fn is_provided(&self) -> bool {
        self.lock().jwt.is_configured()
    }

    #[must_use]
    pub fn is_navigating(&self) -> bool {
        self.lock().navigating
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.lock().user.clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &AuthSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn when_authenticated(&self) -> Waiter<User> {
        self.inner.authenticated.wait()
    }

    pub fn when_authorized(&self) -> Waiter<()> {
        self.inner.authorized.wait()
    }

    pub fn when_signed_out(&self) -> Waiter<()> {
        self.inner.signed_out.wait()
    }

    #[must_use]
    pub fn gates(&self) -> GateStates {
        GateStates {
            authenticated: self.inner.authenticated.state(),
            authorized: self.inner.authorized.state(),
            signed_out: self.inner.signed_out.state(),
        }
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> Propagation + Send + Sync + 'static,
    {
        self.inner.events.on(listener)
    }

    pub fn one<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AuthEvent) -> Propagation + Send + Sync + 'static,
    {
        self.inner.events.one(listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    // =========================================================================
    // JWT
    // =========================================================================

    /// Replace the JWT source. The cached token is dropped.
    pub fn set_jwt(&self, source: JwtSource) {
        self.lock().jwt.set(source);
    }

    /// Forget the JWT source; later probes use the cookie session.
    pub fn clear_jwt(&self) {
        self.lock().jwt.clear();
    }

    /// Current token, from cache unless `refresh` forces the source again.
    ///
    /// # Errors
    ///
    /// Returns an error if no source is configured or the source does not
    /// produce a non-empty token.
    pub async fn jwt(&self, refresh: bool) -> Result<String, AuthError> {
        let source = {
            let mut state = self.lock();
            if refresh {
                state.jwt.invalidate();
            } else if let Some(token) = state.jwt.cached() {
                return Ok(token.to_owned());
            }
            state.jwt.source()
        };
        let source = source.ok_or(JwtError::NotConfigured)?;
        let token = source.fetch(refresh).await?;
        self.lock().jwt.store(&source, token.clone());
        Ok(token)
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    /// Classify and commit `user`, then emit events.
    ///
    /// A user without an id clears the session and emits `clear-user` and a
    /// `user-error` event; unless a listener vetoes it, the leader window
    /// shows an authentication error alert.
    pub fn process_user(&self, user: User, origin: &str) {
        if user.has_id() {
            let ambient = self.inner.deps.page.ambient_user();
            let transition = {
                let mut state = self.lock();
                let transition = classify(state.authenticated, state.user.as_ref(), &user, ambient);
                self.commit(&mut state, Some(&user), origin);
                transition
            };
            self.inner.deps.page.set_ambient_user(user.id);

            if transition.state != UserState::Updated {
                tracing::info!(base_url = %self.inner.base_url, state = transition.state.as_str(), origin, "user transition");
            }
            if let Some(message) = transition.alert {
                self.alert(AlertKind::Info, message);
            }

            let authorized = user.is_authorized();
            self.inner.events.trigger(&AuthEvent::User(UserEvent { state: transition.state, authorized, user }));
        } else {
            self.set_user(None, origin);
            self.inner.events.trigger(&AuthEvent::ClearUser);

            let event = AuthEvent::User(UserEvent { state: UserState::UserError, authorized: false, user });
            if self.inner.events.trigger(&event) {
                let session = self.clone();
                tokio::spawn(async move {
                    if session.inner.deps.bus.await_leadership().await {
                        session.alert(AlertKind::Danger, AUTH_ERROR_MESSAGE);
                    }
                });
            }
        }

        self.lock().updating = false;
    }

    /// Commit `user` and settle gates. `None`, or a user without an id,
    /// clears the session.
    fn set_user(&self, user: Option<&User>, origin: &str) {
        let committed = user.filter(|u| u.has_id());
        self.commit(&mut self.lock(), committed, origin);
        self.inner.deps.page.set_ambient_user(committed.and_then(|u| u.id));
    }

    /// State and gate half of a commit. Runs under the state lock so a
    /// classification and its commit cannot interleave with another commit.
    fn commit(&self, state: &mut SessionState, user: Option<&User>, origin: &str) {
        let inner = &self.inner;
        match user.filter(|u| u.has_id()) {
            Some(user) => {
                if state.user.as_ref().is_some_and(|current| current.id != user.id) {
                    tracing::debug!(base_url = %inner.base_url, id = ?user.id, origin, "set user");
                }
                state.user = Some(user.clone());
                state.authenticated = Some(true);
                if user.is_authorized() {
                    inner.authorized.resolve(());
                    inner.signed_out.reset();
                } else {
                    inner.authorized.reset();
                    state.signing_out = false;
                    inner.signed_out.resolve(());
                }
                inner.authenticated.resolve(user.clone());
            }
            None => {
                state.user = None;
                state.authenticated = Some(false);
                inner.authorized.reset();
            }
        }
    }

    fn alert(&self, kind: AlertKind, message: &str) {
        if self.lock().navigating {
            tracing::debug!(message, "alert suppressed during navigation");
            return;
        }
        self.inner.deps.page.alert(Alert::new(kind, message));
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    /// React to host page navigation. Alerts are suppressed from unload until
    /// the next load; on load, a page that now names a different user is
    /// processed right away.
    pub fn navigation(&self, signal: NavigationSignal) {
        match signal {
            NavigationSignal::BeforeUnload | NavigationSignal::RequestStart => {
                self.lock().navigating = true;
            }
            NavigationSignal::Load => {
                let current = {
                    let mut state = self.lock();
                    state.navigating = false;
                    state.user.as_ref().and_then(|u| u.id)
                };
                let ambient = self.inner.deps.page.ambient_user().filter(|id| *id != 0);
                if let (Some(current), Some(ambient)) = (current, ambient) {
                    if current != ambient {
                        self.process_user(User::with_id(ambient), "navigation:load/ambient");
                    }
                }
            }
        }
    }

    // =========================================================================
    // TEARDOWN
    // =========================================================================

    /// Drop secrets and the committed user, and unsubscribe from the bus.
    ///
    /// # Errors
    ///
    /// Returns the first bus error; every subscription is still attempted.
    pub fn destroy(&self) -> Result<(), AuthError> {
        let subscriptions = {
            let mut state = self.lock();
            state.authenticated = None;
            state.user = None;
            state.jwt.clear();
            state.initialized = false;
            state.updating = false;
            state.signing_out = false;
            state.generation += 1;
            state.lifetime += 1;
            std::mem::take(&mut state.subscriptions)
        };
        self.inner.events.clear();

        let mut result = Ok(());
        for (topic, id) in subscriptions {
            if let Err(err) = self.inner.deps.bus.off(topic, &self.inner.scope, id) {
                if result.is_ok() {
                    result = Err(err.into());
                }
            }
        }
        tracing::debug!(base_url = %self.inner.base_url, "session destroyed");
        result
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn endpoints(&self) -> Result<&Endpoints, AuthError> {
        self.inner.endpoints.as_ref().map_err(|reason| AuthError::InvalidBaseUrl {
            url: self.inner.base_url.clone(),
            reason: reason.clone(),
        })
    }

    /// Reject `authenticated` when the base URL cannot be used. Returns
    /// `true` when network flows may start.
    fn check_endpoints(&self) -> bool {
        match self.endpoints() {
            Ok(_) => true,
            Err(err) => {
                tracing::error!(error = %err, "cannot authenticate");
                self.inner.authenticated.reject(err.to_string());
                false
            }
        }
    }

    fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn lifetime(&self) -> u64 {
        self.lock().lifetime
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
