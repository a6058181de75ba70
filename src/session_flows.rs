//! Sign-in, sign-out and user probing.
//!
//! Each entry point mutates session state synchronously, spawns the network
//! part, and hands back a gate waiter. Responses are checked against the
//! generation captured before the request went out.

use serde_json::json;

use super::AuthSession;
use crate::bus::{BusMessage, Payload};
use crate::error::{AuthError, ErrorCode};
use crate::events::{AuthEvent, AuthenticationErrorEvent};
use crate::gate::Waiter;
use crate::jwt::JwtSource;
use crate::transport::{AuthRequest, AuthResponse, parse_user_response};
use crate::user::{User, UserId};

/// Status that triggers one token refresh and retry.
const UNAUTHORIZED: u16 = 401;

enum Start {
    Jwt,
    Ambient(UserId),
    Probe,
    Nothing,
}

impl AuthSession {
    // =========================================================================
    // ENTRY POINTS
    // =========================================================================

    /// Establish the session once.
    ///
    /// Runs when no user has ever been committed, or when `jwt` names a source
    /// different from the configured one. With a JWT source the token is
    /// validated by the leader; otherwise an ambient user on the page is taken
    /// as-is; otherwise the user endpoint is probed. Later calls only return
    /// the `authenticated` waiter.
    pub fn init(&self, jwt: Option<JwtSource>) -> Waiter<User> {
        let ambient = self.inner.deps.page.ambient_user().filter(|id| *id != 0);
        let start = {
            let mut state = self.lock();
            let new_source = jwt.as_ref().is_some_and(|source| !state.jwt.is_same_source(source));
            if state.authenticated.is_none() || new_source {
                if let Some(source) = jwt {
                    state.jwt.set(source);
                }
                if new_source {
                    state.generation += 1;
                }
                if state.jwt.is_configured() {
                    Start::Jwt
                } else if let Some(id) = ambient {
                    Start::Ambient(id)
                } else {
                    Start::Probe
                }
            } else {
                Start::Nothing
            }
        };

        // Relay handlers must be in place before any request goes out, or a
        // leader's answer can arrive with nobody listening.
        self.subscribe_once();

        match start {
            Start::Jwt => {
                if self.check_endpoints() {
                    self.spawn_validate_jwt();
                }
            }
            Start::Ambient(id) => {
                tracing::debug!(base_url = %self.inner.base_url, id, "init with ambient user");
                self.set_user(Some(&User::with_id(id)), "init/ambient");
            }
            Start::Probe => {
                drop(self.update_user_state("init"));
            }
            Start::Nothing => {}
        }

        self.inner.authenticated.wait()
    }

    /// Validate a token with the server, optionally replacing the source first.
    pub fn sign_in(&self, jwt: Option<JwtSource>) -> Waiter<User> {
        {
            let mut state = self.lock();
            if let Some(source) = jwt {
                state.jwt.set(source);
            }
            state.generation += 1;
        }
        self.inner.authenticated.reset();
        self.inner.authorized.reset();

        let waiter = self.inner.authenticated.wait();
        if self.check_endpoints() {
            self.spawn_validate_jwt();
        }
        waiter
    }

    /// End the session on the server, then commit the signed-out user.
    ///
    /// The commit happens whether or not the logout request succeeds. With
    /// `clear` the JWT source is forgotten as well.
    pub fn sign_out(&self, clear: bool) -> Waiter<()> {
        {
            let mut state = self.lock();
            state.signing_out = true;
            self.inner.signed_out.reset();
            if clear {
                state.jwt.clear();
            }
            state.generation += 1;
        }
        tracing::info!(base_url = %self.inner.base_url, clear, "signing out");
        self.inner.events.trigger(&AuthEvent::ClearUser);

        let waiter = self.inner.signed_out.wait();
        let lifetime = self.lifetime();
        let session = self.clone();
        tokio::spawn(async move {
            match session.endpoints() {
                Ok(endpoints) => {
                    let request = AuthRequest::new(endpoints.logout.clone());
                    if let Err(err) = session.inner.deps.transport.post(request).await {
                        tracing::warn!(error = %err, "sign-out request failed");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "sign-out without logout request"),
            }
            if session.lifetime() != lifetime {
                tracing::debug!("session torn down during sign-out");
                return;
            }
            tracing::debug!("sign-out done, processing user");
            session.process_user(User::signed_out(), "signOut()");
        });
        waiter
    }

    /// Ask for the current user. Overlapping calls share one probe.
    ///
    /// Followers ask the leader window; the leader calls the user endpoint,
    /// with the JWT in the body when one is configured.
    pub fn update_user_state(&self, reason: &str) -> Waiter<User> {
        let waiter = self.inner.authenticated.wait();
        if !self.check_endpoints() {
            return waiter;
        }

        let start = {
            let mut state = self.lock();
            !std::mem::replace(&mut state.updating, true)
        };
        if start {
            let session = self.clone();
            let reason = reason.to_owned();
            tokio::spawn(async move { session.run_update(&reason).await });
        } else {
            tracing::debug!(reason, "user update already in flight");
        }
        waiter
    }

    // =========================================================================
    // FLOWS
    // =========================================================================

    fn spawn_validate_jwt(&self) {
        let session = self.clone();
        tokio::spawn(async move {
            session.inner.deps.bus.await_leadership().await;
            session.validate_jwt().await;
        });
    }

    async fn validate_jwt(&self) {
        loop {
            let pending_sign_out = {
                let state = self.lock();
                if state.signing_out {
                    Some(self.inner.signed_out.wait())
                } else {
                    self.inner.signed_out.reset();
                    None
                }
            };
            let Some(waiter) = pending_sign_out else { break };
            tracing::debug!("sign-in waits for sign-out");
            if waiter.await.is_err() {
                return;
            }
        }

        let generation = self.generation();
        tracing::debug!(base_url = %self.inner.base_url, "validating jwt");
        self.inner.events.trigger(&AuthEvent::SigningIn);

        let result = self.request_login().await;
        if !self.is_current(generation) {
            tracing::debug!("dropping stale sign-in response");
            return;
        }

        match result {
            Ok(user) => self.process_user(user, "validateJwt"),
            Err(err) => {
                tracing::error!(error = %err, code = err.error_code(), "could not validate jwt");
                self.inner.events.trigger(&AuthEvent::AuthenticationError(AuthenticationErrorEvent {
                    method: "jwt".to_owned(),
                    status: UNAUTHORIZED,
                    message: err.to_string(),
                }));
                self.process_user(User::unknown(), "validateJwt");
            }
        }
    }

    async fn run_update(&self, reason: &str) {
        if !self.inner.deps.bus.await_leadership().await {
            tracing::debug!(reason, "requesting user from leader");
            self.inner.deps.bus.post_to_parent(BusMessage { payload: Payload::RequestUser, scope: self.inner.scope.clone() });
            return;
        }

        let mode = if self.is_provided() { "jwt" } else { "cookie" };
        tracing::debug!(reason, mode, "updating user state");
        self.inner.authenticated.reset();
        self.inner.authorized.reset();

        let generation = self.generation();
        let result = self.request_user().await;
        if !self.is_current(generation) {
            tracing::debug!("dropping stale user response");
            self.lock().updating = false;
            return;
        }

        let origin = format!("updateUserState,{reason}");
        match result {
            Ok(user) => self.process_user(user, &origin),
            Err(err) => {
                tracing::warn!(error = %err, code = err.error_code(), retryable = err.retryable(), "user request failed");
                self.process_user(User::unknown(), &origin);
            }
        }
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    async fn request_login(&self) -> Result<User, AuthError> {
        let url = self.endpoints()?.login.clone();
        let token = self.jwt(false).await?;
        let response = self.post(AuthRequest::new(url.clone()).with_bearer(token)).await?;
        if response.status != UNAUTHORIZED {
            return parse_user_response(&response);
        }

        tracing::warn!("jwt rejected, refreshing and trying again");
        let token = self.jwt(true).await?;
        let response = self.post(AuthRequest::new(url).with_bearer(token)).await?;
        parse_user_response(&response)
    }

    async fn request_user(&self) -> Result<User, AuthError> {
        let url = self.endpoints()?.user.clone();
        if !self.is_provided() {
            let response = self.post(AuthRequest::new(url)).await?;
            return parse_user_response(&response);
        }

        let token = self.jwt(false).await?;
        let response = self.post(AuthRequest::new(url.clone()).with_json(json!({ "jwt": token }))).await?;
        if response.status != UNAUTHORIZED {
            return parse_user_response(&response);
        }

        tracing::warn!("jwt rejected, refreshing and trying again");
        let token = self.jwt(true).await?;
        let response = self.post(AuthRequest::new(url).with_json(json!({ "jwt": token }))).await?;
        parse_user_response(&response)
    }

    async fn post(&self, request: AuthRequest) -> Result<AuthResponse, AuthError> {
        Ok(self.inner.deps.transport.post(request).await?)
    }
}
