//! HTTP transport for the drop-in client endpoints.
//!
//! ARCHITECTURE
//! ============
//! Sessions talk to the server through the `HttpTransport` capability so the
//! state machine can be driven by a scripted transport in tests. The
//! production `ReqwestTransport` mirrors a browser `fetch` with
//! `credentials: include` (cookie store) and `redirect: manual` (redirects
//! are returned, never followed).
//!
//! ERROR HANDLING
//! ==============
//! A transport error means no HTTP status was received at all. Any status,
//! including 3xx and 401, is returned as an `AuthResponse` and interpreted by
//! [`parse_user_response`].

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::user::User;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("response body read failed: {0}")]
    Body(String),
    #[error("HTTP client build failed: {0}")]
    ClientBuild(String),
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// A POST to one of the drop-in endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRequest {
    pub url: Url,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
    /// Sent as a JSON body.
    pub body: Option<Value>,
}

impl AuthRequest {
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self { url, bearer: None, body: None }
    }

    #[must_use]
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub status: u16,
    /// Media type without parameters, e.g. `application/json`.
    pub content_type: Option<String>,
    pub body: String,
}

impl AuthResponse {
    #[must_use]
    pub fn json(status: u16, body: &Value) -> Self {
        Self { status, content_type: Some("application/json".to_owned()), body: body.to_string() }
    }

    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.eq_ignore_ascii_case("application/json") || ct.to_ascii_lowercase().ends_with("json"))
    }
}

// =============================================================================
// CAPABILITY
// =============================================================================

#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: AuthRequest) -> Result<AuthResponse, TransportError>;
}

// =============================================================================
// REQWEST
// =============================================================================

pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a cookie-keeping, non-redirecting client.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: AuthRequest) -> Result<AuthResponse, TransportError> {
        let mut builder = self
            .http
            .post(request.url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &request.bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        } else {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }

        let response = builder.send().await.map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_owned());
        let body = response.text().await.map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(AuthResponse { status, content_type, body })
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Interpret an endpoint response as a user.
///
/// A 2xx JSON body becomes the user. A 2xx body that is not JSON, or does not
/// parse as a user, yields an unknown user so the caller takes the user-error
/// path.
///
/// # Errors
///
/// Non-2xx responses become [`AuthError::Rejected`] carrying the first of
/// `detail`, `title` or `message` from a JSON error body, falling back to the
/// HTTP reason phrase.
pub fn parse_user_response(response: &AuthResponse) -> Result<User, AuthError> {
    if response.ok() {
        if !response.is_json() {
            return Ok(User::unknown());
        }
        let user = serde_json::from_str::<Value>(&response.body)
            .ok()
            .and_then(|value| User::from_json(value).ok())
            .unwrap_or_else(User::unknown);
        return Ok(user);
    }

    let detail = if response.is_json() {
        serde_json::from_str::<Value>(&response.body)
            .ok()
            .map(crate::casing::keys_to_camel_case)
            .and_then(|body| error_detail(&body))
    } else {
        None
    };

    let message = detail.unwrap_or_else(|| reason_phrase(response.status));
    Err(AuthError::Rejected { status: response.status, message })
}

fn error_detail(body: &Value) -> Option<String> {
    ["detail", "title", "message"]
        .iter()
        .filter_map(|key| body.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map_or_else(|| status.to_string(), str::to_owned)
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
