//! The host page a session is embedded in.
//!
//! SYSTEM CONTEXT
//! ==============
//! The page has its own idea of who is signed in (the ambient user, rendered
//! into the page by the server) and a surface for user-facing alerts. Page
//! navigations are reported to sessions as [`NavigationSignal`]s.

use std::sync::Mutex;

use crate::user::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Info,
    Danger,
}

/// Stable id so repeated authentication alerts replace each other.
pub const AUTH_ALERT_ID: &str = "authentication-alert";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    /// Offer a page reload next to the message.
    pub reload: bool,
    pub id: &'static str,
}

impl Alert {
    #[must_use]
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), reload: true, id: AUTH_ALERT_ID }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSignal {
    /// The page is about to unload.
    BeforeUnload,
    /// An in-page navigation request started.
    RequestStart,
    /// A navigation finished and the page is interactive again.
    Load,
}

#[async_trait::async_trait]
pub trait HostPage: Send + Sync {
    /// Origin of the page, e.g. `https://host.example`.
    fn origin(&self) -> String;

    fn ambient_user(&self) -> Option<UserId>;

    fn set_ambient_user(&self, id: Option<UserId>);

    fn alert(&self, alert: Alert);

    /// Resolves once the page's document is ready.
    async fn when_ready(&self);
}

#[derive(Default)]
struct PageState {
    ambient_user: Option<UserId>,
    alerts: Vec<Alert>,
}

/// Host page kept in memory. Always ready; records alerts.
#[derive(Default)]
pub struct MemoryHostPage {
    origin: String,
    state: Mutex<PageState>,
}

impl MemoryHostPage {
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self { origin: origin.into(), state: Mutex::new(PageState::default()) }
    }

    #[must_use]
    pub fn with_ambient_user(self, id: UserId) -> Self {
        self.lock().ambient_user = Some(id);
        self
    }

    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl HostPage for MemoryHostPage {
    fn origin(&self) -> String {
        self.origin.clone()
    }

    fn ambient_user(&self) -> Option<UserId> {
        self.lock().ambient_user
    }

    fn set_ambient_user(&self, id: Option<UserId>) {
        self.lock().ambient_user = id;
    }

    fn alert(&self, alert: Alert) {
        tracing::info!(kind = ?alert.kind, message = %alert.message, "alert");
        self.lock().alerts.push(alert);
    }

    async fn when_ready(&self) {}
}
