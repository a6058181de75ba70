//! Shared fixtures for session and registry tests.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use crate::bus::{LocalBus, LocalHub};
use crate::config::AuthConfig;
use crate::events::{AuthEvent, Propagation};
use crate::host::MemoryHostPage;
use crate::jwt::JwtSource;
use crate::registry::AuthRegistry;
use crate::session::{AuthSession, SessionDeps};
use crate::transport::{AuthRequest, AuthResponse, HttpTransport, TransportError};

pub const PAGE_ORIGIN: &str = "https://host.example";

// =============================================================================
// MOCK TRANSPORT
// =============================================================================

pub enum MockReply {
    Json(u16, Value),
    Fail(String),
    /// Wait for the notify before producing the inner reply.
    Held(Arc<Notify>, Box<MockReply>),
}

/// Scripted transport keyed by request path. Unscripted requests fail.
#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<AuthRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, path: &str, reply: MockReply) {
        self.replies.lock().unwrap().entry(path.to_owned()).or_default().push_back(reply);
    }

    pub fn json(&self, path: &str, status: u16, body: Value) {
        self.reply(path, MockReply::Json(status, body));
    }

    /// Script a reply that is only delivered after the returned notify fires.
    pub fn hold(&self, path: &str, status: u16, body: Value) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.reply(path, MockReply::Held(release.clone(), Box::new(MockReply::Json(status, body))));
        release
    }

    pub fn requests(&self, path: &str) -> Vec<AuthRequest> {
        self.requests.lock().unwrap().iter().filter(|r| r.url.path() == path).cloned().collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    /// Paths of every request, in the order they were sent.
    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.url.path().to_owned()).collect()
    }
}

#[async_trait::async_trait]
impl HttpTransport for MockTransport {
    async fn post(&self, request: AuthRequest) -> Result<AuthResponse, TransportError> {
        let path = request.url.path().to_owned();
        self.requests.lock().unwrap().push(request);
        let scripted = self.replies.lock().unwrap().get_mut(&path).and_then(VecDeque::pop_front);

        let mut reply = scripted.unwrap_or_else(|| MockReply::Fail(format!("no reply scripted for {path}")));
        loop {
            match reply {
                MockReply::Json(status, body) => return Ok(AuthResponse::json(status, &body)),
                MockReply::Fail(message) => return Err(TransportError::Request(message)),
                MockReply::Held(release, inner) => {
                    release.notified().await;
                    reply = *inner;
                }
            }
        }
    }
}

// =============================================================================
// WINDOWS
// =============================================================================

/// One simulated browser window: its page, transport, bus handle and registry.
pub struct Window {
    pub page: Arc<MemoryHostPage>,
    pub transport: Arc<MockTransport>,
    pub bus: LocalBus,
    pub registry: AuthRegistry,
}

impl Window {
    pub fn join(hub: &LocalHub, page: MemoryHostPage) -> Self {
        let page = Arc::new(page);
        let transport = MockTransport::new();
        let bus = hub.join();
        let deps = SessionDeps::new(transport.clone(), Arc::new(bus.clone()), page.clone(), AuthConfig::default());
        Self { page, transport, bus, registry: AuthRegistry::new(deps) }
    }

    /// A window that leads its own hub.
    pub fn alone() -> Self {
        Self::join(&LocalHub::new(), MemoryHostPage::new(PAGE_ORIGIN))
    }

    pub fn alone_with(page: MemoryHostPage) -> Self {
        Self::join(&LocalHub::new(), page)
    }

    /// The session for the page's own origin, without auto-init.
    pub fn session(&self) -> AuthSession {
        self.registry.get_or_create("")
    }

    pub fn alert_messages(&self) -> Vec<String> {
        self.page.alerts().into_iter().map(|a| a.message).collect()
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Record every event a session emits.
pub fn record_events(session: &AuthSession) -> Arc<Mutex<Vec<AuthEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    session.on(move |event| {
        sink.lock().unwrap().push(event.clone());
        Propagation::Continue
    });
    events
}

/// A factory that hands out `tok1`, `tok2`, ... and counts refreshes.
pub fn counting_factory() -> (JwtSource, Arc<Mutex<Vec<bool>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    let source = JwtSource::from_fn(move |refresh| {
        let n = {
            let mut log = log.lock().unwrap();
            log.push(refresh);
            log.len()
        };
        async move { Ok(format!("tok{n}")) }
    });
    (source, calls)
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future).await.expect("timed out")
}
