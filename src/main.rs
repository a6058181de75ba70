//! Single-window probe: resolve the current user against a drop-in back-end.

use std::sync::Arc;

use dropin_auth::{
    AuthConfig, AuthEvent, AuthRegistry, JwtSource, LocalHub, MemoryHostPage, Propagation, ReqwestTransport, SessionDeps,
    UserState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AuthConfig::from_env()?;
    let page_origin = std::env::var("DROPIN_PAGE_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".into());
    let base_url = std::env::var("DROPIN_BASE_URL").unwrap_or_default();
    let jwt = std::env::var("DROPIN_JWT").ok().filter(|t| !t.trim().is_empty());

    let transport = Arc::new(ReqwestTransport::new(&config)?);
    let bus = Arc::new(LocalHub::new().join());
    let page = Arc::new(MemoryHostPage::new(page_origin));
    let registry = AuthRegistry::new(SessionDeps::new(transport, bus, page, config));

    let session = registry.get_or_create(&base_url);
    tracing::info!(base_url = %session.base_url(), jwt = jwt.is_some(), "resolving user");

    // A failed sign-in never resolves the authenticated gate; the user event
    // is the only signal in that case.
    let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    session.on(move |event| {
        if let AuthEvent::User(user_event) = event {
            let _ = tx.send(user_event.clone());
        }
        Propagation::Continue
    });

    let ready = match jwt {
        Some(token) => {
            let token = Arc::new(token);
            let source = JwtSource::from_fn(move |_refresh| {
                let token = token.clone();
                async move { Ok(token.as_str().to_owned()) }
            });
            session.sign_in(Some(source))
        }
        None => session.init(None),
    };

    tokio::select! {
        result = ready => {
            let user = result?;
            tracing::info!(id = ?user.id, authorized = user.is_authorized(), "user resolved");
        }
        Some(event) = events.recv() => {
            if event.state == UserState::UserError {
                tracing::warn!("no user could be resolved");
            } else {
                tracing::info!(id = ?event.user.id, authorized = event.authorized, state = event.state.as_str(), "user resolved");
            }
        }
    }
    Ok(())
}
