//! Cross-window authentication coordinator for embedded drop-in apps.
//!
//! SYSTEM CONTEXT
//! ==============
//! A host page embeds components served from one or more drop-in back-ends.
//! Each back-end gets one [`AuthSession`], looked up through an
//! [`AuthRegistry`] by normalized base URL. Sessions establish the user with
//! a JWT, an ambient page user, or the cookie session, and expose gates that
//! other subsystems await before talking to the back-end.
//!
//! Several windows of the same application coordinate over a [`MessageBus`]:
//! only the elected leader calls the user endpoint; followers ask the leader
//! and commit the user it distributes.

pub mod bus;
pub mod casing;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod host;
pub mod jwt;
pub mod origin;
pub mod registry;
pub mod session;
pub mod transition;
pub mod transport;
pub mod user;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bus::{LocalBus, LocalHub, MessageBus};
pub use config::AuthConfig;
pub use error::{AuthError, ErrorCode};
pub use events::{AuthEvent, Propagation, UserState};
pub use gate::{Gate, GateError, Waiter};
pub use host::{HostPage, MemoryHostPage, NavigationSignal};
pub use jwt::{JwtFactory, JwtSource};
pub use registry::AuthRegistry;
pub use session::{AuthSession, SessionDeps};
pub use transport::{HttpTransport, ReqwestTransport};
pub use user::{User, UserId};
