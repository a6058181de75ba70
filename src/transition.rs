//! Classification of user transitions.
//!
//! Given the last committed state and the user about to be committed, decide
//! the `user` event label and whether the change deserves an alert. Pure so
//! the table can be tested without a session.

use crate::events::UserState;
use crate::user::{User, UserId};

pub const SIGNED_OUT_MESSAGE: &str = "You have been signed out.";
pub const CHANGED_USER_MESSAGE: &str = "The signed in user has changed.";
pub const SIGNED_IN_MESSAGE: &str = "You have signed in.";
pub const AUTH_ERROR_MESSAGE: &str = "Authentication error.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: UserState,
    pub alert: Option<&'static str>,
}

impl Transition {
    const fn quiet(state: UserState) -> Self {
        Self { state, alert: None }
    }

    const fn loud(state: UserState, message: &'static str) -> Self {
        Self { state, alert: Some(message) }
    }
}

/// Classify committing `next` (which must carry an id).
///
/// - authorized before, `-1` now: `signed-out`, alert
/// - authorized before, another id now: `changed-user`, alert
/// - authenticated but not authorized before, or never resolved, valid id
///   now: `signed-in`; alert only if the session was already authenticated
///   and the page still names a different user
/// - anything else, including a valid id after a cleared session: `updated`
#[must_use]
pub fn classify(
    authenticated: Option<bool>,
    previous: Option<&User>,
    next: &User,
    ambient_user: Option<UserId>,
) -> Transition {
    let was_authorized = authenticated == Some(true) && previous.is_some_and(User::is_authorized);

    if was_authorized {
        if next.is_signed_out() {
            return Transition::loud(UserState::SignedOut, SIGNED_OUT_MESSAGE);
        }
        if previous.map(|p| p.id) != Some(next.id) {
            return Transition::loud(UserState::ChangedUser, CHANGED_USER_MESSAGE);
        }
        return Transition::quiet(UserState::Updated);
    }

    if next.is_authorized() && authenticated != Some(false) {
        let page_is_stale = authenticated == Some(true) && ambient_user.is_some_and(|id| Some(id) != next.id);
        return if page_is_stale {
            Transition::loud(UserState::SignedIn, SIGNED_IN_MESSAGE)
        } else {
            Transition::quiet(UserState::SignedIn)
        };
    }

    Transition::quiet(UserState::Updated)
}

#[cfg(test)]
#[path = "transition_test.rs"]
mod tests;
