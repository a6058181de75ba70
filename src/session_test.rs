use super::*;
use crate::config::{LOGIN_PATH, LOGOUT_PATH, USER_PATH};
use crate::events::AuthenticationErrorEvent;
use crate::gate::GateError;
use crate::host::MemoryHostPage;
use crate::test_helpers::*;
use crate::transition::{CHANGED_USER_MESSAGE, SIGNED_OUT_MESSAGE};
use serde_json::json;

fn user_states(events: &Mutex<Vec<AuthEvent>>) -> Vec<UserState> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AuthEvent::User(u) => Some(u.state),
            _ => None,
        })
        .collect()
}

fn names(events: &Mutex<Vec<AuthEvent>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(AuthEvent::name).collect()
}

// =============================================================================
// INIT
// =============================================================================

#[tokio::test]
async fn init_with_ambient_user_commits_without_network() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(42));
    let session = w.session();

    let user = within(session.init(None)).await.unwrap();

    assert_eq!(user.id, Some(42));
    within(session.when_authorized()).await.unwrap();
    assert!(session.is_authenticated());
    assert!(w.transport.paths().is_empty());
}

#[tokio::test]
async fn init_with_jwt_refreshes_once_after_401() {
    let w = Window::alone();
    w.transport.json(LOGIN_PATH, 401, json!({ "detail": "expired" }));
    w.transport.json(LOGIN_PATH, 200, json!({ "id": 7, "display_name": "Ada" }));
    let session = w.session();
    let events = record_events(&session);
    let (source, factory_calls) = counting_factory();

    let user = within(session.init(Some(source))).await.unwrap();
    settle().await;

    assert_eq!(user.id, Some(7));
    assert_eq!(user.field("displayName"), Some(&json!("Ada")));
    let bearers: Vec<_> = w.transport.requests(LOGIN_PATH).into_iter().map(|r| r.bearer).collect();
    assert_eq!(bearers, vec![Some("tok1".to_owned()), Some("tok2".to_owned())]);
    assert_eq!(*factory_calls.lock().unwrap(), vec![false, true]);
    assert_eq!(user_states(&events), vec![UserState::SignedIn]);
    assert_eq!(names(&events).first(), Some(&"signing-in"));
}

#[tokio::test]
async fn init_probes_user_endpoint_with_cookie_session() {
    let w = Window::alone();
    w.transport.json(USER_PATH, 200, json!({ "id": 5 }));
    let session = w.session();

    let user = within(session.init(None)).await.unwrap();

    assert_eq!(user.id, Some(5));
    let request = &w.transport.requests(USER_PATH)[0];
    assert_eq!(request.bearer, None);
    assert_eq!(request.body, None);
    assert_eq!(w.page.ambient_user(), Some(5));
}

#[tokio::test]
async fn init_twice_does_not_probe_again() {
    let w = Window::alone();
    w.transport.json(USER_PATH, 200, json!({ "id": 5 }));
    let session = w.session();

    within(session.init(None)).await.unwrap();
    let again = within(session.init(None)).await.unwrap();

    assert_eq!(again.id, Some(5));
    assert_eq!(w.transport.calls(USER_PATH), 1);
    assert!(session.is_initialized());
}

#[tokio::test]
async fn sign_in_after_anonymous_probe_commits_user() {
    let w = Window::alone();
    w.transport.json(USER_PATH, 200, json!({ "id": -1 }));
    w.transport.json(LOGIN_PATH, 200, json!({ "id": 3 }));
    let session = w.session();
    within(session.init(None)).await.unwrap();

    let user = within(session.sign_in(Some(JwtSource::from("static")))).await.unwrap();

    assert_eq!(user.id, Some(3));
    assert!(session.is_provided());
}

#[tokio::test]
async fn unusable_base_url_rejects_authenticated() {
    let w = Window::alone_with(MemoryHostPage::new(""));
    let session = w.session();

    let result = within(session.init(None)).await;

    assert!(matches!(result, Err(GateError::Rejected(_))));
    assert!(w.transport.paths().is_empty());
}

// =============================================================================
// JWT FAILURES
// =============================================================================

#[tokio::test]
async fn jwt_rejected_twice_reports_authentication_error() {
    let w = Window::alone();
    w.transport.json(LOGIN_PATH, 401, json!({ "detail": "expired" }));
    w.transport.json(LOGIN_PATH, 401, json!({ "detail": "still expired" }));
    let session = w.session();
    let events = record_events(&session);
    let (source, _) = counting_factory();

    drop(session.sign_in(Some(source)));
    settle().await;

    assert_eq!(w.transport.calls(LOGIN_PATH), 2);
    let errors: Vec<_> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AuthEvent::AuthenticationError(err) => Some(err.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        errors,
        vec![AuthenticationErrorEvent { method: "jwt".to_owned(), status: 401, message: "still expired".to_owned() }]
    );
    assert_eq!(user_states(&events), vec![UserState::UserError]);
    assert_eq!(session.authentication_state(), Some(false));
    assert_eq!(w.alert_messages(), vec![AUTH_ERROR_MESSAGE.to_owned()]);
}

#[tokio::test]
async fn empty_token_fails_without_request() {
    let w = Window::alone();
    let session = w.session();
    let events = record_events(&session);

    drop(session.sign_in(Some(JwtSource::from_fn(|_| async { Ok(String::new()) }))));
    settle().await;

    assert_eq!(w.transport.calls(LOGIN_PATH), 0);
    assert!(names(&events).contains(&"authentication-error"));
    assert!(session.user().is_none());
}

#[tokio::test]
async fn jwt_is_cached_until_refreshed() {
    let w = Window::alone();
    let session = w.session();
    let (source, calls) = counting_factory();
    session.set_jwt(source);

    assert_eq!(session.jwt(false).await.unwrap(), "tok1");
    assert_eq!(session.jwt(false).await.unwrap(), "tok1");
    assert_eq!(session.jwt(true).await.unwrap(), "tok2");
    assert_eq!(calls.lock().unwrap().len(), 2);

    session.clear_jwt();
    assert!(!session.is_provided());
    assert!(session.jwt(false).await.is_err());
}

#[tokio::test]
async fn jwt_mode_probe_posts_token_and_retries_once() {
    let w = Window::alone();
    w.transport.json(USER_PATH, 401, json!({}));
    w.transport.json(USER_PATH, 200, json!({ "id": 9 }));
    let session = w.session();
    let (source, _) = counting_factory();
    session.set_jwt(source);

    let user = within(session.update_user_state("test")).await.unwrap();

    assert_eq!(user.id, Some(9));
    let bodies: Vec<_> = w.transport.requests(USER_PATH).into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec![Some(json!({ "jwt": "tok1" })), Some(json!({ "jwt": "tok2" }))]);
}

#[tokio::test]
async fn cookie_mode_401_is_not_retried() {
    let w = Window::alone();
    w.transport.json(USER_PATH, 401, json!({ "title": "Unauthorized" }));
    let session = w.session();
    let events = record_events(&session);

    drop(session.update_user_state("test"));
    settle().await;

    assert_eq!(w.transport.calls(USER_PATH), 1);
    assert_eq!(user_states(&events), vec![UserState::UserError]);
}

// =============================================================================
// SIGN-OUT
// =============================================================================

#[tokio::test]
async fn processing_signed_out_user_alerts_and_flips_gates() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    session.process_user(User::signed_out(), "test");

    assert_eq!(user_states(&events), vec![UserState::SignedOut]);
    assert_eq!(w.alert_messages(), vec![SIGNED_OUT_MESSAGE.to_owned()]);
    let gates = session.gates();
    assert_eq!(gates.authorized, GateState::Pending);
    assert_eq!(gates.signed_out, GateState::Resolved);
    assert!(!session.is_authorized(None));
    assert_eq!(w.page.ambient_user(), Some(-1));
}

#[tokio::test]
async fn sign_out_completes_when_logout_fails() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    within(session.sign_out(false)).await.unwrap();

    assert_eq!(w.transport.calls(LOGOUT_PATH), 1);
    assert_eq!(session.user().and_then(|u| u.id), Some(-1));
    assert_eq!(names(&events), vec!["clear-user", "user"]);
}

#[tokio::test]
async fn sign_out_with_clear_forgets_jwt() {
    let w = Window::alone();
    w.transport.json(LOGOUT_PATH, 200, json!({}));
    let session = w.session();
    session.set_jwt(JwtSource::from("abc"));

    within(session.sign_out(true)).await.unwrap();

    assert!(!session.is_provided());
}

#[tokio::test]
async fn sign_in_waits_for_pending_sign_out() {
    let w = Window::alone();
    w.transport.json(LOGIN_PATH, 200, json!({ "id": 7 }));
    let session = w.session();
    let (source, _) = counting_factory();
    within(session.sign_in(Some(source))).await.unwrap();

    let release = w.transport.hold(LOGOUT_PATH, 200, json!({}));
    let signed_out = session.sign_out(false);
    settle().await;
    w.transport.json(LOGIN_PATH, 200, json!({ "id": 8 }));
    drop(session.sign_in(None));
    let authorized = session.when_authorized();
    settle().await;

    assert_eq!(w.transport.calls(LOGIN_PATH), 1);

    release.notify_one();
    within(signed_out).await.unwrap();
    within(authorized).await.unwrap();

    assert_eq!(session.user().and_then(|u| u.id), Some(8));
    assert_eq!(w.transport.paths(), vec![LOGIN_PATH, LOGOUT_PATH, LOGIN_PATH]);
}

#[tokio::test]
async fn sign_in_response_arriving_after_sign_out_is_dropped() {
    let w = Window::alone();
    let release = w.transport.hold(LOGIN_PATH, 200, json!({ "id": 7 }));
    w.transport.json(LOGOUT_PATH, 200, json!({}));
    let session = w.session();
    let events = record_events(&session);
    let (source, _) = counting_factory();

    drop(session.sign_in(Some(source)));
    settle().await;
    within(session.sign_out(false)).await.unwrap();
    release.notify_one();
    settle().await;

    assert_eq!(session.user().and_then(|u| u.id), Some(-1));
    assert!(!user_states(&events).contains(&UserState::SignedIn));
}

// =============================================================================
// UPDATE
// =============================================================================

#[tokio::test]
async fn overlapping_updates_share_one_request() {
    let w = Window::alone();
    let release = w.transport.hold(USER_PATH, 200, json!({ "id": 4 }));
    let session = w.session();

    let first = session.update_user_state("a");
    let second = session.update_user_state("b");
    settle().await;
    assert_eq!(w.transport.calls(USER_PATH), 1);

    release.notify_one();
    assert_eq!(within(first).await.unwrap().id, Some(4));
    assert_eq!(within(second).await.unwrap().id, Some(4));

    w.transport.json(USER_PATH, 200, json!({ "id": 4 }));
    within(session.update_user_state("c")).await.unwrap();
    settle().await;
    assert_eq!(w.transport.calls(USER_PATH), 2);
}

// =============================================================================
// COMMIT
// =============================================================================

#[tokio::test]
async fn changed_user_alerts() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    session.process_user(User::with_id(8), "test");

    assert_eq!(user_states(&events), vec![UserState::ChangedUser]);
    assert_eq!(w.alert_messages(), vec![CHANGED_USER_MESSAGE.to_owned()]);
}

#[tokio::test]
async fn authorization_tracks_committed_user() {
    let w = Window::alone();
    let session = w.session();

    for (user, authorized) in [
        (User::with_id(7), true),
        (User::signed_out(), false),
        (User::unknown(), false),
        (User::with_id(0), false),
        (User::with_id(12), true),
    ] {
        session.process_user(user, "test");
        assert_eq!(session.is_authorized(None), authorized);
        let expected = if authorized { GateState::Resolved } else { GateState::Pending };
        assert_eq!(session.gates().authorized, expected);
    }
}

#[tokio::test]
async fn veto_suppresses_error_alert() {
    let w = Window::alone();
    let session = w.session();
    session.on(|event| match event {
        AuthEvent::User(UserEvent { state: UserState::UserError, .. }) => Propagation::Veto,
        _ => Propagation::Continue,
    });

    session.process_user(User::unknown(), "test");
    settle().await;

    assert!(w.page.alerts().is_empty());
}

#[tokio::test]
async fn error_alert_only_on_leader() {
    let hub = crate::bus::LocalHub::new();
    let leader = Window::join(&hub, MemoryHostPage::new(PAGE_ORIGIN));
    let follower = Window::join(&hub, MemoryHostPage::new(PAGE_ORIGIN));

    follower.session().process_user(User::unknown(), "test");
    leader.session().process_user(User::unknown(), "test");
    settle().await;

    assert!(follower.page.alerts().is_empty());
    let alerts = leader.page.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Danger);
}

// =============================================================================
// NAVIGATION
// =============================================================================

#[tokio::test]
async fn navigation_suppresses_alerts() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    session.navigation(NavigationSignal::BeforeUnload);
    session.process_user(User::signed_out(), "test");

    assert!(session.is_navigating());
    assert!(w.page.alerts().is_empty());
    assert_eq!(user_states(&events), vec![UserState::SignedOut]);
}

#[tokio::test]
async fn load_with_different_ambient_user_commits_it() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    session.navigation(NavigationSignal::RequestStart);
    w.page.set_ambient_user(Some(9));
    session.navigation(NavigationSignal::Load);

    assert!(!session.is_navigating());
    assert_eq!(session.user().and_then(|u| u.id), Some(9));
    assert_eq!(user_states(&events), vec![UserState::ChangedUser]);
    assert_eq!(w.alert_messages(), vec![CHANGED_USER_MESSAGE.to_owned()]);
}

#[tokio::test]
async fn load_with_same_ambient_user_is_quiet() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    session.navigation(NavigationSignal::Load);

    assert!(events.lock().unwrap().is_empty());
}

// =============================================================================
// TEARDOWN
// =============================================================================

#[tokio::test]
async fn destroy_clears_user_and_listeners() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    session.set_jwt(JwtSource::from("abc"));
    let events = record_events(&session);

    session.destroy().unwrap();
    session.process_user(User::with_id(8), "test");

    assert!(events.lock().unwrap().is_empty());
    assert!(!session.is_initialized());
    assert!(!session.is_provided());
}

#[tokio::test]
async fn valid_user_after_user_error_is_updated() {
    let w = Window::alone();
    let session = w.session();
    let events = record_events(&session);

    session.process_user(User::unknown(), "test");
    session.process_user(User::with_id(7), "test");
    settle().await;

    assert_eq!(user_states(&events), vec![UserState::UserError, UserState::Updated]);
    assert!(session.is_authorized(None));
}

#[tokio::test]
async fn concurrent_commits_report_one_transition() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let events = record_events(&session);

    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| session.process_user(User::with_id(8), "race"));
        }
    });

    let states = user_states(&events);
    assert_eq!(states.len(), 8);
    assert_eq!(states.iter().filter(|s| **s == UserState::ChangedUser).count(), 1);
    assert_eq!(w.alert_messages(), vec![CHANGED_USER_MESSAGE.to_owned()]);
}

#[tokio::test]
async fn teardown_during_sign_out_skips_commit() {
    let w = Window::alone_with(MemoryHostPage::new(PAGE_ORIGIN).with_ambient_user(7));
    let session = w.session();
    within(session.init(None)).await.unwrap();
    let release = w.transport.hold(LOGOUT_PATH, 200, json!({}));

    drop(session.sign_out(false));
    settle().await;
    session.destroy().unwrap();
    release.notify_one();
    settle().await;

    assert_eq!(w.transport.calls(LOGOUT_PATH), 1);
    assert!(session.user().is_none());
    assert_eq!(session.authentication_state(), None);
    assert_eq!(w.page.ambient_user(), Some(7));
    assert!(w.page.alerts().is_empty());
}
