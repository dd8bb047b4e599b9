#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Connection manager lifecycle tests: backoff tiers under paused time,
//! terminal refusals, the premature close/error race, cancellation and the
//! host signal short-circuits.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{
    advance_ms, collect, counting_auth, hanging_auth, settle, stop_retrying_auth, MockConnector,
};
use presence_client::manager::{AuthenticateFn, ManagerDelegates};
use presence_client::{ConnectionManager, HostSignals, PresenceError, ProtocolError, Status};

fn manager_with(
    connector: &MockConnector,
    authenticate: AuthenticateFn,
    signals: &HostSignals,
) -> ConnectionManager {
    ConnectionManager::new(
        ManagerDelegates {
            authenticate,
            make_transport: connector.factory(),
            allow_idle_while_hidden: Arc::new(|| false),
        },
        signals,
    )
}

// ════════════════════════════════════════════════════════════════════
// Happy path
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connect_reports_connecting_then_connected() {
    let connector = MockConnector::new(true);
    let (auth, auth_calls) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());
    let (statuses, _sub) = collect(&manager.status_changes());

    manager.connect();
    settle().await;

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![Status::Connecting, Status::Connected]
    );
    assert_eq!(manager.state_name(), "@ok.connected");
    assert_eq!(auth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn send_requires_a_live_connection() {
    let connector = MockConnector::new(true);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    let err = manager.send(bytes::Bytes::from_static(b"x")).unwrap_err();
    assert!(matches!(err, PresenceError::NotConnected));

    manager.connect();
    settle().await;
    manager.send(bytes::Bytes::from_static(b"x")).unwrap();
    assert_eq!(connector.transport(0).sent.lock().unwrap().len(), 1);

    manager.disconnect();
    settle().await;
    let err = manager.send(bytes::Bytes::from_static(b"y")).unwrap_err();
    assert!(matches!(err, PresenceError::NotConnected));
}

// ════════════════════════════════════════════════════════════════════
// Transient close & backoff tiers
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn transient_close_backs_off_through_the_tier_ladder() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    connector.transport(0).dispatch_open();
    settle().await;
    assert_eq!(manager.status(), Status::Connected);

    // First failure: 250 ms tier.
    connector.transport(0).dispatch_close(1006, "");
    settle().await;
    assert_eq!(manager.state_name(), "@connecting.backoff");
    assert_eq!(manager.status(), Status::Reconnecting);

    advance_ms(249).await;
    assert_eq!(connector.count(), 1, "no retry before the tier elapses");
    advance_ms(1).await;
    assert_eq!(connector.count(), 2, "retry fires exactly at 250 ms");
    assert_eq!(manager.state_name(), "@connecting.busy");

    // Second consecutive failure: 500 ms tier, re-entering through auth.
    connector.transport(1).dispatch_error("connection refused");
    settle().await;
    assert_eq!(manager.state_name(), "@auth.backoff");
    assert!(connector.transport(1).closed.load(Ordering::SeqCst));

    advance_ms(499).await;
    assert_eq!(connector.count(), 2);
    advance_ms(1).await;
    assert_eq!(connector.count(), 3);

    // Success resets the ladder to just below the first tier.
    connector.transport(2).dispatch_open();
    settle().await;
    assert_eq!(manager.status(), Status::Connected);

    connector.transport(2).dispatch_close(1006, "");
    settle().await;
    advance_ms(250).await;
    assert_eq!(connector.count(), 4, "ladder restarted at 250 ms");
}

#[tokio::test(start_paused = true)]
async fn transient_failures_stay_silent() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());
    let (errors, _sub) = collect(&manager.protocol_errors());

    manager.connect();
    settle().await;
    connector.transport(0).dispatch_open();
    settle().await;
    connector.transport(0).dispatch_close(1006, "");
    settle().await;

    assert!(errors.lock().unwrap().is_empty());
}

// ════════════════════════════════════════════════════════════════════
// Terminal failures
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn server_refusal_during_connect_is_terminal() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());
    let (errors, _sub) = collect(&manager.protocol_errors());

    manager.connect();
    settle().await;
    connector.transport(0).dispatch_close(4001, "bad token");
    settle().await;

    assert_eq!(manager.status(), Status::Failed);
    assert_eq!(manager.state_name(), "@idle.failed");
    assert_eq!(
        *errors.lock().unwrap(),
        vec![ProtocolError {
            message: "bad token".into(),
            code: 4001,
        }]
    );

    // Time alone never escapes the failed state.
    advance_ms(60_000).await;
    assert_eq!(manager.status(), Status::Failed);

    // An explicit reconnect does.
    manager.connect();
    advance_ms(500).await;
    assert_eq!(connector.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_retrying_from_auth_is_terminal_with_client_code() {
    let connector = MockConnector::new(true);
    let manager = manager_with(&connector, stop_retrying_auth("disabled"), &HostSignals::new());
    let (errors, _sub) = collect(&manager.protocol_errors());

    manager.connect();
    settle().await;

    assert_eq!(manager.status(), Status::Failed);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![ProtocolError {
            message: "disabled".into(),
            code: -1,
        }]
    );
    assert_eq!(connector.count(), 0, "no transport is built without auth");
}

// ════════════════════════════════════════════════════════════════════
// The premature close/error race
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn close_queued_before_the_open_continuation_still_rejects() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());
    let (errors, _sub) = collect(&manager.protocol_errors());

    manager.connect();
    settle().await;

    // Both events land before the waiting continuation runs: open first,
    // then the close. The captured close must still win.
    let transport = connector.transport(0);
    transport.dispatch_open();
    transport.dispatch_close(4005, "kicked");
    settle().await;

    assert_eq!(manager.status(), Status::Failed);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![ProtocolError {
            message: "kicked".into(),
            code: 4005,
        }]
    );
    assert!(transport.closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn cancellation_closes_the_half_open_transport() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    assert_eq!(manager.state_name(), "@connecting.busy");

    manager.disconnect();
    settle().await;

    assert_eq!(manager.status(), Status::Initial);
    assert!(connector.transport(0).closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn open_timeout_fails_the_attempt() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    assert_eq!(manager.state_name(), "@connecting.busy");

    advance_ms(10_000).await;
    assert_eq!(manager.state_name(), "@auth.backoff");
    assert!(connector.transport(0).closed.load(Ordering::SeqCst));
}

// ════════════════════════════════════════════════════════════════════
// Socket events while connected
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn socket_error_with_open_transport_is_ignored() {
    let connector = MockConnector::new(true);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    assert_eq!(manager.status(), Status::Connected);

    // The carrier still reports open, so the error is advisory.
    connector.transport(0).dispatch_error("transient glitch");
    settle().await;

    assert_eq!(manager.status(), Status::Connected);
    assert_eq!(connector.count(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Host signals
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn navigator_online_short_circuits_backoff() {
    let connector = MockConnector::new(false);
    let (auth, _) = counting_auth("tok");
    let signals = HostSignals::new();
    let manager = manager_with(&connector, auth, &signals);

    manager.connect();
    settle().await;
    connector.transport(0).dispatch_open();
    settle().await;
    connector.transport(0).dispatch_close(1006, "");
    settle().await;
    assert_eq!(manager.state_name(), "@connecting.backoff");

    // Connectivity came back: retry immediately, no tier wait.
    signals.online.notify(());
    settle().await;
    assert_eq!(connector.count(), 2);
    assert_eq!(manager.state_name(), "@connecting.busy");
}

#[tokio::test(start_paused = true)]
async fn host_signals_are_dropped_on_destroy() {
    let connector = MockConnector::new(true);
    let (auth, _) = counting_auth("tok");
    let signals = HostSignals::new();
    let manager = manager_with(&connector, auth, &signals);

    manager.connect();
    settle().await;
    manager.destroy().await;

    assert_eq!(signals.online.subscriber_count(), 0);
    assert_eq!(signals.offline.subscriber_count(), 0);
    assert_eq!(signals.visible.subscriber_count(), 0);
}

// ════════════════════════════════════════════════════════════════════
// Auth edge cases
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn auth_timeout_backs_off_and_retries() {
    let connector = MockConnector::new(true);
    let manager = manager_with(&connector, hanging_auth(), &HostSignals::new());
    let (errors, _sub) = collect(&manager.protocol_errors());

    manager.connect();
    settle().await;
    assert_eq!(manager.state_name(), "@auth.busy");

    advance_ms(10_000).await;
    assert_eq!(manager.state_name(), "@auth.backoff");
    assert!(errors.lock().unwrap().is_empty(), "timeouts retry silently");

    advance_ms(250).await;
    assert_eq!(manager.state_name(), "@auth.busy");
}

#[tokio::test(start_paused = true)]
async fn logout_purges_the_credential_and_reauthenticates() {
    let connector = MockConnector::new(true);
    let (auth, auth_calls) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    assert_eq!(manager.status(), Status::Connected);
    assert_eq!(auth_calls.load(Ordering::SeqCst), 1);

    manager.logout();
    settle().await;
    assert_eq!(manager.state_name(), "@auth.backoff");
    assert!(connector.transport(0).closed.load(Ordering::SeqCst));

    advance_ms(250).await;
    assert_eq!(manager.status(), Status::Connected);
    assert_eq!(auth_calls.load(Ordering::SeqCst), 2);
    assert_eq!(connector.count(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn destroy_closes_the_live_transport() {
    let connector = MockConnector::new(true);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;
    assert_eq!(manager.status(), Status::Connected);

    manager.destroy().await;
    assert!(connector.transport(0).closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn reconnect_works_from_the_connected_state() {
    let connector = MockConnector::new(true);
    let (auth, _) = counting_auth("tok");
    let manager = manager_with(&connector, auth, &HostSignals::new());

    manager.connect();
    settle().await;

    manager.reconnect();
    settle().await;
    assert!(connector.transport(0).closed.load(Ordering::SeqCst));
    assert_eq!(manager.state_name(), "@auth.backoff");

    advance_ms(250).await;
    assert_eq!(manager.status(), Status::Connected);
    assert_eq!(connector.count(), 2);
}
