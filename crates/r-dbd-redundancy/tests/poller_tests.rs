//! ---
//! dbd_section: "07-resilience-fault-tolerance"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Bounded readiness polling used as the heartbeat."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
mod common;

use std::time::{Duration, Instant};

use common::{eventually, Script, ScriptedPrimary};
use r_dbd_redundancy::{poll, ConnectionManager, PollOutcome, ResolvedAddress};
use r_dbd_rt::ShutdownSignal;

async fn connected(primary: &ScriptedPrimary) -> ConnectionManager {
    let mut connection = ConnectionManager::new(Duration::from_millis(500));
    connection
        .open(&ResolvedAddress::from_socket(primary.socket()))
        .await
        .expect("connect to scripted primary");
    connection
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn speaking_primary_is_readable() {
    let primary = ScriptedPrimary::start(|_| Script::Speak).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();

    assert_eq!(poll(&connection, 2000, &shutdown).await, PollOutcome::Readable);
    // Nothing is consumed, so the heartbeat stays visible.
    assert_eq!(poll(&connection, 2000, &shutdown).await, PollOutcome::Readable);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_primary_times_out_after_budget() {
    let primary = ScriptedPrimary::start(|_| Script::Silent).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();

    let started = Instant::now();
    assert_eq!(poll(&connection, 200, &shutdown).await, PollOutcome::TimedOut);
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(190), "returned early after {waited:?}");
    assert!(waited < Duration::from_secs(2), "overshot budget: {waited:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_budget_does_not_block() {
    let primary = ScriptedPrimary::start(|_| Script::Silent).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();

    let started = Instant::now();
    assert_eq!(poll(&connection, 0, &shutdown).await, PollOutcome::TimedOut);
    assert_eq!(poll(&connection, -50, &shutdown).await, PollOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hang_up_is_a_connection_error() {
    let primary = ScriptedPrimary::start(|_| Script::HangUp).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();

    assert_eq!(
        poll(&connection, 2000, &shutdown).await,
        PollOutcome::ConnectionError
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_connection_reports_error_without_waiting() {
    let connection = ConnectionManager::new(Duration::from_millis(500));
    let shutdown = ShutdownSignal::new();

    let started = Instant::now();
    assert_eq!(
        poll(&connection, 5000, &shutdown).await,
        PollOutcome::ConnectionError
    );
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_mid_wait_aborts_the_poll() {
    let primary = ScriptedPrimary::start(|_| Script::Silent).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    assert_eq!(
        poll(&connection, 5000, &shutdown).await,
        PollOutcome::ConnectionError
    );
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900), "returned before shutdown: {waited:?}");
    assert!(waited < Duration::from_millis(2000), "waited out the budget: {waited:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poll_after_shutdown_returns_immediately() {
    let primary = ScriptedPrimary::start(|_| Script::Speak).await;
    let connection = connected(&primary).await;
    let shutdown = ShutdownSignal::new();
    assert!(eventually(Duration::from_secs(2), || primary.accepted() == 1).await);

    shutdown.trigger();
    assert_eq!(
        poll(&connection, 5000, &shutdown).await,
        PollOutcome::ConnectionError
    );
}
