/// Session lifecycle tests
///
/// Tests for opening, switching and closing the client session
/// Run with: cargo test --test session_lifecycle_tests

mod common;

use common::{connect, run, seed};
use graph_studio::driver::Fault;
use graph_studio::{MemoryDriver, SessionType, TransactionType};
use std::sync::{Arc, Mutex};

fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    (events, move |value| sink.lock().unwrap().push(value))
}

#[tokio::test]
async fn test_connect_opens_configured_session() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    assert!(session.is_open());
    assert!(session.is_data());
    assert_eq!(session.database().as_deref(), Some("social"));
    assert_eq!(driver.stats().live_sessions, 1);
}

#[tokio::test]
async fn test_try_open_same_pair_is_noop() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let (opened, on_open) = recorder();
    let (closed, on_close) = recorder();
    session.on_open(on_open);
    session.on_close(on_close);

    for _ in 0..5 {
        session.try_open("social", SessionType::Data).await;
    }

    let stats = driver.stats();
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.sessions_closed, 0);
    assert!(opened.lock().unwrap().is_empty());
    assert!(closed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_switch_database_closes_previous_first() {
    let driver = MemoryDriver::new()
        .with_database("social")
        .with_database("finance");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let (opened, on_open) = recorder();
    let (closed, on_close) = recorder();
    session.on_open(on_open);
    session.on_close(on_close);

    session.try_open("finance", SessionType::Data).await;

    assert_eq!(session.database().as_deref(), Some("finance"));
    let stats = driver.stats();
    assert_eq!(stats.sessions_opened, 2);
    assert_eq!(stats.sessions_closed, 1);
    assert_eq!(stats.live_sessions, 1);
    assert_eq!(*closed.lock().unwrap(), vec![false]);
    assert_eq!(*opened.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_switch_session_type_reopens_same_database() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let (opened, on_open) = recorder();
    let (closed, on_close) = recorder();
    session.on_open(on_open);
    session.on_close(on_close);

    session.try_open("social", SessionType::Schema).await;

    assert!(session.is_schema());
    assert_eq!(*closed.lock().unwrap(), vec![true]);
    assert_eq!(*opened.lock().unwrap(), vec![false]);
    assert_eq!(driver.stats().live_sessions, 1);
}

#[tokio::test]
async fn test_open_failure_leaves_session_closed() {
    let driver = MemoryDriver::new().with_database("social");
    driver.inject(Fault::OpenSession);
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    assert!(!session.is_open());
    assert!(session.database().is_none());
    assert_eq!(client.notifier().count("CNX04"), 1);

    // The fault is one-shot
    session.try_open("social", SessionType::Data).await;
    assert!(session.is_open());
}

#[tokio::test]
async fn test_session_closed_on_open_is_released() {
    let driver = MemoryDriver::new().with_database("social");
    driver.inject(Fault::LostSession);
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    assert!(!session.is_open());
    assert_eq!(client.notifier().count("CNX04"), 1);
    let stats = driver.stats();
    assert_eq!(stats.sessions_opened, 1);
    assert_eq!(stats.live_sessions, 0, "dead handle must still be closed");
}

#[tokio::test]
async fn test_open_missing_database_reports_error() {
    let driver = MemoryDriver::new().with_database("social");
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    session.try_open("nowhere", SessionType::Data).await;

    assert!(!session.is_open());
    assert_eq!(client.notifier().count("CNX04"), 1);
    // The previous session was still torn down first
    assert_eq!(driver.stats().live_sessions, 0);
}

#[tokio::test]
async fn test_server_close_runs_close_path_once() {
    let driver = MemoryDriver::new().with_database("social");
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = session.transaction();
    tx.set_transaction_type(TransactionType::Write);
    run(tx, "insert $p isa person").await;
    assert!(tx.is_open());

    let (closed, on_close) = recorder();
    session.on_close(on_close);

    driver.close_sessions_on_server("social").await;

    assert!(!session.is_open());
    assert!(!tx.is_open());
    assert!(session.database().is_none());
    assert_eq!(*closed.lock().unwrap(), vec![false]);
    assert_eq!(client.notifier().count("CNX05"), 1);
    let stats = driver.stats();
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.live_transactions, 0);

    // A later local close is a no-op
    session.close().await;
    assert_eq!(closed.lock().unwrap().len(), 1);
    assert_eq!(client.notifier().count("CNX05"), 1);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let (closed, on_close) = recorder();
    session.on_close(on_close);

    let closes = (0..10).map(|_| session.close());
    futures::future::join_all(closes).await;

    assert_eq!(closed.lock().unwrap().len(), 1);
    assert_eq!(driver.stats().sessions_closed, 1);
}

#[tokio::test]
async fn test_close_tears_down_transaction() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = session.transaction();
    tx.set_transaction_type(TransactionType::Write);
    run(tx, "insert $p isa person").await;

    session.close().await;

    assert!(!tx.is_open());
    assert!(tx.has_stop_signal());
    assert_eq!(driver.stats().live_transactions, 0);
    // Uncommitted writes are gone with the transaction
    assert!(driver.data("social").is_empty());
}

#[tokio::test]
async fn test_type_schema_passthrough() {
    let driver = MemoryDriver::new().with_database("social");
    seed(&driver, "social", SessionType::Schema, &["person sub entity"]).await;
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    assert_eq!(session.type_schema().await.as_deref(), Some("person sub entity"));

    session.close().await;
    assert!(session.type_schema().await.is_none());
}

#[tokio::test]
async fn test_open_transaction_without_session() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, None, SessionType::Data).await;

    assert!(!session.is_open());
    let handle = session
        .open_transaction(TransactionType::Read, None)
        .await
        .unwrap();
    assert!(handle.is_none());
    assert_eq!(driver.stats().transactions_opened, 0);
}

#[tokio::test]
async fn test_open_state_mirror_follows_flag() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let mut open_state = session.open_state();
    assert!(*open_state.borrow_and_update());

    session.close().await;

    open_state.changed().await.unwrap();
    assert!(!*open_state.borrow());
}
