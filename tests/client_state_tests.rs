/// Client state tests
///
/// Tests for connecting, disconnecting and listing databases
/// Run with: cargo test --test client_state_tests

use graph_studio::driver::Fault;
use graph_studio::{
    ClientState, ConnectionConfig, MemoryDriver, NotificationKind, NotificationManager,
    SessionType, StudioError,
};
use std::sync::Arc;

fn client(driver: &MemoryDriver) -> ClientState {
    ClientState::new(Arc::new(driver.clone()), NotificationManager::new())
}

#[tokio::test]
async fn test_connect_lists_databases_sorted() {
    let driver = MemoryDriver::new()
        .with_database("social")
        .with_database("finance");
    let client = client(&driver);

    let session = client.connect(ConnectionConfig::new("admin")).await.unwrap();

    assert!(client.is_connected());
    assert!(!session.is_open());
    assert_eq!(client.databases(), vec!["finance", "social"]);
    assert_eq!(client.config().unwrap().username, "admin");
}

#[tokio::test]
async fn test_connect_with_database_and_type() {
    let driver = MemoryDriver::new().with_database("social");
    let client = client(&driver);

    let config = ConnectionConfig::from_url("graphdb://admin@localhost:1729/social")
        .unwrap()
        .session_type(SessionType::Schema);
    let session = client.connect(config).await.unwrap();

    assert!(session.is_open());
    assert!(session.is_schema());
    assert!(Arc::ptr_eq(&session, &client.session().unwrap()));
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let driver = MemoryDriver::new().with_database("social");
    driver.inject(Fault::Connect);
    let client = client(&driver);

    let result = client.connect(ConnectionConfig::new("admin")).await;

    assert!(matches!(result, Err(StudioError::Connection(_))));
    assert!(!client.is_connected());
    assert!(client.session().is_none());
    let queue = client.notifier().queue();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].code, "CNX01");
    assert_eq!(queue[0].kind, NotificationKind::Error);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connecting() {
    let driver = MemoryDriver::new();
    let client = client(&driver);

    let result = client.connect(ConnectionConfig::new("")).await;

    assert!(matches!(result, Err(StudioError::InvalidConfig(_))));
    assert!(client.notifier().queue().is_empty());
}

#[tokio::test]
async fn test_disconnect_closes_everything_once() {
    let driver = MemoryDriver::new().with_database("social");
    let client = client(&driver);
    let session = client
        .connect(ConnectionConfig::new("admin").database("social"))
        .await
        .unwrap();

    client.disconnect().await;
    client.disconnect().await;

    assert!(!client.is_connected());
    assert!(!session.is_open());
    assert!(client.databases().is_empty());
    assert_eq!(driver.stats().live_sessions, 0);
    assert_eq!(client.notifier().count("CNX02"), 1);
}

#[tokio::test]
async fn test_reconnect_replaces_session() {
    let driver = MemoryDriver::new().with_database("social");
    let client = client(&driver);
    let config = ConnectionConfig::new("admin").database("social");

    let first = client.connect(config.clone()).await.unwrap();
    let second = client.connect(config).await.unwrap();

    assert!(!first.is_open());
    assert!(second.is_open());
    assert_eq!(driver.stats().live_sessions, 1);
}

#[tokio::test]
async fn test_refresh_sees_new_databases() {
    let driver = MemoryDriver::new().with_database("social");
    let client = client(&driver);
    client.connect(ConnectionConfig::new("admin")).await.unwrap();

    let _ = driver.clone().with_database("finance");
    let databases = client.refresh_databases().await;

    assert_eq!(databases, vec!["finance", "social"]);
    assert_eq!(client.databases(), databases);
}

#[tokio::test]
async fn test_refresh_without_connection_is_empty() {
    let client = client(&MemoryDriver::new().with_database("social"));
    assert!(client.refresh_databases().await.is_empty());
    assert!(client.notifier().queue().is_empty());
}
