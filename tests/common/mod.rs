#![allow(dead_code)]

use graph_studio::{
    ClientState, ConnectionConfig, MemoryDriver, NotificationManager, QueryOutcome, Response,
    SessionState, SessionType, TransactionState, TransactionType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Connect to `driver` and open a session on `database` when given.
pub async fn connect(
    driver: &MemoryDriver,
    database: Option<&str>,
    session_type: SessionType,
) -> (ClientState, Arc<SessionState>) {
    let client = ClientState::new(Arc::new(driver.clone()), NotificationManager::new());
    let mut config = ConnectionConfig::new("admin").session_type(session_type);
    if let Some(database) = database {
        config = config.database(database);
    }
    let session = client.connect(config).await.unwrap();
    (client, session)
}

/// Run one query to completion and collect everything it produced.
pub async fn run(tx: &TransactionState, query: &str) -> (QueryOutcome, Vec<Response>) {
    let runner = tx
        .query_runner(query)
        .await
        .expect("query should have been admitted");
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let outcome = runner.run(&sender).await;
    drop(sender);

    let mut responses = Vec::new();
    while let Some(response) = receiver.recv().await {
        responses.push(response);
    }
    (outcome, responses)
}

/// Commit `statements` to `database` through a throwaway write transaction.
pub async fn seed(driver: &MemoryDriver, database: &str, session_type: SessionType, statements: &[&str]) {
    let (client, session) = connect(driver, Some(database), session_type).await;
    let tx = session.transaction();
    tx.set_transaction_type(TransactionType::Write);
    let keyword = if session_type.is_schema() { "define" } else { "insert" };
    for statement in statements {
        run(tx, &format!("{} {}", keyword, statement)).await;
    }
    tx.commit().await;
    client.disconnect().await;
}

/// Wait until `condition` holds, failing the test after one second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
