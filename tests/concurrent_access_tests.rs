/// Concurrent access tests
///
/// Tests for racing callers on the session and transaction state
/// Run with: cargo test --test concurrent_access_tests

mod common;

use common::{connect, eventually, run};
use graph_studio::driver::Fault;
use graph_studio::{MemoryDriver, SessionType, TransactionType};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Barrier, mpsc};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_query_runners_single_winner() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let num_tasks = 20;
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for _ in 0..num_tasks {
        let tx = Arc::clone(session.transaction());
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            tx.query_runner("match").await
        }));
    }

    let mut winners = vec![];
    for handle in handles {
        if let Some(runner) = handle.await.unwrap() {
            winners.push(runner);
        }
    }
    assert_eq!(winners.len(), 1, "exactly one query may be admitted");

    let (sender, _receiver) = mpsc::unbounded_channel();
    winners.pop().unwrap().run(&sender).await;
    let tx = session.transaction();
    assert!(!tx.has_running_query());
    assert!(tx.query_runner("match").await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_failed_open_never_releases_another_admission() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = Arc::clone(session.transaction());

    for _ in 0..500 {
        driver.inject(Fault::OpenTransaction);
        let first = {
            let tx = Arc::clone(&tx);
            tokio::spawn(async move { tx.query_runner("match").await })
        };
        let second = {
            let tx = Arc::clone(&tx);
            tokio::spawn(async move { tx.query_runner("match").await })
        };
        let runners: Vec<_> = [first.await.unwrap(), second.await.unwrap()]
            .into_iter()
            .flatten()
            .collect();

        assert!(runners.len() <= 1);
        if !runners.is_empty() {
            assert!(
                tx.has_running_query(),
                "a live runner exists while the query slot is free"
            );
            assert!(tx.query_runner("match").await.is_none());
        }
        drop(runners);
        eventually(|| !tx.has_running_query()).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_completion_never_releases_newer_admission() {
    let driver = MemoryDriver::new().with_database("social");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = Arc::clone(session.transaction());

    for _ in 0..200 {
        let runner = tx.query_runner("match").await.unwrap();
        let finished = {
            let (sender, _receiver) = mpsc::unbounded_channel();
            tokio::spawn(async move { runner.run(&sender).await })
        };
        let next = {
            let tx = Arc::clone(&tx);
            tokio::spawn(async move {
                loop {
                    if let Some(runner) = tx.query_runner("match").await {
                        return runner;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        finished.await.unwrap();
        let next = next.await.unwrap();

        assert!(
            tx.has_running_query(),
            "the admitted query lost its slot to an older completion"
        );
        drop(next);
        eventually(|| !tx.has_running_query()).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_try_open_keeps_one_session() {
    let driver = MemoryDriver::new()
        .with_database("social")
        .with_database("finance");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;

    let mut handles = vec![];
    for task_id in 0..10 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            let (database, session_type) = match task_id % 3 {
                0 => ("social", SessionType::Data),
                1 => ("finance", SessionType::Data),
                _ => ("finance", SessionType::Schema),
            };
            session.try_open(database, session_type).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(session.is_open());
    let stats = driver.stats();
    assert_eq!(stats.live_sessions, 1, "stats: {:?}", stats);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_and_server_close_race() {
    for _ in 0..20 {
        let driver = MemoryDriver::new().with_database("social");
        let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;
        let tx = session.transaction();
        tx.set_transaction_type(TransactionType::Write);
        run(tx, "insert $p isa person").await;

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        session.on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let local = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.close().await })
        };
        let remote = {
            let driver = driver.clone();
            tokio::spawn(async move { driver.close_sessions_on_server("social").await })
        };
        local.await.unwrap();
        remote.await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(client.notifier().count("CNX05") <= 1);
        assert!(!tx.is_open());
        assert_eq!(driver.stats().live_transactions, 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_commit_once() {
    let driver = MemoryDriver::new().with_database("social");
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = Arc::clone(session.transaction());
    tx.set_transaction_type(TransactionType::Write);
    run(&tx, "insert $p isa person").await;

    let mut handles = vec![];
    for _ in 0..10 {
        let tx = Arc::clone(&tx);
        handles.push(tokio::spawn(async move { tx.commit().await }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(driver.stats().commits, 1);
    assert_eq!(client.notifier().count("CNX10"), 1);
    assert_eq!(driver.data("social"), vec!["$p isa person"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_closes_report_once() {
    let driver = MemoryDriver::new().with_database("social");
    let (client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let tx = Arc::clone(session.transaction());
    tx.set_transaction_type(TransactionType::Write);
    run(&tx, "insert $p isa person").await;

    let mut handles = vec![];
    for _ in 0..10 {
        let tx = Arc::clone(&tx);
        handles.push(tokio::spawn(async move {
            tx.close(Some(graph_studio::Message::TransactionClosedInQuery))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(client.notifier().count("CNX09"), 1);
    assert_eq!(driver.stats().transactions_closed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_state_mirror_settles_on_last_write() {
    let driver = MemoryDriver::new()
        .with_database("social")
        .with_database("finance");
    let (_client, session) = connect(&driver, Some("social"), SessionType::Data).await;
    let open_state = session.open_state();

    let mut handles = vec![];
    for task_id in 0..8 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            if task_id % 2 == 0 {
                session.close().await;
            } else {
                session.try_open("finance", SessionType::Data).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*open_state.borrow(), session.is_open());
}
