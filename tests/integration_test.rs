//! End-to-end test against a live PostgreSQL server with `wal_level =
//! logical`. Connection details come from the usual `PG_*` environment
//! variables.

use std::time::Duration;

use pg_tail::postgres::parse_lsn;
use pg_tail::{Error, LogicalReceiver, ReplicationOperation};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

const SLOT: &str = "pg_tail_test";

fn connection_url() -> String {
    let host = std::env::var("PG_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("PG_PORT").unwrap_or_else(|_| "5432".to_string());
    let database = std::env::var("PG_DATABASE").unwrap_or_else(|_| "postgres".to_string());
    let username = std::env::var("PG_USERNAME").unwrap_or_else(|_| "postgres".to_string());
    let password = std::env::var("PG_PASSWORD").unwrap_or_else(|_| "postgres".to_string());
    format!("postgres://{username}:{password}@{host}:{port}/{database}")
}

async fn connect() -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(&connection_url(), NoTls)
        .await
        .expect("Failed to connect to PostgreSQL");
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn setup_schema(client: &tokio_postgres::Client) {
    for sql in [
        "DROP TABLE IF EXISTS normal",
        "DROP TABLE IF EXISTS compound",
        "DROP SCHEMA IF EXISTS \"from\" CASCADE",
        "CREATE TABLE normal (id int PRIMARY KEY, value text)",
        "CREATE TABLE compound (id1 int, id2 int, value text, PRIMARY KEY (id1, id2))",
        "CREATE SCHEMA \"from\"",
        "CREATE TABLE \"from\".\"ta\"\"ble\" (\" key \" int PRIMARY KEY, arr int[])",
        "CREATE TABLE \"from\".\"wild\" (\" key[] \" int PRIMARY KEY, pt point)",
    ] {
        client.execute(sql, &[]).await.unwrap_or_else(|e| panic!("`{sql}`: {e}"));
    }
}

fn row(
    operation: &str,
    target: &str,
    old: &[(&str, &str)],
    new: &[(&str, &str)],
) -> ReplicationOperation {
    ReplicationOperation {
        position: String::new(),
        operation: operation.to_string(),
        target: target.to_string(),
        old_columns: old.iter().map(|(c, _)| c.to_string()).collect(),
        old_values: old.iter().map(|(_, v)| v.to_string()).collect(),
        new_columns: new.iter().map(|(c, _)| c.to_string()).collect(),
        new_values: new.iter().map(|(_, v)| v.to_string()).collect(),
    }
}

async fn next_op(rx: &mut mpsc::Receiver<ReplicationOperation>, i: usize) -> ReplicationOperation {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for operation {i}"))
        .unwrap_or_else(|| panic!("Stream ended after {i} operations"))
}

#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_tail_mixed_batch() {
    let client = connect().await;
    setup_schema(&client).await;

    let mut receiver = LogicalReceiver::open(&connection_url(), SLOT, "test_decoding", "")
        .await
        .expect("Failed to open receiver");
    let ack = receiver.ack_handle();

    // Recreate the slot so the stream starts after the schema setup. A
    // leftover slot from an earlier run is dropped first; dropping a
    // missing slot is not an error.
    receiver.drop_slot().await.expect("Failed to drop slot");
    receiver.create_slot().await.expect("Failed to create slot");
    // Creating a slot that already exists is not an error either.
    receiver
        .create_slot()
        .await
        .expect("Recreating an existing slot should succeed");

    let (tx, mut rx) = mpsc::channel(100);
    let cancel = CancellationToken::new();
    let stop = cancel.clone();

    let driver = tokio::spawn(async move {
        let result = receiver.run(cancel, tx).await;
        (receiver, result)
    });

    for sql in [
        "INSERT INTO normal (id, value) VALUES (1, 'a')",
        "INSERT INTO compound (id1, id2, value) VALUES (2, 91, Null), (3, 92, 'c')",
        "INSERT INTO \"from\".\"ta\"\"ble\" (\" key \", arr) VALUES (5, '{1,2,3}')",
        "INSERT INTO \"from\".\"wild\" (\" key[] \", pt) VALUES (6, '(1,2)')",
        "UPDATE normal SET value = 'm' WHERE id = 1",
        "UPDATE normal SET (id, value) = (11, 'n') WHERE id = 1",
        "UPDATE compound SET (id1, value) = (11, 'd') WHERE id1 = 2",
        "UPDATE compound SET (id1, value) = (id1 + 10, value) WHERE value < 'j'",
        "DELETE FROM normal WHERE value = 'n'",
        "DELETE FROM compound",
        "DELETE FROM \"from\".\"ta\"\"ble\" WHERE \" key \" = 5",
    ] {
        client.execute(sql, &[]).await.unwrap_or_else(|e| panic!("`{sql}`: {e}"));
    }

    // Each statement is its own transaction, so the stream interleaves the
    // row changes with BEGIN/COMMIT pairs in issue order.
    let expected: Vec<Option<ReplicationOperation>> = vec![
        None,
        Some(row(
            "INSERT",
            "public.normal",
            &[],
            &[("id", "1"), ("value", "'a'")],
        )),
        None,
        None,
        Some(row(
            "INSERT",
            "public.compound",
            &[],
            &[("id1", "2"), ("id2", "91"), ("value", "null")],
        )),
        Some(row(
            "INSERT",
            "public.compound",
            &[],
            &[("id1", "3"), ("id2", "92"), ("value", "'c'")],
        )),
        None,
        None,
        Some(row(
            "INSERT",
            "\"from\".\"ta\"\"ble\"",
            &[],
            &[("\" key \"", "5"), ("arr", "'{1,2,3}'")],
        )),
        None,
        None,
        Some(row(
            "INSERT",
            "\"from\".wild",
            &[],
            &[("\" key[] \"", "6"), ("pt", "'(1,2)'")],
        )),
        None,
        None,
        Some(row(
            "UPDATE",
            "public.normal",
            &[],
            &[("id", "1"), ("value", "'m'")],
        )),
        None,
        None,
        Some(row(
            "UPDATE",
            "public.normal",
            &[("id", "1")],
            &[("id", "11"), ("value", "'n'")],
        )),
        None,
        None,
        Some(row(
            "UPDATE",
            "public.compound",
            &[("id1", "2"), ("id2", "91")],
            &[("id1", "11"), ("id2", "91"), ("value", "'d'")],
        )),
        None,
        None,
        Some(row(
            "UPDATE",
            "public.compound",
            &[("id1", "3"), ("id2", "92")],
            &[("id1", "13"), ("id2", "92"), ("value", "'c'")],
        )),
        Some(row(
            "UPDATE",
            "public.compound",
            &[("id1", "11"), ("id2", "91")],
            &[("id1", "21"), ("id2", "91"), ("value", "'d'")],
        )),
        None,
        None,
        Some(row(
            "DELETE",
            "public.normal",
            &[("id", "11")],
            &[],
        )),
        None,
        None,
        Some(row(
            "DELETE",
            "public.compound",
            &[("id1", "13"), ("id2", "92")],
            &[],
        )),
        Some(row(
            "DELETE",
            "public.compound",
            &[("id1", "21"), ("id2", "91")],
            &[],
        )),
        None,
        None,
        Some(row(
            "DELETE",
            "\"from\".\"ta\"\"ble\"",
            &[("\" key \"", "5")],
            &[],
        )),
        None,
    ];

    let mut in_transaction = false;
    for (i, want) in expected.iter().enumerate() {
        let mut op = next_op(&mut rx, i).await;
        assert!(!op.position.is_empty(), "operation {i} lacks a position");
        parse_lsn(&op.position).unwrap_or_else(|e| panic!("operation {i}: {e}"));

        match want {
            // BEGIN/COMMIT alternate around each statement's row changes.
            None => {
                let control = if in_transaction { "COMMIT" } else { "BEGIN" };
                assert_eq!(op.operation, control, "operation {i}");
                in_transaction = !in_transaction;
                if op.operation == "COMMIT" {
                    ack.advance(parse_lsn(&op.position).unwrap());
                }
            }
            Some(want) => {
                op.position.clear();
                assert_eq!(&op, want, "operation {i}");
            }
        }
    }

    stop.cancel();
    let (receiver, result) = driver.await.expect("Driver task panicked");
    assert!(
        matches!(result, Err(Error::Cancelled)),
        "Expected cancellation, got {result:?}"
    );
    receiver.drop_slot().await.expect("Failed to drop slot");
    receiver.close().await.expect("Failed to close receiver");
}

// The plugin registry is consulted before the connection is attempted, so
// this holds without a server.
#[tokio::test]
async fn test_open_rejects_unknown_plugin() {
    let result = LogicalReceiver::open(&connection_url(), SLOT, "no_such_plugin", "").await;
    assert!(matches!(result, Err(Error::UnknownPlugin(_))));
}
