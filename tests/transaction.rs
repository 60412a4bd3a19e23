//! Transactions, savepoints and named portals.

mod common;

use common::*;
use pg_conduit::protocol::backend::BackendMessage;
use pg_conduit::protocol::frontend::{FrontendMessage, Target};
use pg_conduit::protocol::types::oid;
use pg_conduit::{Error, TransactionStatus};

use TransactionStatus::{Idle, InTransaction};

#[tokio::test]
async fn nested_savepoints() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let mut statements = Vec::new();
        statements.push(server.complete_query("BEGIN", InTransaction).await);
        statements.push(server.complete_query("SAVEPOINT", InTransaction).await);
        statements.push(server.complete_query("SAVEPOINT", InTransaction).await);
        statements.push(server.complete_query("INSERT 0 1", InTransaction).await);
        statements.push(server.complete_query("ROLLBACK", InTransaction).await);
        statements.push(server.complete_query("RELEASE", InTransaction).await);
        statements.push(server.complete_query("COMMIT", Idle).await);
        server.expect_terminate().await;
        statements
    });

    let mut tx = conn.begin().await.unwrap();
    assert_eq!(tx.depth(), 0);
    {
        let mut outer = tx.begin().await.unwrap();
        assert_eq!(outer.savepoint().as_deref(), Some("savepoint_0"));
        {
            let inner = outer.begin().await.unwrap();
            assert_eq!(inner.depth(), 2);
            inner.execute("INSERT INTO t VALUES (1)", ()).await.unwrap();
            inner.rollback().await.unwrap();
        }
        outer.commit().await.unwrap();
    }
    tx.commit().await.unwrap();
    assert!(!conn.in_transaction());
    conn.close().await.unwrap();

    assert_eq!(
        script.await.unwrap(),
        vec![
            "BEGIN TRANSACTION",
            "SAVEPOINT savepoint_0",
            "SAVEPOINT savepoint_1",
            "INSERT INTO t VALUES (1)",
            "ROLLBACK TO SAVEPOINT savepoint_1",
            "RELEASE SAVEPOINT savepoint_0",
            "COMMIT TRANSACTION",
        ]
    );
}

#[tokio::test]
async fn server_error_rolls_back() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.complete_query("BEGIN", InTransaction).await;
        assert_eq!(server.read_query().await, "INSERT INTO t VALUES (1)");
        server
            .send(&[
                error("23505", "duplicate key value violates unique constraint"),
                ready(TransactionStatus::Failed),
            ])
            .await;
        let rollback = server.complete_query("ROLLBACK", Idle).await;
        server.expect_terminate().await;
        rollback
    });

    let tx = conn.begin().await.unwrap();
    let err = tx.execute("INSERT INTO t VALUES (1)", ()).await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert!(tx.is_finished());

    let err = tx.execute("SELECT 1", ()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));
    drop(tx);

    conn.close().await.unwrap();
    assert_eq!(script.await.unwrap(), "ROLLBACK TRANSACTION");
}

#[tokio::test]
async fn closure_error_rolls_back() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let mut statements = Vec::new();
        statements.push(server.complete_query("BEGIN", InTransaction).await);
        statements.push(server.complete_query("INSERT 0 1", InTransaction).await);
        statements.push(server.complete_query("ROLLBACK", Idle).await);
        server.expect_terminate().await;
        statements
    });

    let err = conn
        .transaction::<(), _>(async |tx| {
            tx.execute("INSERT INTO t VALUES (1)", ()).await?;
            Err(Error::InvalidUsage("abort".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));
    conn.close().await.unwrap();

    assert_eq!(
        script.await.unwrap(),
        vec![
            "BEGIN TRANSACTION",
            "INSERT INTO t VALUES (1)",
            "ROLLBACK TRANSACTION",
        ]
    );
}

#[tokio::test]
async fn closure_ok_commits() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let mut statements = Vec::new();
        statements.push(server.complete_query("BEGIN", InTransaction).await);
        statements.push(server.complete_query("UPDATE 2", InTransaction).await);
        statements.push(server.complete_query("COMMIT", Idle).await);
        server.expect_terminate().await;
        statements
    });

    let updated = conn
        .transaction(async |tx| tx.execute("UPDATE t SET n = n + 1", ()).await)
        .await
        .unwrap();
    assert_eq!(updated, 2);
    conn.close().await.unwrap();

    assert_eq!(
        script.await.unwrap(),
        vec![
            "BEGIN TRANSACTION",
            "UPDATE t SET n = n + 1",
            "COMMIT TRANSACTION",
        ]
    );
}

#[tokio::test]
async fn dropped_transaction_rolls_back_before_next_query() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let mut statements = Vec::new();
        statements.push(server.complete_query("BEGIN", InTransaction).await);
        statements.push(server.complete_query("ROLLBACK", Idle).await);
        statements.push(server.complete_query("SELECT 0", Idle).await);
        server.expect_terminate().await;
        statements
    });

    drop(conn.begin().await.unwrap());
    conn.execute("SELECT 1 WHERE false", ()).await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(
        script.await.unwrap(),
        vec![
            "BEGIN TRANSACTION",
            "ROLLBACK TRANSACTION",
            "SELECT 1 WHERE false",
        ]
    );
}

#[tokio::test]
async fn named_portal_fetches_in_pages() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.complete_query("BEGIN", InTransaction).await;

        // prepare
        let messages = server.read_until_sync().await;
        let FrontendMessage::Parse { name: statement, .. } = messages[0].clone() else {
            panic!("expected Parse");
        };
        server
            .send(&[
                BackendMessage::ParseComplete,
                parameter_description(&[]),
                row_description(&[("n", oid::INT4)]),
                ready(InTransaction),
            ])
            .await;

        // bind
        let messages = server.read_until_sync().await;
        assert_eq!(
            messages,
            vec![
                FrontendMessage::Bind {
                    portal: "cursor".into(),
                    statement,
                    params: Vec::new(),
                },
                FrontendMessage::Describe {
                    target: Target::Portal,
                    name: "cursor".into(),
                },
                FrontendMessage::Sync,
            ]
        );
        server
            .send(&[
                BackendMessage::BindComplete,
                row_description(&[("n", oid::INT4)]),
                ready(InTransaction),
            ])
            .await;

        // fetch 2, then the rest
        assert_eq!(
            server.read_until_sync().await[0],
            FrontendMessage::Execute {
                portal: "cursor".into(),
                max_rows: 2,
            }
        );
        server
            .send(&[
                data_row(&[Some("1")]),
                data_row(&[Some("2")]),
                BackendMessage::PortalSuspended,
                ready(InTransaction),
            ])
            .await;
        server.read_until_sync().await;
        server
            .send(&[
                data_row(&[Some("3")]),
                complete("SELECT 1"),
                ready(InTransaction),
            ])
            .await;

        // close
        assert_eq!(
            server.read_until_sync().await[0],
            FrontendMessage::Close {
                target: Target::Portal,
                name: "cursor".into(),
            }
        );
        server
            .send(&[BackendMessage::CloseComplete, ready(InTransaction)])
            .await;
        server.complete_query("COMMIT", Idle).await;
        server.expect_terminate().await;
    });

    let tx = conn.begin().await.unwrap();
    let statement = tx.prepare("SELECT n FROM t", None).await.unwrap();
    let mut portal = tx.bind(&statement, (), Some("cursor")).await.unwrap();
    assert_eq!(portal.name(), "cursor");

    let page = portal.fetch(2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert!(!portal.is_complete());

    let page = portal.fetch(0).await.unwrap();
    assert_eq!(page[0].get::<i32>("n").unwrap(), 3);
    assert!(portal.is_complete());
    assert!(portal.fetch(10).await.unwrap().is_empty());

    portal.close().await.unwrap();
    tx.commit().await.unwrap();
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn sql_portal_streams_in_batches() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.complete_query("BEGIN", InTransaction).await;

        assert_eq!(
            server.read_until_sync().await,
            vec![
                FrontendMessage::Parse {
                    name: String::new(),
                    query: "SELECT n FROM t WHERE n <= $1".into(),
                    param_types: Vec::new(),
                },
                FrontendMessage::Bind {
                    portal: "cursor".into(),
                    statement: String::new(),
                    params: vec![Some(b"3".to_vec())],
                },
                FrontendMessage::Describe {
                    target: Target::Portal,
                    name: "cursor".into(),
                },
                FrontendMessage::Sync,
            ]
        );
        server
            .send(&[
                BackendMessage::ParseComplete,
                BackendMessage::BindComplete,
                row_description(&[("n", oid::INT4)]),
                ready(InTransaction),
            ])
            .await;

        let execute = FrontendMessage::Execute {
            portal: "cursor".into(),
            max_rows: 2,
        };
        assert_eq!(
            server.read_until_sync().await,
            vec![execute.clone(), FrontendMessage::Sync]
        );
        server
            .send(&[
                data_row(&[Some("1")]),
                data_row(&[Some("2")]),
                BackendMessage::PortalSuspended,
                ready(InTransaction),
            ])
            .await;
        assert_eq!(
            server.read_until_sync().await,
            vec![execute, FrontendMessage::Sync]
        );
        server
            .send(&[
                data_row(&[Some("3")]),
                complete("SELECT 1"),
                ready(InTransaction),
            ])
            .await;

        // A drained portal is closed by name.
        assert_eq!(
            server.read_until_sync().await,
            vec![
                FrontendMessage::Close {
                    target: Target::Portal,
                    name: "cursor".into(),
                },
                FrontendMessage::Sync,
            ]
        );
        server
            .send(&[BackendMessage::CloseComplete, ready(InTransaction)])
            .await;
        server.complete_query("COMMIT", Idle).await;
        server.expect_terminate().await;
    });

    let tx = conn.begin().await.unwrap();
    let portal = tx
        .bind_sql("SELECT n FROM t WHERE n <= $1", (3_i32,), Some("cursor"))
        .await
        .unwrap();
    let stream = portal.stream(2).await.unwrap().unwrap();
    let values: Vec<i32> = stream
        .collect_rows()
        .await
        .unwrap()
        .iter()
        .map(|row| row.get("n").unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 3]);

    tx.commit().await.unwrap();
    conn.close().await.unwrap();
    script.await.unwrap();
}
