//! Simple and extended query exchanges against a scripted server.

mod common;

use std::time::Duration;

use common::*;
use pg_conduit::protocol::backend::BackendMessage;
use pg_conduit::protocol::frontend::{FrontendMessage, Target};
use pg_conduit::protocol::types::oid;
use pg_conduit::{Error, Opts, TransactionStatus, Value};

#[tokio::test]
async fn simple_query_without_rows() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let sql = server
            .complete_query("CREATE TABLE", TransactionStatus::Idle)
            .await;
        assert_eq!(sql, "CREATE TABLE t (id int)");
        server.expect_terminate().await;
    });

    assert!(conn.query("CREATE TABLE t (id int)", ()).await.unwrap().is_none());
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn simple_query_with_rows() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        assert_eq!(server.read_query().await, "SELECT id, name FROM users");
        server
            .send(&[
                row_description(&[("id", oid::INT4), ("name", oid::TEXT)]),
                data_row(&[Some("1"), Some("ada")]),
                data_row(&[Some("2"), None]),
                complete("SELECT 2"),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.expect_terminate().await;
    });

    let result = conn
        .query("SELECT id, name FROM users", ())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.command_tag(), Some("SELECT 2"));
    assert_eq!(result.columns()[1].name(), "name");

    let rows: Vec<(i32, Option<String>)> = result.decode().unwrap();
    assert_eq!(rows, vec![(1, Some("ada".to_string())), (2, None)]);
    assert_eq!(result.rows()[0].get::<&str>("name").unwrap(), "ada");
    assert_eq!(result.rows()[1].value(1).unwrap(), Value::Null);

    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn unknown_messages_are_skipped() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.read_query().await;
        // An unrecognized tag with a 3-byte body.
        server.send_raw(&[b'~', 0, 0, 0, 7, 1, 2, 3]).await;
        server
            .send(&[complete("DELETE 3"), ready(TransactionStatus::Idle)])
            .await;
        server.expect_terminate().await;
    });

    assert_eq!(conn.execute("DELETE FROM jobs", ()).await.unwrap(), 3);
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn async_messages_inside_a_query_are_absorbed() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.read_query().await;
        server
            .send(&[
                parameter_status("TimeZone", "Asia/Tokyo"),
                row_description(&[("n", oid::INT4)]),
                notification("jobs", "42"),
                data_row(&[Some("7")]),
                complete("SELECT 1"),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.expect_terminate().await;
    });

    let result = conn.query("SELECT 7 AS n", ()).await.unwrap().unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.rows()[0].get::<i32>("n").unwrap(), 7);
    assert_eq!(conn.server_param("TimeZone").as_deref(), Some("Asia/Tokyo"));

    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn server_error_leaves_connection_usable() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.read_query().await;
        server
            .send(&[
                error("42P01", "relation \"missing\" does not exist"),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.complete_query("SELECT 0", TransactionStatus::Idle).await;
        server.expect_terminate().await;
    });

    let err = conn.query("SELECT * FROM missing", ()).await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(!err.is_connection_broken());
    assert!(!conn.is_broken());

    assert_eq!(conn.execute("SELECT 1 WHERE false", ()).await.unwrap(), 0);
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn parameters_use_the_unnamed_statement() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let messages = server.read_until_sync().await;
        assert_eq!(
            messages,
            vec![
                FrontendMessage::Parse {
                    name: String::new(),
                    query: "SELECT $1::int4 + $2".into(),
                    param_types: Vec::new(),
                },
                FrontendMessage::Bind {
                    portal: String::new(),
                    statement: String::new(),
                    params: vec![Some(b"41".to_vec()), None],
                },
                FrontendMessage::Describe {
                    target: Target::Portal,
                    name: String::new(),
                },
                FrontendMessage::Execute {
                    portal: String::new(),
                    max_rows: 0,
                },
                FrontendMessage::Sync,
            ]
        );
        server
            .send(&[
                BackendMessage::ParseComplete,
                BackendMessage::BindComplete,
                row_description(&[("sum", oid::INT4)]),
                data_row(&[None]),
                complete("SELECT 1"),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.expect_terminate().await;
    });

    let result = conn
        .query("SELECT $1::int4 + $2", (41_i32, None::<i32>))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.rows()[0].get::<Option<i32>>(0).unwrap(), None);
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn prepared_statement_lifecycle() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        let messages = server.read_until_sync().await;
        let FrontendMessage::Parse { name, .. } = &messages[0] else {
            panic!("expected Parse, got {:?}", messages[0]);
        };
        let name = name.clone();
        assert!(name.starts_with("statement_"));
        assert_eq!(
            messages[1],
            FrontendMessage::Describe {
                target: Target::Statement,
                name: name.clone(),
            }
        );
        server
            .send(&[
                BackendMessage::ParseComplete,
                parameter_description(&[oid::INT4]),
                row_description(&[("name", oid::TEXT)]),
                ready(TransactionStatus::Idle),
            ])
            .await;

        let messages = server.read_until_sync().await;
        assert_eq!(
            messages[0],
            FrontendMessage::Bind {
                portal: String::new(),
                statement: name.clone(),
                params: vec![Some(b"1".to_vec())],
            }
        );
        assert_eq!(messages.len(), 3);
        server
            .send(&[
                BackendMessage::BindComplete,
                data_row(&[Some("ada")]),
                complete("SELECT 1"),
                ready(TransactionStatus::Idle),
            ])
            .await;

        let messages = server.read_until_sync().await;
        assert_eq!(
            messages[0],
            FrontendMessage::Close {
                target: Target::Statement,
                name,
            }
        );
        server
            .send(&[BackendMessage::CloseComplete, ready(TransactionStatus::Idle)])
            .await;
        server.expect_terminate().await;
    });

    let statement = conn
        .prepare("SELECT name FROM users WHERE id = $1", None)
        .await
        .unwrap();
    assert_eq!(statement.param_types(), &[oid::INT4]);
    assert_eq!(statement.columns().unwrap()[0].name(), "name");

    let err = statement.query(()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));

    let result = statement.query((1_i32,)).await.unwrap().unwrap();
    assert_eq!(result.rows()[0].get::<String>(0).unwrap(), "ada");

    statement.close().await.unwrap();
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn empty_statement_name_is_rejected() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.expect_terminate().await;
    });

    let err = conn.prepare("SELECT 1", Some("")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out_and_breaks_the_connection() {
    let opts = Opts {
        response_timeout: Duration::from_millis(200),
        ..opts()
    };
    let (conn, mut server) = connect_with(opts).await;
    // Read the query and never answer, keeping the socket open.
    let script = tokio::spawn(async move {
        let sql = server.read_query().await;
        (server, sql)
    });

    let err = conn.query("SELECT pg_sleep(60)", ()).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(200)));
    assert!(err.is_connection_broken());
    assert!(conn.is_broken());
    assert!(matches!(
        conn.execute("SELECT 1", ()).await.unwrap_err(),
        Error::ConnectionBroken
    ));

    conn.close().await.unwrap();
    let (_server, sql) = script.await.unwrap();
    assert_eq!(sql, "SELECT pg_sleep(60)");
}
