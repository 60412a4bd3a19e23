//! Startup, authentication and shutdown against a scripted server.

mod common;

use common::*;
use pg_conduit::protocol::backend::{Authentication, BackendKeyData, BackendMessage};
use pg_conduit::protocol::frontend::FrontendMessage;
use pg_conduit::{Conn, Error, TransactionStatus};

#[tokio::test]
async fn md5_startup() {
    let (client, mut server) = pair();
    let script = tokio::spawn(async move {
        let FrontendMessage::Startup { params } = server.read_untagged().await else {
            panic!("expected startup packet");
        };
        assert_eq!(params[0], ("user".to_string(), "postgres".to_string()));
        assert!(params.contains(&("database".to_string(), "app".to_string())));
        assert!(params.contains(&("client_encoding".to_string(), "UTF8".to_string())));

        server
            .send(&[BackendMessage::Authentication(Authentication::Md5Password {
                salt: [1, 2, 3, 4],
            })])
            .await;
        assert_eq!(
            server.read().await,
            FrontendMessage::Password("md598511ceaec347a656f032c7f2a16ef17".into())
        );
        server
            .send(&[
                BackendMessage::Authentication(Authentication::Ok),
                parameter_status("server_version", "16.2"),
                parameter_status("TimeZone", "UTC"),
                BackendMessage::BackendKeyData(BackendKeyData::new(7, 99)),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.expect_terminate().await;
    });

    let conn = Conn::connect_with_stream(client, opts()).await.unwrap();
    assert_eq!(conn.handshake().process_id(), 7);
    assert_eq!(conn.handshake().secret_key(), 99);
    assert_eq!(conn.server_param("TimeZone").as_deref(), Some("UTC"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn missing_password_fails_startup() {
    let (client, mut server) = pair();
    let script = tokio::spawn(async move {
        server.read_untagged().await;
        server
            .send(&[BackendMessage::Authentication(
                Authentication::CleartextPassword,
            )])
            .await;
    });

    let mut opts = opts();
    opts.password = None;
    let err = Conn::connect_with_stream(client, opts).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "{err}");
    script.await.unwrap();
}

#[tokio::test]
async fn rejected_startup_is_a_server_error() {
    let (client, mut server) = pair();
    let script = tokio::spawn(async move {
        server.read_untagged().await;
        let mut fatal = error("28P01", "password authentication failed");
        if let BackendMessage::ErrorResponse(e) = &mut fatal {
            e.fields.severity = Some("FATAL".into());
        }
        server.send(&[fatal]).await;
    });

    let err = Conn::connect_with_stream(client, opts()).await.unwrap_err();
    assert_eq!(err.sqlstate(), Some("28P01"));
    assert!(err.is_connection_broken());
    script.await.unwrap();
}

#[tokio::test]
async fn parameter_status_updates_after_startup() {
    let (conn, mut server) = connect().await;
    let script = tokio::spawn(async move {
        server.read_query().await;
        server
            .send(&[
                parameter_status("TimeZone", "Europe/Paris"),
                complete("SET"),
                ready(TransactionStatus::Idle),
            ])
            .await;
        server.expect_terminate().await;
    });

    conn.execute("SET TIME ZONE 'Europe/Paris'", ()).await.unwrap();
    assert_eq!(conn.server_param("TimeZone").as_deref(), Some("Europe/Paris"));
    conn.close().await.unwrap();
    script.await.unwrap();
}

#[tokio::test]
async fn server_disconnect_closes_connection() {
    let (conn, server) = connect().await;
    drop(server);

    let err = conn.execute("SELECT 1", ()).await.unwrap_err();
    assert!(err.is_connection_broken(), "{err}");
    assert!(conn.execute("SELECT 1", ()).await.is_err());
}

#[tokio::test]
async fn cancel_request_bytes() {
    let (conn, _server) = connect().await;
    let token = conn.cancel_token();
    assert_eq!(token.process_id(), PROCESS_ID);

    let (client, mut server) = tokio::io::duplex(64);
    let peer = tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut buf = [0u8; 16];
        server.read_exact(&mut buf).await.unwrap();
        buf
    });
    token.cancel_with_stream(client).await.unwrap();

    let bytes = peer.await.unwrap();
    assert_eq!(&bytes[0..4], &16_i32.to_be_bytes());
    assert_eq!(&bytes[4..8], &80_877_102_i32.to_be_bytes());
    assert_eq!(&bytes[8..12], &PROCESS_ID.to_be_bytes());
    assert_eq!(&bytes[12..16], &SECRET_KEY.to_be_bytes());
}
