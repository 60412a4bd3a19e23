//! A scripted in-process PostgreSQL server for protocol tests.
//!
//! The client talks to one end of a `tokio::io::duplex` pipe; the test drives
//! the other end, asserting on decoded frontend messages and answering with
//! encoded backend messages.

#![allow(dead_code)]

use pg_conduit::protocol::backend::{
    Authentication, BackendKeyData, BackendMessage, CommandComplete, DataRow, ErrorResponse,
    FieldDescription, NotificationResponse, ParameterDescription, ParameterStatus, RowDescription,
};
use pg_conduit::protocol::frontend::FrontendMessage;
use pg_conduit::{Conn, ErrorFields, Oid, Opts, TransactionStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

pub const PROCESS_ID: u32 = 4242;
pub const SECRET_KEY: u32 = 0x0bad_cafe;

pub struct MockServer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl MockServer {
    /// Read the untagged startup packet.
    pub async fn read_untagged(&mut self) -> FrontendMessage {
        let len = self.reader.read_i32().await.expect("read packet length");
        let mut body = vec![0; len as usize - 4];
        self.reader.read_exact(&mut body).await.expect("read packet body");
        FrontendMessage::decode_untagged(&body).expect("decode untagged packet")
    }

    /// Read one tagged message.
    pub async fn read(&mut self) -> FrontendMessage {
        let tag = self.reader.read_u8().await.expect("read tag");
        let len = self.reader.read_i32().await.expect("read length");
        let mut body = vec![0; len as usize - 4];
        self.reader.read_exact(&mut body).await.expect("read body");
        FrontendMessage::decode(tag, &body).expect("decode message")
    }

    /// Read messages up to and including the next Sync.
    pub async fn read_until_sync(&mut self) -> Vec<FrontendMessage> {
        let mut messages = Vec::new();
        loop {
            let msg = self.read().await;
            let done = msg == FrontendMessage::Sync;
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    /// Read a simple Query and return its SQL.
    pub async fn read_query(&mut self) -> String {
        match self.read().await {
            FrontendMessage::Query(sql) => sql,
            other => panic!("expected Query, got {other:?}"),
        }
    }

    pub async fn send(&mut self, messages: &[BackendMessage]) {
        let mut buf = Vec::new();
        for msg in messages {
            msg.encode(&mut buf);
        }
        self.send_raw(&buf).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write to client");
        self.writer.flush().await.expect("flush to client");
    }

    /// Accept a trust-authenticated startup.
    pub async fn handshake(&mut self) {
        let startup = self.read_untagged().await;
        assert!(matches!(startup, FrontendMessage::Startup { .. }));
        self.send(&[
            BackendMessage::Authentication(Authentication::Ok),
            parameter_status("server_version", "16.2"),
            BackendMessage::BackendKeyData(BackendKeyData::new(PROCESS_ID, SECRET_KEY)),
            ready(TransactionStatus::Idle),
        ])
        .await;
    }

    /// Answer a simple query with a bare CommandComplete.
    pub async fn complete_query(&mut self, tag: &str, status: TransactionStatus) -> String {
        let sql = self.read_query().await;
        self.send(&[complete(tag), ready(status)]).await;
        sql
    }

    /// Expect the client's Terminate.
    pub async fn expect_terminate(&mut self) {
        assert_eq!(self.read().await, FrontendMessage::Terminate);
    }
}

pub fn pair() -> (DuplexStream, MockServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(server);
    (
        client,
        MockServer {
            reader: BufReader::new(read),
            writer: write,
        },
    )
}

pub fn opts() -> Opts {
    Opts {
        user: "postgres".into(),
        database: Some("app".into()),
        password: Some("password".into()),
        ..Default::default()
    }
}

/// Connect a client to a fresh mock server that has completed the handshake.
pub async fn connect() -> (Conn, MockServer) {
    connect_with(opts()).await
}

pub async fn connect_with(opts: Opts) -> (Conn, MockServer) {
    let (client, mut server) = pair();
    let accept = tokio::spawn(async move {
        server.handshake().await;
        server
    });
    let conn = Conn::connect_with_stream(client, opts)
        .await
        .expect("connect to mock server");
    let server = accept.await.expect("mock handshake");
    (conn, server)
}

pub fn ready(status: TransactionStatus) -> BackendMessage {
    BackendMessage::ReadyForQuery(status)
}

pub fn complete(tag: &str) -> BackendMessage {
    BackendMessage::CommandComplete(CommandComplete { tag: tag.into() })
}

pub fn parameter_status(name: &str, value: &str) -> BackendMessage {
    BackendMessage::ParameterStatus(ParameterStatus {
        name: name.into(),
        value: value.into(),
    })
}

pub fn parameter_description(oids: &[Oid]) -> BackendMessage {
    BackendMessage::ParameterDescription(ParameterDescription {
        param_oids: oids.to_vec(),
    })
}

pub fn row_description(columns: &[(&str, Oid)]) -> BackendMessage {
    BackendMessage::RowDescription(RowDescription {
        fields: columns
            .iter()
            .map(|(name, oid)| FieldDescription::new(*name, *oid))
            .collect(),
    })
}

pub fn data_row(values: &[Option<&str>]) -> BackendMessage {
    BackendMessage::DataRow(DataRow {
        values: values
            .iter()
            .map(|v| v.map(|s| s.as_bytes().to_vec()))
            .collect(),
    })
}

pub fn error(code: &str, message: &str) -> BackendMessage {
    error_with_severity("ERROR", code, message)
}

pub fn fatal(code: &str, message: &str) -> BackendMessage {
    error_with_severity("FATAL", code, message)
}

fn error_with_severity(severity: &str, code: &str, message: &str) -> BackendMessage {
    BackendMessage::ErrorResponse(ErrorResponse {
        fields: ErrorFields {
            severity: Some(severity.into()),
            severity_non_localized: Some(severity.into()),
            code: Some(code.into()),
            message: Some(message.into()),
            ..Default::default()
        },
    })
}

pub fn notification(channel: &str, payload: &str) -> BackendMessage {
    BackendMessage::NotificationResponse(NotificationResponse {
        process_id: 99,
        channel: channel.into(),
        payload: payload.into(),
    })
}
