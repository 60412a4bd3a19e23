//! An asynchronous PostgreSQL client speaking wire protocol v3.
//!
//! # Features
//!
//! - **Pipelined transport**: a send loop and a receive loop own the socket;
//!   the protocol engine talks to them over channels
//! - **Simple and extended query**: text-format parameters, prepared
//!   statements and named portals
//! - **Streaming**: rows arrive in batches through a bounded channel
//! - **Transactions**: nested transactions map onto savepoints
//! - **LISTEN/NOTIFY**: notifications are fanned out to every listener of a
//!   channel
//! - **Cancellation**: out-of-band `CancelRequest` on a separate connection
//!
//! # Example
//!
//! ```no_run
//! use pg_conduit::{Conn, Opts};
//!
//! async fn run() -> pg_conduit::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let conn = Conn::connect(opts).await?;
//!
//!     if let Some(result) = conn.query("SELECT $1::int4 + 1 AS num", (41_i32,)).await? {
//!         let rows: Vec<(i32,)> = result.decode()?;
//!         println!("Rows: {:?}", rows);
//!     }
//!
//!     let mut tx = conn.begin().await?;
//!     tx.execute("INSERT INTO log (msg) VALUES ($1)", ("hello",)).await?;
//!     tx.commit().await?;
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod conversion;
pub mod error;
pub mod opts;
pub mod protocol;
pub mod row;
pub(crate) mod state;
pub mod tokio;
pub mod types;
pub mod value;

pub use conversion::{FromRow, FromWireValue, ToParams, ToWireValue};
pub use error::{Error, ErrorFields, Result};
pub use opts::Opts;
pub use protocol::types::{Oid, TransactionStatus};
pub use row::{Column, QueryResult, Row, RowIndex};
pub use state::connection::Handshake;
pub use tokio::{
    CancelToken, Conn, Listener, Notification, Portal, RowStream, Statement, Transaction,
};
pub use types::{PgType, TypeRegistry};
pub use value::Value;
