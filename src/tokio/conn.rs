//! Asynchronous PostgreSQL connection.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frontend::FrontendMessage;
use crate::protocol::types::TransactionStatus;
use crate::row::QueryResult;
use crate::state::connection::{Handshake, startup};
use crate::state::extended::{self, Params, check_name};
use crate::state::portal;
use crate::state::simple_query::{Completion, simple_query};
use crate::state::Engine;
use crate::types::TypeRegistry;

use super::cancel::CancelToken;
use super::notification::Listener;
use super::row_stream::RowStream;
use super::statement::Statement;
use super::transaction::{self, Transaction};
use super::transport::{self, Tasks};

/// Asynchronous PostgreSQL connection.
///
/// Operations take `&self` and are serialized internally: each one holds the
/// connection until its final `ReadyForQuery`, so requests from different
/// handles never interleave on the wire. An open [`RowStream`] holds the
/// connection until it is drained or closed. Any other operation started in
/// the meantime waits at most the response timeout and then fails with
/// [`Error::Busy`], leaving the connection usable.
pub struct Conn {
    engine: Arc<Engine>,
    handshake: Handshake,
    host: String,
    port: u16,
    tasks: Tasks,
}

impl Conn {
    /// Connect to a PostgreSQL server over TCP.
    pub async fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
        tcp.set_nodelay(true)?;
        Self::connect_with_stream(tcp, opts).await
    }

    /// Connect over an already established stream, e.g. a TLS session.
    pub async fn connect_with_stream<S>(stream: S, opts: Opts) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::connect_with_registry(stream, opts, TypeRegistry::new()).await
    }

    /// Connect with a custom type registry.
    pub async fn connect_with_registry<S>(
        stream: S,
        opts: Opts,
        registry: TypeRegistry,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let transport = transport::spawn(stream, &opts);
        let engine = Arc::new(Engine::new(
            transport.requests,
            transport.responses,
            transport.subscriptions,
            Arc::new(registry),
            opts.response_timeout,
        ));

        let handshake = {
            let mut exchange = engine.exchange().await?;
            startup(&mut exchange, &opts).await?
        };
        debug!(process_id = handshake.process_id(), "connected");

        Ok(Self {
            engine,
            handshake,
            host: opts.host,
            port: opts.port,
            tasks: transport.tasks,
        })
    }

    /// Process ID, secret key and startup parameters.
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Current server parameters, including changes reported after startup.
    pub fn server_params(&self) -> HashMap<String, String> {
        self.engine.server_params()
    }

    pub fn server_param(&self, name: &str) -> Option<String> {
        self.engine.server_param(name)
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.engine.transaction_status()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status().in_transaction()
    }

    /// True once a fatal error has made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.engine.is_broken()
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.engine.registry()
    }

    /// Run a query and materialize its result.
    ///
    /// Without parameters the simple query protocol is used, so `sql` may
    /// hold several statements; the last one's result is returned. With
    /// parameters the query goes through the unnamed statement and portal.
    /// Returns `None` when the statement produces no result set.
    pub async fn query<P: ToParams>(&self, sql: &str, params: P) -> Result<Option<QueryResult>> {
        Ok(run_query(&self.engine, sql, &params).await?.result)
    }

    /// Run a statement and return the number of affected rows.
    pub async fn execute<P: ToParams>(&self, sql: &str, params: P) -> Result<u64> {
        Ok(run_query(&self.engine, sql, &params).await?.rows_affected())
    }

    /// Prepare a named statement.
    ///
    /// Without a name, a connection-unique one is generated. The statement is
    /// described once here and its row description reused by every execution.
    pub async fn prepare(&self, sql: &str, name: Option<&str>) -> Result<Statement> {
        prepare(&self.engine, sql, name).await
    }

    /// Stream a query's rows, fetching `batch` rows per round trip.
    ///
    /// Returns `None` when the statement produces no result set.
    pub async fn stream<P: ToParams>(
        &self,
        sql: &str,
        params: P,
        batch: u32,
    ) -> Result<Option<RowStream>> {
        stream(&self.engine, sql, &params, batch).await
    }

    /// Start a transaction with `BEGIN TRANSACTION`.
    pub async fn begin(&self) -> Result<Transaction<'_>> {
        Transaction::begin_top(self, &self.engine).await
    }

    /// Run `f` in a transaction.
    ///
    /// Commits when `f` returns `Ok`; rolls back when it returns `Err`, unless
    /// the error means the connection itself is gone.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let tx = self.begin().await?;
        transaction::run(tx, f).await
    }

    /// Subscribe to a notification channel.
    ///
    /// Listeners on the same channel share a single server-side `LISTEN`.
    pub async fn listen(&self, channel: &str) -> Result<Listener> {
        Listener::subscribe(&self.engine, channel).await
    }

    /// A token that can cancel this connection's running query from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(
            self.host.clone(),
            self.port,
            self.handshake.process_id(),
            self.handshake.secret_key(),
        )
    }

    /// Send `Terminate` and stop the transport.
    ///
    /// Waits for the running operation (and any queued cleanup) first.
    pub async fn close(mut self) -> Result<()> {
        let terminated = async {
            let _exchange = self.engine.exchange().await?;
            self.engine
                .send_detached(vec![FrontendMessage::Terminate])
                .await
        }
        .await;
        self.engine.mark_closed();
        self.engine.subscriptions().clear();
        match terminated {
            Ok(()) => {
                self.tasks.shutdown().await;
                Ok(())
            }
            Err(e) if e.is_connection_broken() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if !self.engine.is_closed() {
            self.engine.mark_closed();
            self.engine.subscriptions().clear();
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("handshake", &self.handshake)
            .finish()
    }
}

/// Encode parameters before touching the wire.
pub(crate) fn encode_params<P: ToParams + ?Sized>(engine: &Engine, params: &P) -> Result<Params> {
    engine.registry().encode_params(&params.to_values())
}

pub(crate) async fn run_query<P: ToParams + ?Sized>(
    engine: &Arc<Engine>,
    sql: &str,
    params: &P,
) -> Result<Completion> {
    if params.param_count() == 0 {
        let mut exchange = engine.exchange().await?;
        return simple_query(&mut exchange, sql).await;
    }
    let params = encode_params(engine, params)?;
    let mut exchange = engine.exchange().await?;
    extended::query(&mut exchange, sql, params).await
}

pub(crate) async fn prepare(engine: &Arc<Engine>, sql: &str, name: Option<&str>) -> Result<Statement> {
    let name = match name {
        Some(name) => {
            check_name("statement", name)?;
            name.to_string()
        }
        None => engine.next_name("statement"),
    };
    let prepared = {
        let mut exchange = engine.exchange().await?;
        extended::prepare(&mut exchange, &name, sql).await?
    };
    Ok(Statement::new(Arc::clone(engine), name, sql.to_string(), prepared))
}

pub(crate) async fn stream<P: ToParams + ?Sized>(
    engine: &Arc<Engine>,
    sql: &str,
    params: &P,
    batch: u32,
) -> Result<Option<RowStream>> {
    portal::check_batch(batch)?;
    let params = encode_params(engine, params)?;
    let exchange = engine.exchange().await?;
    Ok(portal::start(exchange, sql, params, batch)
        .await?
        .map(RowStream::new))
}
