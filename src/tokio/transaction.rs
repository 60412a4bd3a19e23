//! Transactions and savepoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::row::QueryResult;
use crate::state::Engine;
use crate::state::extended::{self, check_name};

use super::Conn;
use super::conn::{encode_params, prepare, run_query, stream};
use super::portal::Portal;
use super::row_stream::RowStream;
use super::statement::Statement;

/// A transaction, or a savepoint nested inside one.
///
/// The top level is opened with `BEGIN TRANSACTION`; [`begin`](Self::begin)
/// nests a savepoint (`savepoint_0`, then `savepoint_1`, ...). A server error
/// from any query run through the transaction rolls it back before the error
/// is returned. Dropping an unfinished transaction rolls it back before the
/// connection's next operation.
pub struct Transaction<'c> {
    conn: &'c Conn,
    engine: Arc<Engine>,
    savepoint: Option<u32>,
    finished: AtomicBool,
}

impl<'c> Transaction<'c> {
    pub(crate) async fn begin_top(conn: &'c Conn, engine: &Arc<Engine>) -> Result<Self> {
        run_query(engine, "BEGIN TRANSACTION", &()).await?;
        Ok(Self {
            conn,
            engine: Arc::clone(engine),
            savepoint: None,
            finished: AtomicBool::new(false),
        })
    }

    /// Nesting depth: 0 for the top level, N for the N-th savepoint.
    pub fn depth(&self) -> u32 {
        self.savepoint.map_or(0, |n| n + 1)
    }

    /// Savepoint name, `None` at the top level.
    pub fn savepoint(&self) -> Option<String> {
        self.savepoint.map(savepoint_name)
    }

    /// The connection the transaction runs on.
    pub fn connection(&self) -> &'c Conn {
        self.conn
    }

    /// True after commit, rollback or an automatic rollback.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_finished() {
            return Err(Error::InvalidUsage("transaction already finished".into()));
        }
        Ok(())
    }

    fn commit_sql(&self) -> String {
        match self.savepoint {
            None => "COMMIT TRANSACTION".to_string(),
            Some(n) => format!("RELEASE SAVEPOINT {}", savepoint_name(n)),
        }
    }

    fn rollback_sql(&self) -> String {
        match self.savepoint {
            None => "ROLLBACK TRANSACTION".to_string(),
            Some(n) => format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(n)),
        }
    }

    /// Open a nested savepoint.
    pub async fn begin(&mut self) -> Result<Transaction<'_>> {
        self.check()?;
        let next = self.savepoint.map_or(0, |n| n + 1);
        let sql = format!("SAVEPOINT {}", savepoint_name(next));
        self.guard(run_query(&self.engine, &sql, &()).await).await?;
        Ok(Transaction {
            conn: self.conn,
            engine: Arc::clone(&self.engine),
            savepoint: Some(next),
            finished: AtomicBool::new(false),
        })
    }

    /// Run `f` inside a nested savepoint, releasing it on `Ok` and rolling
    /// back to it on `Err`.
    pub async fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let nested = self.begin().await?;
        run(nested, f).await
    }

    /// `COMMIT TRANSACTION`, or `RELEASE SAVEPOINT` when nested.
    pub async fn commit(self) -> Result<()> {
        self.check()?;
        self.finished.store(true, Ordering::Release);
        run_query(&self.engine, &self.commit_sql(), &()).await?;
        Ok(())
    }

    /// `ROLLBACK TRANSACTION`, or `ROLLBACK TO SAVEPOINT` when nested.
    pub async fn rollback(self) -> Result<()> {
        self.check()?;
        self.finished.store(true, Ordering::Release);
        run_query(&self.engine, &self.rollback_sql(), &()).await?;
        Ok(())
    }

    /// Roll back after a server error and pass the error on.
    ///
    /// A failed rollback is attached to the original error.
    async fn guard<T>(&self, result: Result<T>) -> Result<T> {
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !matches!(err, Error::Server(_)) || err.is_connection_broken() || self.is_finished() {
            return Err(err);
        }
        self.finished.store(true, Ordering::Release);
        match run_query(&self.engine, &self.rollback_sql(), &()).await {
            Ok(_) => Err(err),
            Err(rollback) => {
                warn!(error = %rollback, "rollback after server error failed");
                Err(err.with_suppressed(rollback))
            }
        }
    }

    /// [`Conn::query`] within the transaction.
    pub async fn query<P: ToParams>(&self, sql: &str, params: P) -> Result<Option<QueryResult>> {
        self.check()?;
        let completion = self.guard(run_query(&self.engine, sql, &params).await).await?;
        Ok(completion.result)
    }

    /// [`Conn::execute`] within the transaction.
    pub async fn execute<P: ToParams>(&self, sql: &str, params: P) -> Result<u64> {
        self.check()?;
        let completion = self.guard(run_query(&self.engine, sql, &params).await).await?;
        Ok(completion.rows_affected())
    }

    /// [`Conn::prepare`] within the transaction.
    pub async fn prepare(&self, sql: &str, name: Option<&str>) -> Result<Statement> {
        self.check()?;
        self.guard(prepare(&self.engine, sql, name).await).await
    }

    /// [`Statement::query`] within the transaction.
    pub async fn query_prepared<P: ToParams>(
        &self,
        statement: &Statement,
        params: P,
    ) -> Result<Option<QueryResult>> {
        self.check()?;
        self.guard(statement.query(params).await).await
    }

    /// [`Conn::stream`] within the transaction.
    ///
    /// Errors surfacing later through the stream do not roll back.
    pub async fn stream<P: ToParams>(
        &self,
        sql: &str,
        params: P,
        batch: u32,
    ) -> Result<Option<RowStream>> {
        self.check()?;
        self.guard(stream(&self.engine, sql, &params, batch).await).await
    }

    /// [`Statement::stream`] within the transaction.
    pub async fn stream_prepared<P: ToParams>(
        &self,
        statement: &Statement,
        params: P,
        batch: u32,
    ) -> Result<Option<RowStream>> {
        self.check()?;
        self.guard(statement.stream(params, batch).await).await
    }

    /// Bind a prepared statement to a named portal.
    ///
    /// Portals only outlive their `Sync` inside a transaction block, so they
    /// are created from a transaction and cannot outlive it. Without a name,
    /// a connection-unique one is generated.
    pub async fn bind<P: ToParams>(
        &self,
        statement: &Statement,
        params: P,
        name: Option<&str>,
    ) -> Result<Portal<'_>> {
        self.check()?;
        let name = self.portal_name(name)?;
        statement.check_params(&params)?;
        let params = encode_params(&self.engine, &params)?;
        let bound = async {
            let mut exchange = self.engine.exchange().await?;
            extended::bind(&mut exchange, &name, statement.name(), params).await
        }
        .await;
        let columns = self.guard(bound).await?;
        Ok(Portal::new(Arc::clone(&self.engine), name, columns))
    }

    /// Parse `sql` and bind it to a named portal in one round trip.
    ///
    /// Like [`bind`](Self::bind), without a separately prepared statement.
    pub async fn bind_sql<P: ToParams>(
        &self,
        sql: &str,
        params: P,
        name: Option<&str>,
    ) -> Result<Portal<'_>> {
        self.check()?;
        let name = self.portal_name(name)?;
        let params = encode_params(&self.engine, &params)?;
        let bound = async {
            let mut exchange = self.engine.exchange().await?;
            extended::bind_sql(&mut exchange, &name, sql, params).await
        }
        .await;
        let columns = self.guard(bound).await?;
        Ok(Portal::new(Arc::clone(&self.engine), name, columns))
    }

    fn portal_name(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(name) => {
                check_name("portal", name)?;
                Ok(name.to_string())
            }
            None => Ok(self.engine.next_name("portal")),
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.engine.defer(self.rollback_sql());
        }
    }
}

fn savepoint_name(n: u32) -> String {
    format!("savepoint_{}", n)
}

/// Run `f` in `tx`, committing on `Ok` and rolling back on `Err`.
///
/// Errors that mean the connection is gone skip the rollback; a failed
/// rollback is attached to the original error.
pub(crate) async fn run<T, F>(mut tx: Transaction<'_>, f: F) -> Result<T>
where
    F: AsyncFnOnce(&mut Transaction<'_>) -> Result<T>,
{
    match f(&mut tx).await {
        Ok(value) => {
            if !tx.is_finished() {
                tx.commit().await?;
            }
            Ok(value)
        }
        Err(err) => {
            if tx.is_finished() || err.is_connection_broken() {
                tx.finished.store(true, Ordering::Release);
                return Err(err);
            }
            match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => {
                    warn!(error = %rollback, "transaction rollback failed");
                    Err(err.with_suppressed(rollback))
                }
            }
        }
    }
}
