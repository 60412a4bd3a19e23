//! Named prepared statements.

use std::sync::Arc;

use crate::conversion::ToParams;
use crate::error::{Error, Result};
use crate::protocol::frontend::Target;
use crate::protocol::types::Oid;
use crate::row::{Column, QueryResult};
use crate::state::Engine;
use crate::state::extended::{self, Prepared};
use crate::state::portal;

use super::conn::encode_params;
use super::row_stream::RowStream;

/// A server-side prepared statement.
///
/// The server owns the statement until [`close`](Self::close) is called;
/// dropping the handle leaves it allocated for the rest of the session.
pub struct Statement {
    engine: Arc<Engine>,
    name: String,
    sql: String,
    param_oids: Vec<Oid>,
    columns: Option<Arc<[Column]>>,
}

impl Statement {
    pub(crate) fn new(engine: Arc<Engine>, name: String, sql: String, prepared: Prepared) -> Self {
        Self {
            engine,
            name,
            sql,
            param_oids: prepared.param_oids,
            columns: prepared.columns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter types inferred by the server.
    pub fn param_types(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Result columns, or `None` if the statement returns no rows.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    pub(crate) fn check_params<P: ToParams + ?Sized>(&self, params: &P) -> Result<()> {
        if params.param_count() != self.param_oids.len() {
            return Err(Error::InvalidUsage(format!(
                "statement {} expects {} parameters, got {}",
                self.name,
                self.param_oids.len(),
                params.param_count()
            )));
        }
        Ok(())
    }

    /// Execute with `params` and materialize the result.
    pub async fn query<P: ToParams>(&self, params: P) -> Result<Option<QueryResult>> {
        self.check_params(&params)?;
        let params = encode_params(&self.engine, &params)?;
        let mut exchange = self.engine.exchange().await?;
        let completion =
            extended::execute(&mut exchange, &self.name, params, self.columns.clone()).await?;
        Ok(completion.result)
    }

    /// Execute with `params` and return the number of affected rows.
    pub async fn execute<P: ToParams>(&self, params: P) -> Result<u64> {
        self.check_params(&params)?;
        let params = encode_params(&self.engine, &params)?;
        let mut exchange = self.engine.exchange().await?;
        let completion =
            extended::execute(&mut exchange, &self.name, params, self.columns.clone()).await?;
        Ok(completion.rows_affected())
    }

    /// Execute with `params`, streaming rows `batch` at a time.
    ///
    /// Uses the unnamed portal like [`Conn::stream`](super::Conn::stream).
    /// A statement without a result set is executed and yields `None`.
    pub async fn stream<P: ToParams>(&self, params: P, batch: u32) -> Result<Option<RowStream>> {
        portal::check_batch(batch)?;
        self.check_params(&params)?;
        let params = encode_params(&self.engine, &params)?;
        let mut exchange = self.engine.exchange().await?;
        let Some(columns) = &self.columns else {
            extended::execute(&mut exchange, &self.name, params, None).await?;
            return Ok(None);
        };
        let started =
            portal::start_prepared(exchange, &self.name, params, Arc::clone(columns), batch)
                .await?;
        Ok(Some(RowStream::new(started)))
    }

    /// Release the statement on the server.
    pub async fn close(self) -> Result<()> {
        let mut exchange = self.engine.exchange().await?;
        extended::close(&mut exchange, Target::Statement, &self.name).await
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("name", &self.name)
            .field("sql", &self.sql)
            .field("param_oids", &self.param_oids)
            .finish()
    }
}
