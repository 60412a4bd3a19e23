//! Named portals for batch-wise fetching inside a transaction.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::frontend::Target;
use crate::row::{Column, Row};
use crate::state::Engine;
use crate::state::{extended, portal};

use super::row_stream::RowStream;

/// Handle to a named portal.
///
/// Created by [`Transaction::bind`](super::Transaction::bind) or
/// [`Transaction::bind_sql`](super::Transaction::bind_sql). The lifetime
/// ties the portal to its transaction, since the server drops portals when
/// the transaction ends.
///
/// # Example
///
/// ```ignore
/// let stmt = conn.prepare("SELECT id FROM jobs", None).await?;
/// let mut tx = conn.begin().await?;
/// let mut portal = tx.bind(&stmt, (), None).await?;
/// while !portal.is_complete() {
///     for row in portal.fetch(100).await? {
///         process(row.get::<i32>(0)?);
///     }
/// }
/// portal.close().await?;
/// tx.commit().await?;
/// ```
pub struct Portal<'tx> {
    engine: Arc<Engine>,
    name: String,
    columns: Option<Arc<[Column]>>,
    complete: bool,
    _tx: PhantomData<&'tx ()>,
}

impl Portal<'_> {
    pub(crate) fn new(engine: Arc<Engine>, name: String, columns: Option<Arc<[Column]>>) -> Self {
        Self {
            engine,
            name,
            columns,
            complete: false,
            _tx: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Result columns, or `None` if the portal returns no rows.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// True once the portal has no more rows.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Fetch up to `max_rows` rows; 0 fetches all remaining rows.
    pub async fn fetch(&mut self, max_rows: u32) -> Result<Vec<Row>> {
        if self.complete {
            return Ok(Vec::new());
        }
        let mut exchange = self.engine.exchange().await?;
        let (rows, suspended) =
            extended::fetch(&mut exchange, &self.name, max_rows, self.columns.as_ref()).await?;
        self.complete = !suspended;
        Ok(rows)
    }

    /// Stream the remaining rows, `batch` per round trip.
    ///
    /// The portal is closed once the stream is drained or closed. A portal
    /// without a result set is run to completion, closed, and yields `None`.
    pub async fn stream(mut self, batch: u32) -> Result<Option<RowStream>> {
        portal::check_batch(batch)?;
        let columns = match self.columns.clone() {
            Some(columns) if !self.complete => columns,
            _ => {
                self.fetch(0).await?;
                self.close().await?;
                return Ok(None);
            }
        };
        let exchange = self.engine.exchange().await?;
        let started = portal::resume(exchange, self.name, columns, batch).await?;
        Ok(Some(RowStream::new(started)))
    }

    /// Release the portal on the server.
    pub async fn close(self) -> Result<()> {
        let mut exchange = self.engine.exchange().await?;
        extended::close(&mut exchange, Target::Portal, &self.name).await
    }
}
