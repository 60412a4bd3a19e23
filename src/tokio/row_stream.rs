//! Row streams backed by a streaming portal.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::row::{Column, Row};
use crate::state::portal::Started;

/// Rows of a streaming query, fetched in batches as they are consumed.
///
/// Implements [`futures_core::Stream`]. Stopping early is done with
/// [`close`](Self::close), which waits until the portal is closed on the
/// server; simply dropping the stream runs the same cleanup in the
/// background before the connection's next operation.
pub struct RowStream {
    columns: Arc<[Column]>,
    rows: mpsc::Receiver<Result<Row>>,
    producer: Option<JoinHandle<Result<()>>>,
}

impl RowStream {
    pub(crate) fn new(started: Started) -> Self {
        Self {
            columns: started.columns,
            rows: started.rows,
            producer: Some(started.producer),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Next row; `None` once the portal is drained.
    pub async fn next_row(&mut self) -> Option<Result<Row>> {
        self.rows.recv().await
    }

    /// Read every remaining row.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.rows.recv().await {
            rows.push(row?);
        }
        self.finish().await?;
        Ok(rows)
    }

    /// Stop reading and close the portal.
    ///
    /// Rows still in flight are discarded. Returns once the connection is
    /// ready for the next operation.
    pub async fn close(mut self) -> Result<()> {
        self.rows.close();
        self.finish().await
    }

    async fn finish(&mut self) -> Result<()> {
        match self.producer.take() {
            Some(producer) => producer
                .await
                .map_err(|e| Error::Protocol(format!("stream producer failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl futures_core::Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rows.poll_recv(cx)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns.len())
            .finish()
    }
}
