//! Streaming execution of a portal.
//!
//! A producer task owns the exchange for the lifetime of the stream. It
//! forwards rows into a bounded channel and only asks for the next batch once
//! the consumer has made room, so an idle consumer stops the server from
//! producing more rows. The portal is closed once it is drained or abandoned.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::backend::BackendMessage;
use crate::protocol::frontend::{FrontendMessage, Target};
use crate::row::{Column, Row};

use super::extended::{Params, describe_result};
use super::{Exchange, State};

/// A started stream: the result columns, the row channel and the producer.
pub(crate) struct Started {
    pub(crate) columns: Arc<[Column]>,
    pub(crate) rows: mpsc::Receiver<Result<Row>>,
    pub(crate) producer: JoinHandle<Result<()>>,
}

/// How the producer left the batch loop.
enum Flow {
    Drained,
    /// The consumer went away; `sync_pending` when a batch was still in flight.
    Abandoned { sync_pending: bool },
}

pub(crate) fn check_batch(batch: u32) -> Result<()> {
    if batch == 0 {
        return Err(Error::InvalidUsage("stream batch size must be positive".into()));
    }
    Ok(())
}

/// Row channel capacity for a batch size.
///
/// One less than the batch, so a consumer that stops reading blocks the
/// producer before the next `Execute`. Never zero.
pub(crate) fn capacity(batch: u32) -> usize {
    (batch as usize).saturating_sub(1).max(1)
}

/// Send the first batch request and, if the query returns rows, spawn the producer.
///
/// Sends `Parse + Bind + Describe(Portal) + Execute(batch) + Sync`. Returns
/// `None` for statements without a result set.
pub(crate) async fn start(
    mut exchange: Exchange,
    sql: &str,
    params: Params,
    batch: u32,
) -> Result<Option<Started>> {
    exchange
        .send(vec![
            FrontendMessage::Parse {
                name: String::new(),
                query: sql.to_string(),
                param_types: Vec::new(),
            },
            FrontendMessage::Bind {
                portal: String::new(),
                statement: String::new(),
                params,
            },
            FrontendMessage::Describe {
                target: Target::Portal,
                name: String::new(),
            },
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: batch,
            },
            FrontendMessage::Sync,
        ])
        .await?;

    exchange
        .expect(State::AwaitingParseComplete, BackendMessage::ParseComplete)
        .await?;
    exchange
        .expect(State::AwaitingBindComplete, BackendMessage::BindComplete)
        .await?;

    let Some(columns) = describe_result(&mut exchange).await? else {
        exchange.set_state(State::AwaitingCommandComplete);
        match exchange.next().await? {
            BackendMessage::CommandComplete(_) | BackendMessage::EmptyQueryResponse => {}
            msg => return Err(exchange.unexpected(&msg)),
        }
        exchange.expect_ready().await?;
        return Ok(None);
    };

    Ok(Some(spawn(exchange, String::new(), columns, batch)))
}

/// Stream a prepared statement through the unnamed portal.
///
/// Sends `Bind + Execute(batch) + Sync`; the statement's cached row
/// description stands in for a Describe.
pub(crate) async fn start_prepared(
    mut exchange: Exchange,
    statement: &str,
    params: Params,
    columns: Arc<[Column]>,
    batch: u32,
) -> Result<Started> {
    exchange
        .send(vec![
            FrontendMessage::Bind {
                portal: String::new(),
                statement: statement.to_string(),
                params,
            },
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: batch,
            },
            FrontendMessage::Sync,
        ])
        .await?;
    exchange
        .expect(State::AwaitingBindComplete, BackendMessage::BindComplete)
        .await?;
    Ok(spawn(exchange, String::new(), columns, batch))
}

/// Stream the remaining rows of a bound named portal.
///
/// Sends `Execute(batch) + Sync`. Errors from the first batch reach the
/// consumer through the stream.
pub(crate) async fn resume(
    mut exchange: Exchange,
    portal: String,
    columns: Arc<[Column]>,
    batch: u32,
) -> Result<Started> {
    exchange
        .send(vec![
            FrontendMessage::Execute {
                portal: portal.clone(),
                max_rows: batch,
            },
            FrontendMessage::Sync,
        ])
        .await?;
    Ok(spawn(exchange, portal, columns, batch))
}

/// Hand the exchange, with the first batch requested, to a producer task.
fn spawn(exchange: Exchange, portal: String, columns: Arc<[Column]>, batch: u32) -> Started {
    let (tx, rows) = mpsc::channel(capacity(batch));
    let producer = tokio::spawn(produce(exchange, portal, Arc::clone(&columns), batch, tx));
    Started {
        columns,
        rows,
        producer,
    }
}

async fn produce(
    mut exchange: Exchange,
    portal: String,
    columns: Arc<[Column]>,
    batch: u32,
    rows: mpsc::Sender<Result<Row>>,
) -> Result<()> {
    match drive(&mut exchange, &portal, &columns, batch, &rows).await {
        Ok(Flow::Drained) => Ok(()),
        Ok(Flow::Abandoned { sync_pending }) => {
            let result = close_portal(&mut exchange, &portal, sync_pending).await;
            if let Err(e) = &result {
                warn!(error = %e, "closing an abandoned stream failed");
            }
            result
        }
        Err(e) => {
            // Surface the failure to the consumer instead of ending the stream early.
            if let Err(mpsc::error::SendError(Err(e))) = rows.send(Err(e)).await {
                debug!(error = %e, "stream failed after its consumer left");
            }
            Ok(())
        }
    }
}

async fn drive(
    exchange: &mut Exchange,
    portal: &str,
    columns: &Arc<[Column]>,
    batch: u32,
    rows: &mpsc::Sender<Result<Row>>,
) -> Result<Flow> {
    let registry = Arc::clone(exchange.engine().registry());
    loop {
        exchange.set_state(State::Streaming);
        loop {
            match exchange.next().await? {
                BackendMessage::DataRow(data) => {
                    let row = Row::new(Arc::clone(columns), data, Arc::clone(&registry))
                        .map_err(|e| exchange.broken(e))?;
                    if rows.send(Ok(row)).await.is_err() {
                        return Ok(Flow::Abandoned { sync_pending: true });
                    }
                }
                BackendMessage::PortalSuspended => break,
                BackendMessage::CommandComplete(_) | BackendMessage::EmptyQueryResponse => {
                    exchange.expect_ready().await?;
                    close_portal(exchange, portal, false).await?;
                    debug!(portal, "stream drained");
                    return Ok(Flow::Drained);
                }
                msg => return Err(exchange.unexpected(&msg)),
            }
        }
        exchange.expect_ready().await?;

        // Wait for room before asking the server for more.
        match rows.reserve().await {
            Ok(permit) => drop(permit),
            Err(_closed) => return Ok(Flow::Abandoned { sync_pending: false }),
        }
        trace!(batch, "fetching next batch");
        exchange
            .send(vec![
                FrontendMessage::Execute {
                    portal: portal.to_string(),
                    max_rows: batch,
                },
                FrontendMessage::Sync,
            ])
            .await?;
    }
}

/// Send `Close(Portal) + Sync` and consume through its `ReadyForQuery`.
///
/// With `sync_pending`, the rest of the in-flight batch (rows, the trailing
/// `PortalSuspended` or `CommandComplete` and its `ReadyForQuery`) is
/// discarded first.
async fn close_portal(exchange: &mut Exchange, portal: &str, sync_pending: bool) -> Result<()> {
    exchange
        .send(vec![
            FrontendMessage::Close {
                target: Target::Portal,
                name: portal.to_string(),
            },
            FrontendMessage::Sync,
        ])
        .await?;

    exchange.set_state(State::AwaitingCloseComplete);
    let mut pending = if sync_pending { 2 } else { 1 };
    let mut closed = false;
    let mut failure = None;
    while pending > 0 {
        match exchange.recv().await? {
            BackendMessage::ReadyForQuery(_) => pending -= 1,
            BackendMessage::CloseComplete if pending == 1 => closed = true,
            BackendMessage::ErrorResponse(err) => {
                let err = err.into_error();
                if err.is_connection_broken() {
                    return Err(exchange.broken(err));
                }
                if pending == 1 {
                    failure = Some(err);
                } else {
                    trace!(error = %err, "discarded");
                }
            }
            msg => trace!(message = msg.name(), "discarded"),
        }
    }
    exchange.set_state(State::Idle);

    match failure {
        Some(err) => Err(err),
        None if closed => Ok(()),
        None => Err(exchange.broken(Error::Protocol(
            "ReadyForQuery without CloseComplete after closing portal".into(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_must_be_positive() {
        assert!(matches!(check_batch(0), Err(Error::InvalidUsage(_))));
        assert!(check_batch(1).is_ok());
    }

    #[test]
    fn channel_under_buffers_by_one() {
        assert_eq!(capacity(2), 1);
        assert_eq!(capacity(100), 99);
        assert_eq!(capacity(1), 1);
    }
}
