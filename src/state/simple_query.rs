//! Simple query protocol.

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::backend::{BackendMessage, CommandComplete};
use crate::protocol::frontend::FrontendMessage;
use crate::row::{Column, QueryResult};

use super::{Exchange, State};

/// Outcome of the last statement of a query.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    /// The result set, if the statement produced one.
    pub(crate) result: Option<QueryResult>,
    /// Its CommandComplete; absent for an empty query.
    pub(crate) command: Option<CommandComplete>,
}

impl Completion {
    pub(crate) fn rows_affected(&self) -> u64 {
        self.command
            .as_ref()
            .and_then(CommandComplete::rows_affected)
            .unwrap_or(0)
    }
}

/// Run `sql` (possibly several statements) and return the last statement's outcome.
pub(crate) async fn simple_query(exchange: &mut Exchange, sql: &str) -> Result<Completion> {
    exchange
        .send(vec![FrontendMessage::Query(sql.to_string())])
        .await?;
    exchange.set_state(State::AwaitingRows);

    let registry = Arc::clone(exchange.engine().registry());
    let mut current: Option<QueryResult> = None;
    let mut completion = Completion::default();

    loop {
        let msg = exchange.next().await?;
        match (exchange.state(), msg) {
            (State::AwaitingRows, BackendMessage::RowDescription(desc)) => {
                let columns: Arc<[Column]> = desc.fields.into();
                current = Some(QueryResult::new(columns));
                exchange.set_state(State::AwaitingCommandComplete);
            }
            (State::AwaitingCommandComplete, BackendMessage::DataRow(row)) => {
                if let Some(result) = current.as_mut() {
                    result
                        .push(row, &registry)
                        .map_err(|e| exchange.broken(e))?;
                }
            }
            (State::AwaitingRows | State::AwaitingCommandComplete, BackendMessage::CommandComplete(command)) => {
                completion.result = current.take().map(|mut result| {
                    result.finish(command.clone());
                    result
                });
                completion.command = Some(command);
                exchange.set_state(State::AwaitingRows);
            }
            (State::AwaitingRows, BackendMessage::EmptyQueryResponse) => {
                completion = Completion::default();
            }
            (State::AwaitingRows, BackendMessage::ReadyForQuery(_)) => {
                exchange.set_state(State::Idle);
                return Ok(completion);
            }
            (_, msg) => return Err(exchange.unexpected(&msg)),
        }
    }
}
