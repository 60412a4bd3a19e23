//! Extended query protocol: prepare, bind, execute, close.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::BackendMessage;
use crate::protocol::frontend::{FrontendMessage, Target};
use crate::protocol::types::Oid;
use crate::row::{Column, QueryResult, Row};

use super::simple_query::Completion;
use super::{Exchange, State};

/// Encoded Bind parameters; `None` is NULL.
pub(crate) type Params = Vec<Option<Vec<u8>>>;

/// Server description of a prepared statement.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) param_oids: Vec<Oid>,
    pub(crate) columns: Option<Arc<[Column]>>,
}

/// Named handles never use the unnamed slot.
pub(crate) fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidUsage(format!("{} name must not be empty", kind)));
    }
    Ok(())
}

/// Parse and describe a named statement.
///
/// Sends `Parse + Describe(Statement) + Sync`.
pub(crate) async fn prepare(exchange: &mut Exchange, name: &str, sql: &str) -> Result<Prepared> {
    check_name("statement", name)?;
    exchange
        .send(vec![
            FrontendMessage::Parse {
                name: name.to_string(),
                query: sql.to_string(),
                param_types: Vec::new(),
            },
            FrontendMessage::Describe {
                target: Target::Statement,
                name: name.to_string(),
            },
            FrontendMessage::Sync,
        ])
        .await?;

    exchange
        .expect(State::AwaitingParseComplete, BackendMessage::ParseComplete)
        .await?;

    exchange.set_state(State::AwaitingParameterDescription);
    let param_oids = match exchange.next().await? {
        BackendMessage::ParameterDescription(desc) => desc.param_oids,
        msg => return Err(exchange.unexpected(&msg)),
    };

    let columns = describe_result(exchange).await?;
    exchange.expect_ready().await?;
    Ok(Prepared {
        param_oids,
        columns,
    })
}

/// One-shot query through the unnamed statement and portal.
///
/// Sends `Parse + Bind + Describe(Portal) + Execute + Sync`.
pub(crate) async fn query(exchange: &mut Exchange, sql: &str, params: Params) -> Result<Completion> {
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
                max_rows: 0,
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
    let columns = describe_result(exchange).await?;
    collect(exchange, columns).await
}

/// Execute a prepared statement whose result shape is already known.
///
/// Sends `Bind + Execute + Sync` on the unnamed portal.
pub(crate) async fn execute(
    exchange: &mut Exchange,
    statement: &str,
    params: Params,
    columns: Option<Arc<[Column]>>,
) -> Result<Completion> {
    exchange
        .send(vec![
            FrontendMessage::Bind {
                portal: String::new(),
                statement: statement.to_string(),
                params,
            },
            FrontendMessage::Execute {
                portal: String::new(),
                max_rows: 0,
            },
            FrontendMessage::Sync,
        ])
        .await?;

    exchange
        .expect(State::AwaitingBindComplete, BackendMessage::BindComplete)
        .await?;
    collect(exchange, columns).await
}

/// Bind a prepared statement to a named portal and describe its rows.
///
/// Sends `Bind + Describe(Portal) + Sync`.
pub(crate) async fn bind(
    exchange: &mut Exchange,
    portal: &str,
    statement: &str,
    params: Params,
) -> Result<Option<Arc<[Column]>>> {
    bind_portal(exchange, portal, None, statement, params).await
}

/// Parse `sql` into the unnamed statement and bind it to a named portal.
///
/// Sends `Parse + Bind + Describe(Portal) + Sync`.
pub(crate) async fn bind_sql(
    exchange: &mut Exchange,
    portal: &str,
    sql: &str,
    params: Params,
) -> Result<Option<Arc<[Column]>>> {
    bind_portal(exchange, portal, Some(sql), "", params).await
}

async fn bind_portal(
    exchange: &mut Exchange,
    portal: &str,
    sql: Option<&str>,
    statement: &str,
    params: Params,
) -> Result<Option<Arc<[Column]>>> {
    check_name("portal", portal)?;
    let mut bundle = Vec::with_capacity(4);
    if let Some(sql) = sql {
        bundle.push(FrontendMessage::Parse {
            name: String::new(),
            query: sql.to_string(),
            param_types: Vec::new(),
        });
    }
    bundle.extend([
        FrontendMessage::Bind {
            portal: portal.to_string(),
            statement: statement.to_string(),
            params,
        },
        FrontendMessage::Describe {
            target: Target::Portal,
            name: portal.to_string(),
        },
        FrontendMessage::Sync,
    ]);
    exchange.send(bundle).await?;

    if sql.is_some() {
        exchange
            .expect(State::AwaitingParseComplete, BackendMessage::ParseComplete)
            .await?;
    }
    exchange
        .expect(State::AwaitingBindComplete, BackendMessage::BindComplete)
        .await?;
    let columns = describe_result(exchange).await?;
    exchange.expect_ready().await?;
    Ok(columns)
}

/// Fetch up to `max_rows` rows (0 = all) from a named portal.
///
/// Returns the rows and whether the portal was suspended with more to come.
pub(crate) async fn fetch(
    exchange: &mut Exchange,
    portal: &str,
    max_rows: u32,
    columns: Option<&Arc<[Column]>>,
) -> Result<(Vec<Row>, bool)> {
    exchange
        .send(vec![
            FrontendMessage::Execute {
                portal: portal.to_string(),
                max_rows,
            },
            FrontendMessage::Sync,
        ])
        .await?;

    let registry = Arc::clone(exchange.engine().registry());
    let mut rows = Vec::new();
    exchange.set_state(State::Streaming);
    let suspended = loop {
        match (exchange.next().await?, columns) {
            (BackendMessage::DataRow(data), Some(columns)) => {
                let row = Row::new(Arc::clone(columns), data, Arc::clone(&registry))
                    .map_err(|e| exchange.broken(e))?;
                rows.push(row);
            }
            (BackendMessage::PortalSuspended, _) => break true,
            (BackendMessage::CommandComplete(_) | BackendMessage::EmptyQueryResponse, _) => {
                break false;
            }
            (msg, _) => return Err(exchange.unexpected(&msg)),
        }
    };
    exchange.expect_ready().await?;
    Ok((rows, suspended))
}

/// Close a named statement or portal.
///
/// Sends `Close + Sync`.
pub(crate) async fn close(exchange: &mut Exchange, target: Target, name: &str) -> Result<()> {
    check_name(
        match target {
            Target::Statement => "statement",
            Target::Portal => "portal",
        },
        name,
    )?;
    exchange
        .send(vec![
            FrontendMessage::Close {
                target,
                name: name.to_string(),
            },
            FrontendMessage::Sync,
        ])
        .await?;
    exchange
        .expect(State::AwaitingCloseComplete, BackendMessage::CloseComplete)
        .await?;
    exchange.expect_ready().await?;
    Ok(())
}

/// `RowDescription` or `NoData` after a Describe.
pub(crate) async fn describe_result(exchange: &mut Exchange) -> Result<Option<Arc<[Column]>>> {
    exchange.set_state(State::AwaitingDescribe);
    match exchange.next().await? {
        BackendMessage::RowDescription(desc) => Ok(Some(desc.fields.into())),
        BackendMessage::NoData => Ok(None),
        msg => Err(exchange.unexpected(&msg)),
    }
}

/// Rows of a fully executed portal, through ReadyForQuery.
async fn collect(exchange: &mut Exchange, columns: Option<Arc<[Column]>>) -> Result<Completion> {
    let registry = Arc::clone(exchange.engine().registry());
    let mut result = columns.map(QueryResult::new);
    let mut completion = Completion::default();

    exchange.set_state(State::AwaitingCommandComplete);
    loop {
        match exchange.next().await? {
            BackendMessage::DataRow(data) => match result.as_mut() {
                Some(result) => result
                    .push(data, &registry)
                    .map_err(|e| exchange.broken(e))?,
                None => return Err(exchange.unexpected(&BackendMessage::DataRow(data))),
            },
            BackendMessage::CommandComplete(command) => {
                if let Some(mut result) = result.take() {
                    result.finish(command.clone());
                    completion.result = Some(result);
                }
                completion.command = Some(command);
                break;
            }
            BackendMessage::EmptyQueryResponse => break,
            msg => return Err(exchange.unexpected(&msg)),
        }
    }
    exchange.expect_ready().await?;
    Ok(completion)
}
