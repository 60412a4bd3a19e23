//! Protocol engine.
//!
//! The engine owns the response queue behind an async mutex. Every operation
//! locks it as an [`Exchange`], writes its request bundle (always ending in
//! `Sync`, or `Query` for the simple protocol) and consumes responses up to
//! the matching `ReadyForQuery`, so only one exchange is ever in flight.

pub(crate) mod connection;
pub(crate) mod extended;
pub(crate) mod portal;
pub(crate) mod simple_query;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::backend::{BackendMessage, ParameterStatus};
use crate::protocol::types::TransactionStatus;
use crate::tokio::transport::{Bundle, Response, Subscriptions};
use crate::types::TypeRegistry;

/// Where an exchange stands in its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    AwaitingAuthentication,
    AwaitingSaslContinue,
    AwaitingSaslFinal,
    AwaitingAuthenticationOk,
    AwaitingStartupComplete,
    AwaitingRows,
    AwaitingParseComplete,
    AwaitingParameterDescription,
    AwaitingBindComplete,
    AwaitingDescribe,
    Streaming,
    AwaitingCommandComplete,
    AwaitingCloseComplete,
    AwaitingReadyForQuery,
}

/// Shared connection state, referenced by every handle.
pub(crate) struct Engine {
    requests: mpsc::Sender<Bundle>,
    responses: Arc<AsyncMutex<mpsc::Receiver<Response>>>,
    subscriptions: Arc<Subscriptions>,
    registry: Arc<TypeRegistry>,
    timeout: Duration,
    broken: AtomicBool,
    closed: AtomicBool,
    status: AtomicU8,
    server_params: Mutex<HashMap<String, String>>,
    counter: AtomicU64,
    deferred: Mutex<Vec<String>>,
}

impl Engine {
    pub(crate) fn new(
        requests: mpsc::Sender<Bundle>,
        responses: mpsc::Receiver<Response>,
        subscriptions: Arc<Subscriptions>,
        registry: Arc<TypeRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            requests,
            responses: Arc::new(AsyncMutex::new(responses)),
            subscriptions,
            registry,
            timeout,
            broken: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            status: AtomicU8::new(TransactionStatus::Idle.as_byte()),
            server_params: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// Fail fast once the connection is closed or broken.
    pub(crate) fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if self.broken.load(Ordering::Acquire) {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    pub(crate) fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            debug!("connection marked broken");
        }
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Status byte of the last ReadyForQuery.
    pub(crate) fn transaction_status(&self) -> TransactionStatus {
        TransactionStatus::from_byte(self.status.load(Ordering::Acquire))
            .unwrap_or(TransactionStatus::Idle)
    }

    fn set_transaction_status(&self, status: TransactionStatus) {
        self.status.store(status.as_byte(), Ordering::Release);
    }

    pub(crate) fn server_params(&self) -> HashMap<String, String> {
        self.server_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn server_param(&self, name: &str) -> Option<String> {
        self.server_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn set_server_param(&self, status: ParameterStatus) {
        trace!(name = %status.name, value = %status.value, "parameter status");
        self.server_params
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(status.name, status.value);
    }

    pub(crate) fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub(crate) fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// A connection-unique server-side name.
    pub(crate) fn next_name(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a cleanup statement from a `Drop` impl.
    ///
    /// It runs at the start of the next exchange; when a runtime is available
    /// a task is spawned to start that exchange right away.
    pub(crate) fn defer(self: &Arc<Self>, sql: String) {
        if self.check().is_err() {
            return;
        }
        debug!(sql = %sql, "deferring cleanup");
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let engine = Arc::clone(self);
            handle.spawn(async move {
                match engine.exchange().await {
                    Ok(_exchange) => {}
                    // Still queued; the next operation runs it.
                    Err(Error::Busy(_)) => debug!("deferred cleanup waits for the connection"),
                    Err(e) => warn!(error = %e, "deferred cleanup failed"),
                }
            });
        }
    }

    /// Lock the response queue for one operation.
    ///
    /// Waits at most the response timeout for the operation holding the
    /// connection (an open row stream holds it until drained or closed) and
    /// then fails with `Busy`. Cleanup statements queued by dropped handles
    /// run first.
    pub(crate) async fn exchange(self: &Arc<Self>) -> Result<Exchange> {
        self.check()?;
        let locked = Arc::clone(&self.responses).lock_owned();
        let responses = match tokio::time::timeout(self.timeout, locked).await {
            Ok(responses) => responses,
            Err(_elapsed) => {
                debug!(timeout = ?self.timeout, "connection busy");
                return Err(Error::Busy(self.timeout));
            }
        };
        self.check()?;
        let mut exchange = Exchange {
            engine: Arc::clone(self),
            responses,
            state: State::Idle,
        };

        let pending = std::mem::take(
            &mut *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for sql in pending {
            if let Err(e) = simple_query::simple_query(&mut exchange, &sql).await {
                warn!(sql = %sql, error = %e, "deferred cleanup failed");
                if e.is_connection_broken() {
                    return Err(e);
                }
            }
        }
        Ok(exchange)
    }

    /// Write a bundle without taking the response queue.
    pub(crate) async fn send_detached(&self, bundle: Bundle) -> Result<()> {
        self.requests.send(bundle).await.map_err(|_closed| {
            self.mark_broken();
            Error::ConnectionClosed
        })
    }
}

/// Exclusive access to the connection for one request/response exchange.
pub(crate) struct Exchange {
    engine: Arc<Engine>,
    responses: OwnedMutexGuard<mpsc::Receiver<Response>>,
    state: State,
}

impl Exchange {
    pub(crate) fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: State) {
        trace!(from = ?self.state, to = ?state, "state");
        self.state = state;
    }

    pub(crate) async fn send(&mut self, bundle: Bundle) -> Result<()> {
        self.engine.send_detached(bundle).await
    }

    /// Next response, with async messages absorbed.
    ///
    /// `ParameterStatus` updates the server parameters, `NoticeResponse` is
    /// logged and `ReadyForQuery` records the transaction status. Any failure
    /// here marks the connection broken.
    pub(crate) async fn recv(&mut self) -> Result<BackendMessage> {
        loop {
            let received =
                match tokio::time::timeout(self.engine.timeout, self.responses.recv()).await {
                    Ok(received) => received,
                    Err(_elapsed) => {
                        self.engine.mark_broken();
                        return Err(Error::Timeout(self.engine.timeout));
                    }
                };
            let msg = match received {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    self.engine.mark_broken();
                    return Err(e);
                }
                None => {
                    self.engine.mark_broken();
                    return Err(Error::ConnectionClosed);
                }
            };

            if let BackendMessage::ReadyForQuery(status) = msg {
                self.engine.set_transaction_status(status);
                return Ok(msg);
            }
            if !msg.is_async() {
                return Ok(msg);
            }
            match msg {
                BackendMessage::ParameterStatus(status) => self.engine.set_server_param(status),
                BackendMessage::NoticeResponse(notice) => {
                    info!(
                        severity = notice.severity().unwrap_or(""),
                        code = notice.code().unwrap_or(""),
                        message = notice.message().unwrap_or(""),
                        "server notice"
                    );
                }
                // The receive loop routes these to listeners.
                msg => trace!(message = msg.name(), "async message outside a listener"),
            }
        }
    }

    /// Next response; an `ErrorResponse` becomes `Err` after resynchronizing.
    ///
    /// The server discards everything up to the pending `Sync`, so the engine
    /// consumes through the next `ReadyForQuery` before reporting the error.
    pub(crate) async fn next(&mut self) -> Result<BackendMessage> {
        match self.recv().await? {
            BackendMessage::ErrorResponse(response) => {
                let err = response.into_error();
                if err.is_connection_broken() {
                    self.engine.mark_broken();
                    return Err(err);
                }
                debug!(state = ?self.state, error = %err, "server error, resynchronizing");
                self.sync_to_ready().await?;
                Err(err)
            }
            msg => Ok(msg),
        }
    }

    /// Discard responses through the next `ReadyForQuery`.
    pub(crate) async fn sync_to_ready(&mut self) -> Result<TransactionStatus> {
        self.set_state(State::AwaitingReadyForQuery);
        loop {
            match self.recv().await? {
                BackendMessage::ReadyForQuery(status) => {
                    self.set_state(State::Idle);
                    return Ok(status);
                }
                msg => trace!(message = msg.name(), "discarded"),
            }
        }
    }

    /// Expect the `ReadyForQuery` that closes the exchange.
    pub(crate) async fn expect_ready(&mut self) -> Result<TransactionStatus> {
        self.set_state(State::AwaitingReadyForQuery);
        match self.next().await? {
            BackendMessage::ReadyForQuery(status) => {
                self.set_state(State::Idle);
                Ok(status)
            }
            msg => Err(self.unexpected(&msg)),
        }
    }

    /// Expect a message with no payload, such as `ParseComplete`.
    pub(crate) async fn expect(&mut self, state: State, expected: BackendMessage) -> Result<()> {
        self.set_state(state);
        let msg = self.next().await?;
        if msg == expected {
            Ok(())
        } else {
            Err(self.unexpected(&msg))
        }
    }

    /// Mark the connection broken and pass `err` through.
    pub(crate) fn broken(&self, err: Error) -> Error {
        self.engine.mark_broken();
        err
    }

    /// A message the current state does not allow: the client and server
    /// disagree, so the connection is unusable from here on.
    pub(crate) fn unexpected(&self, msg: &BackendMessage) -> Error {
        self.engine.mark_broken();
        Error::Protocol(format!(
            "unexpected {} in state {:?}",
            msg.name(),
            self.state
        ))
    }
}
