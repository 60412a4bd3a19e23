//! LISTEN/NOTIFY subscriptions.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::Engine;
use crate::state::extended::check_name;
use crate::state::simple_query::simple_query;

use super::transport::{Listening, Notification};

/// A subscription to one notification channel.
///
/// All listeners of a channel on the same connection share one server-side
/// `LISTEN`; `UNLISTEN` is sent when the last of them closes.
pub struct Listener {
    engine: Arc<Engine>,
    channel: String,
    id: u64,
    receiver: broadcast::Receiver<Notification>,
    closed: bool,
}

impl Listener {
    /// Register locally, then `LISTEN` if this is the channel's first listener.
    ///
    /// Later listeners wait for that `LISTEN` and share its server error if
    /// it fails. When it fails for another reason they start over.
    pub(crate) async fn subscribe(engine: &Arc<Engine>, channel: &str) -> Result<Self> {
        check_name("channel", channel)?;
        loop {
            engine.check()?;
            let subscription = engine.subscriptions().subscribe(channel);
            let mut listener = Self {
                engine: Arc::clone(engine),
                channel: channel.to_string(),
                id: subscription.id,
                receiver: subscription.receiver,
                closed: false,
            };
            let Some(mut listening) = subscription.listening else {
                listener.listen().await?;
                debug!(channel, "listening");
                return Ok(listener);
            };

            let outcome = listening
                .wait_for(|state| !matches!(state, Listening::Pending))
                .await
                .map(|state| state.clone());
            match outcome {
                Ok(Listening::Active) => {
                    debug!(channel, "joined listen");
                    return Ok(listener);
                }
                Ok(Listening::Failed(Some(fields))) => {
                    listener.closed = true;
                    return Err(Error::Server(fields));
                }
                Ok(Listening::Failed(None) | Listening::Pending) | Err(_) => {
                    listener.closed = true;
                    debug!(channel, "first listen did not complete, retrying");
                }
            }
        }
    }

    /// Send `LISTEN` as the channel's first listener and publish the outcome.
    async fn listen(&mut self) -> Result<()> {
        let mut settle = Settle {
            engine: &self.engine,
            channel: &self.channel,
            id: self.id,
            outcome: Listening::Failed(None),
        };
        let sql = format!("LISTEN {}", quote_ident(&self.channel));
        let listened = async {
            let mut exchange = settle.engine.exchange().await?;
            simple_query(&mut exchange, &sql).await
        }
        .await;
        match listened {
            Ok(_) => {
                settle.outcome = Listening::Active;
                Ok(())
            }
            Err(e) => {
                if let Error::Server(fields) = &e {
                    settle.outcome = Listening::Failed(Some(fields.clone()));
                }
                drop(settle);
                self.closed = true;
                Err(e)
            }
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next notification.
    ///
    /// Notifications that overflowed this listener's buffer are skipped.
    /// Fails with `ConnectionClosed` once the connection is gone.
    pub async fn recv(&mut self) -> Result<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Ok(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %self.channel, skipped, "listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// A notification that has already arrived, if any.
    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Unregister, then `UNLISTEN` if this was the channel's last listener.
    pub async fn close(mut self) -> Result<()> {
        self.unlisten().await
    }

    /// Close because of `cause`.
    ///
    /// Returns `cause`, with any `UNLISTEN` failure attached to it.
    pub async fn close_with(mut self, cause: Error) -> Error {
        match self.unlisten().await {
            Ok(()) => cause,
            Err(e) => cause.with_suppressed(e),
        }
    }

    async fn unlisten(&mut self) -> Result<()> {
        self.closed = true;
        // Lock first so a new first listener's LISTEN queues behind this UNLISTEN.
        let exchange = self.engine.exchange().await;
        if !self.engine.subscriptions().unsubscribe(&self.channel, self.id) {
            return Ok(());
        }
        let sql = format!("UNLISTEN {}", quote_ident(&self.channel));
        let mut exchange = match exchange {
            Ok(exchange) => exchange,
            Err(e) => {
                self.engine.defer(sql);
                return Err(e);
            }
        };
        simple_query(&mut exchange, &sql).await?;
        debug!(channel = %self.channel, "unlistened");
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if !self.closed && self.engine.subscriptions().unsubscribe(&self.channel, self.id) {
            self.engine
                .defer(format!("UNLISTEN {}", quote_ident(&self.channel)));
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Publishes a first listener's LISTEN outcome, also when its future is dropped.
struct Settle<'a> {
    engine: &'a Arc<Engine>,
    channel: &'a str,
    id: u64,
    outcome: Listening,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        let outcome = std::mem::replace(&mut self.outcome, Listening::Failed(None));
        self.engine
            .subscriptions()
            .settle(self.channel, self.id, outcome);
    }
}

/// Quote an identifier for LISTEN and UNLISTEN.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("jobs"), "\"jobs\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
