//! Transport pipeline: one task writes request bundles, one task reads frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::error::{Error, ErrorFields, Result};
use crate::opts::Opts;
use crate::protocol::backend::{BackendMessage, NotificationResponse};
use crate::protocol::codec::{HEADER_LEN, read_header};
use crate::protocol::frontend::FrontendMessage;

/// Messages written back to back, without an intermediate flush.
pub(crate) type Bundle = Vec<FrontendMessage>;

/// What the receive loop hands to the protocol engine.
pub(crate) type Response = Result<BackendMessage>;

/// Buffered notifications per listener before the oldest are dropped.
const NOTIFICATION_CAPACITY: usize = 64;

/// A notification delivered on a LISTEN channel.
pub type Notification = NotificationResponse;

/// Server-side LISTEN state of a channel.
#[derive(Debug, Clone)]
pub(crate) enum Listening {
    /// The first listener's LISTEN is in flight.
    Pending,
    Active,
    /// LISTEN failed, with the server's error when it reported one.
    Failed(Option<ErrorFields>),
}

struct Channel {
    id: u64,
    sender: broadcast::Sender<Notification>,
    listening: watch::Sender<Listening>,
    listeners: usize,
}

/// One local registration on a channel.
pub(crate) struct Subscription {
    /// Identifies the channel entry, which is replaced after a failed LISTEN.
    pub(crate) id: u64,
    pub(crate) receiver: broadcast::Receiver<Notification>,
    /// `None` for the channel's first listener, which must LISTEN and
    /// [`settle`](Subscriptions::settle).
    pub(crate) listening: Option<watch::Receiver<Listening>>,
}

/// Channel name to local subscribers.
///
/// Written by callers (listen / unlisten) and read by the receive loop.
#[derive(Default)]
pub(crate) struct Subscriptions {
    channels: Mutex<HashMap<String, Channel>>,
    next_id: AtomicU64,
}

impl Subscriptions {
    /// Register a local subscriber.
    pub(crate) fn subscribe(&self, channel: &str) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = channels.get_mut(channel) {
            entry.listeners += 1;
            return Subscription {
                id: entry.id,
                receiver: entry.sender.subscribe(),
                listening: Some(entry.listening.subscribe()),
            };
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (listening, _) = watch::channel(Listening::Pending);
        channels.insert(
            channel.to_string(),
            Channel {
                id,
                sender,
                listening,
                listeners: 1,
            },
        );
        Subscription {
            id,
            receiver,
            listening: None,
        }
    }

    /// Publish the outcome of the first listener's LISTEN.
    ///
    /// A failure removes the channel with every subscriber waiting on it, so
    /// the next subscriber starts over.
    pub(crate) fn settle(&self, channel: &str, id: u64, outcome: Listening) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = channels.get(channel).filter(|entry| entry.id == id) else {
            return;
        };
        let failed = matches!(outcome, Listening::Failed(_));
        entry.listening.send_replace(outcome);
        if failed {
            channels.remove(channel);
        }
    }

    /// Drop a local subscriber. Returns true when it was the channel's last one.
    pub(crate) fn unsubscribe(&self, channel: &str, id: u64) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = channels.get_mut(channel).filter(|entry| entry.id == id) else {
            return false;
        };
        entry.listeners = entry.listeners.saturating_sub(1);
        if entry.listeners == 0 {
            channels.remove(channel);
            true
        } else {
            false
        }
    }

    /// Drop every sender so listeners see the connection end.
    pub(crate) fn clear(&self) {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn listeners(&self, channel: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(channel).map_or(0, |entry| entry.listeners)
    }

    /// Deliver to the channel's subscribers, or drop when there are none.
    fn dispatch(&self, notification: Notification) {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        match channels.get(&notification.channel) {
            Some(entry) => {
                // Only fails when every receiver is gone, which unsubscribe races with.
                let _ = entry.sender.send(notification);
            }
            None => debug!(channel = %notification.channel, "notification without listener dropped"),
        }
    }
}

/// The running pipeline over one duplex stream.
pub(crate) struct Transport {
    pub(crate) requests: mpsc::Sender<Bundle>,
    pub(crate) responses: mpsc::Receiver<Response>,
    pub(crate) subscriptions: Arc<Subscriptions>,
    pub(crate) tasks: Tasks,
}

/// Join handles of both loops; aborted on drop.
pub(crate) struct Tasks {
    send: JoinHandle<()>,
    recv: JoinHandle<()>,
}

impl Tasks {
    /// Wait for the send loop to write its last bundle, then stop reading.
    pub(crate) async fn shutdown(&mut self) {
        if let Err(e) = (&mut self.send).await
            && !e.is_cancelled()
        {
            error!(error = %e, "send loop panicked");
        }
        self.recv.abort();
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.send.abort();
        self.recv.abort();
    }
}

/// Split `stream` and spawn the send and receive loops.
pub(crate) fn spawn<S>(stream: S, opts: &Opts) -> Transport
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (request_tx, request_rx) = mpsc::channel(opts.request_capacity.max(1));
    let (response_tx, response_rx) = mpsc::channel(opts.response_capacity.max(1));
    let subscriptions = Arc::new(Subscriptions::default());

    let send = tokio::spawn(send_loop(writer, request_rx, response_tx.clone()));
    let recv = tokio::spawn(receive_loop(
        BufReader::new(reader),
        response_tx,
        Arc::clone(&subscriptions),
    ));

    Transport {
        requests: request_tx,
        responses: response_rx,
        subscriptions,
        tasks: Tasks { send, recv },
    }
}

async fn send_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut requests: mpsc::Receiver<Bundle>,
    responses: mpsc::Sender<Response>,
) {
    let mut buf = Vec::with_capacity(4096);
    while let Some(bundle) = requests.recv().await {
        buf.clear();
        let mut terminate = false;
        for msg in &bundle {
            trace!(message = msg.name(), "send");
            terminate |= matches!(msg, FrontendMessage::Terminate);
            msg.encode(&mut buf);
        }
        let written = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            error!(error = %e, "send loop failed");
            // Wake whoever waits on a response; the receive loop may still be blocked on read.
            let _ = responses.try_send(Err(Error::Io(e)));
            break;
        }
        if terminate {
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "shutdown after send loop");
    }
}

async fn receive_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    responses: mpsc::Sender<Response>,
    subscriptions: Arc<Subscriptions>,
) {
    loop {
        let msg = match read_message(&mut reader).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                error!(error = %e, "receive loop failed");
                let _ = responses.send(Err(e)).await;
                break;
            }
        };
        match msg {
            BackendMessage::NotificationResponse(notification) => {
                subscriptions.dispatch(notification);
            }
            msg => {
                if responses.send(Ok(msg)).await.is_err() {
                    break;
                }
            }
        }
    }
    subscriptions.clear();
}

/// Read frames until one decodes to a known message.
///
/// Returns `Ok(None)` on end of stream at a frame boundary.
pub(crate) async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<BackendMessage>> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        if reader.read(&mut header[..1]).await? == 0 {
            return Ok(None);
        }
        reader.read_exact(&mut header[1..]).await?;
        let (tag, len) = read_header(&header)?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        trace!(tag = %(tag as char), len, "recv");

        match BackendMessage::decode(tag, &body)? {
            Some(msg) => return Ok(Some(msg)),
            None => debug!(tag = %(tag as char), len, "skipping unknown message"),
        }
    }
}
