//! Out-of-band query cancellation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;
use crate::protocol::frontend::FrontendMessage;

/// Cancels whatever a connection is running, from a separate connection.
///
/// The server answers a `CancelRequest` by closing the socket; whether the
/// running query is actually interrupted is not reported.
#[derive(Debug, Clone)]
pub struct CancelToken {
    host: String,
    port: u16,
    process_id: u32,
    secret_key: u32,
}

impl CancelToken {
    pub(crate) fn new(host: String, port: u16, process_id: u32, secret_key: u32) -> Self {
        Self {
            host,
            port,
            process_id,
            secret_key,
        }
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Open a new TCP connection to the server and send the request.
    pub async fn cancel(&self) -> Result<()> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.cancel_with_stream(stream).await
    }

    /// Send the request over a caller-provided stream, e.g. a TLS session.
    pub async fn cancel_with_stream<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(16);
        FrontendMessage::CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
        .encode(&mut buf);
        stream.write_all(&buf).await?;
        stream.flush().await?;

        // The server closes the connection once it has read the request.
        let mut rest = Vec::new();
        let read = stream.read_to_end(&mut rest).await?;
        debug!(process_id = self.process_id, read, "cancel request sent");
        Ok(())
    }
}
