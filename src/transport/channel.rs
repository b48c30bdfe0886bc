//! In-process transport backed by tokio channels.
//!
//! Used to drive a relay session without sockets, for embedding and tests.
//! The [`ChannelPeer`] plays the remote side: it injects inbound messages and
//! observes everything the relay sends.

use tokio::sync::mpsc;

use super::{BoxFuture, Connection, TransportRx, TransportTx};
use crate::error::{Error, Result};

type Inbound = std::result::Result<String, String>;

/// Create a connected transport pair with `capacity` slots in each direction.
#[must_use]
pub fn connection(capacity: usize) -> (ChannelTx, ChannelRx, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::channel(capacity);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    (
        ChannelTx { sender: Some(out_tx) },
        ChannelRx { receiver: in_rx },
        ChannelPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
        },
    )
}

/// Same as [`connection`], boxed for a [`Connection`].
#[must_use]
pub fn boxed(capacity: usize) -> (Connection, ChannelPeer) {
    let (tx, rx, peer) = connection(capacity);
    (Connection::new(tx, rx), peer)
}

#[derive(Debug)]
pub struct ChannelTx {
    sender: Option<mpsc::Sender<String>>,
}

impl TransportTx for ChannelTx {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let sender = self.sender.as_ref().ok_or(Error::ConnectionClosed)?;
            sender.send(text).await.map_err(|_| Error::ConnectionClosed)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        self.sender = None;
        Box::pin(async { Ok(()) })
    }
}

#[derive(Debug)]
pub struct ChannelRx {
    receiver: mpsc::Receiver<Inbound>,
}

impl TransportRx for ChannelRx {
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            match self.receiver.recv().await {
                Some(Ok(text)) => Ok(Some(text)),
                Some(Err(reason)) => Err(Error::Transport(reason)),
                None => Ok(None),
            }
        })
    }
}

/// The remote end of an in-process connection.
#[derive(Debug)]
pub struct ChannelPeer {
    inbound: Option<mpsc::Sender<Inbound>>,
    outbound: mpsc::Receiver<String>,
}

impl ChannelPeer {
    /// Deliver a text message to the relay.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] once the relay stopped reading or
    /// the peer has hung up.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.push(Ok(text.into())).await
    }

    /// Make the relay's next read fail with a transport error.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] once the relay stopped reading.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<()> {
        self.push(Err(reason.into())).await
    }

    /// Close the inbound direction; the relay observes end of stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next message the relay sent, `None` once the relay closed its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    async fn push(&self, message: Inbound) -> Result<()> {
        let inbound = self.inbound.as_ref().ok_or(Error::ConnectionClosed)?;
        inbound.send(message).await.map_err(|_| Error::ConnectionClosed)
    }
}
