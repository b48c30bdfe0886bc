//! Connection abstractions for both legs of a relay session.
//!
//! A leg is split into a receiving half, read by exactly one relay loop, and a
//! sending half, written by the loop or writer task feeding that leg.

pub mod channel;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::Result;
use crate::config::SessionConfig;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait TransportRx: Send {
    /// Next text message from the peer, `Ok(None)` once the peer has closed.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>>;
}

pub trait TransportTx: Send {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>>;
    fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Both halves of one connection.
pub struct Connection {
    pub tx: Box<dyn TransportTx>,
    pub rx: Box<dyn TransportRx>,
}

impl Connection {
    #[must_use]
    pub fn new(tx: impl TransportTx + 'static, rx: impl TransportRx + 'static) -> Self {
        Self {
            tx: Box::new(tx),
            rx: Box::new(rx),
        }
    }
}

/// Opens the outbound connection to the model endpoint for a session.
#[async_trait]
pub trait ModelConnector: Send + Sync {
    async fn connect(&self, session: &SessionConfig) -> Result<Connection>;
}
