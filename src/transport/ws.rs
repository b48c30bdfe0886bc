use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{BoxFuture, Connection, ModelConnector, TransportRx, TransportTx};
use crate::config::{RelayConfig, SessionConfig};
use crate::error::{ParseError, Result};

type WsError = tokio_tungstenite::tungstenite::Error;

const TRACE_LOG_MAX_BYTES: usize = 512;

/// Client connection to the model endpoint.
pub type ModelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Establish a WebSocket connection to the realtime model endpoint.
///
/// # Errors
/// Returns an error if the URL or credential is invalid or the handshake fails.
pub async fn connect(endpoint: &str, api_key: &str, model: &str) -> Result<ModelStream> {
    let mut url = Url::parse(endpoint)?;
    url.query_pairs_mut().append_pair("model", model);

    let auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;

    let mut req = url.as_str().into_client_request()?;
    let h = req.headers_mut();
    h.insert(AUTHORIZATION, auth_header);
    h.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));
    let (ws_stream, _) = connect_async(req).await?;

    tracing::info!(model, "Connected to realtime model endpoint");

    Ok(ws_stream)
}

/// Complete the server-side WebSocket handshake for an inbound telephony stream.
///
/// # Errors
/// Returns an error if the handshake fails.
pub async fn accept(
    stream: TcpStream,
) -> Result<(WsSender<WebSocketStream<TcpStream>>, WsReceiver<WebSocketStream<TcpStream>>)> {
    let peer = stream.peer_addr().ok();
    let ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::info!(?peer, "Telephony media stream connected");
    Ok(split(ws))
}

/// Split any tungstenite stream into relay transport halves.
pub fn split<S>(stream: S) -> (WsSender<S>, WsReceiver<S>)
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Sink<Message, Error = WsError>,
{
    let (write, read) = stream.split();
    (WsSender { write }, WsReceiver { read })
}

/// The sending half of a split WebSocket.
pub struct WsSender<S> {
    write: SplitSink<S, Message>,
}

/// The receiving half of a split WebSocket.
pub struct WsReceiver<S> {
    read: SplitStream<S>,
}

impl<S> TransportTx for WsSender<S>
where
    S: Sink<Message, Error = WsError> + Send + 'static,
{
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tracing::trace!("Sending: {}", crate::safe_truncate(&text, TRACE_LOG_MAX_BYTES));
            self.write.send(Message::Text(text.into())).await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.write.close().await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

impl<S> TransportRx for WsReceiver<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Send + 'static,
{
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<String>>> {
        Box::pin(async move {
            while let Some(msg) = self.read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!("Received: {}", crate::safe_truncate(text.as_str(), TRACE_LOG_MAX_BYTES));
                        return Ok(Some(text.as_str().to_owned()));
                    }
                    Ok(Message::Binary(bytes)) => {
                        let text = std::str::from_utf8(&bytes).map_err(ParseError::from)?;
                        return Ok(Some(text.to_owned()));
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "WebSocket connection closed by peer");
                        return Ok(None);
                    }
                    Ok(_) => {}
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(None)
        })
    }
}

/// Opens model connections over WebSocket with the relay's credential.
#[derive(Debug, Clone)]
pub struct WsModelConnector {
    endpoint: String,
    api_key: String,
}

impl WsModelConnector {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl ModelConnector for WsModelConnector {
    async fn connect(&self, session: &SessionConfig) -> Result<Connection> {
        let stream = connect(&self.endpoint, &self.api_key, &session.model).await?;
        let (tx, rx) = split(stream);
        Ok(Connection::new(tx, rx))
    }
}
