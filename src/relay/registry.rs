use std::collections::HashMap;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;

use super::observer::{NoopObserver, SessionObserver};
use super::session::{Session, SessionHandle, close_quietly};
use crate::config::{RelayConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::protocol::{ControlEvent, Side, parse_telephony_event};
use crate::transport::{Connection, ModelConnector, TransportRx, ws};

struct Inner {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    connector: Arc<dyn ModelConnector>,
    observer: Arc<dyn SessionObserver>,
    config: RelayConfig,
}

/// Process-wide map from call id to the session relaying it.
///
/// A session is registered before its tasks start and removed once both of
/// its connections are closed, just before its report is published.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(config: RelayConfig, connector: Arc<dyn ModelConnector>) -> Self {
        Self::with_observer(config, connector, Arc::new(NoopObserver))
    }

    #[must_use]
    pub fn with_observer(
        config: RelayConfig,
        connector: Arc<dyn ModelConnector>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                connector,
                observer,
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Wait for the call-start event on a fresh telephony connection and
    /// start relaying it with the default session configuration.
    ///
    /// # Errors
    /// See [`accept_with`](Self::accept_with).
    pub async fn accept(&self, telephony: Connection) -> Result<SessionHandle> {
        self.accept_with(telephony, self.inner.config.session.clone()).await
    }

    /// Like [`accept`](Self::accept) with a per-call session configuration.
    ///
    /// # Errors
    /// Returns [`Error::SetupTimeout`] if no start event arrives within the
    /// setup timeout, [`Error::ConnectionClosed`] if the caller hangs up
    /// first, or [`Error::DuplicateCall`] if the call is already relayed.
    pub async fn accept_with(&self, mut telephony: Connection, session: SessionConfig) -> Result<SessionHandle> {
        let timeout = self.inner.config.setup_timeout;
        let started = tokio::time::timeout(timeout, wait_for_start(telephony.rx.as_mut())).await;
        let (stream_sid, call_sid) = match started {
            Ok(Ok(ids)) => ids,
            Ok(Err(err)) => {
                close_quietly(telephony.tx.as_mut(), Side::Telephony).await;
                return Err(err);
            }
            Err(_) => {
                tracing::warn!(?timeout, "No start event on telephony connection");
                close_quietly(telephony.tx.as_mut(), Side::Telephony).await;
                return Err(Error::SetupTimeout(timeout));
            }
        };
        self.start(call_sid, stream_sid, telephony, session).await
    }

    /// Register and launch a session for a call whose start event was
    /// already consumed.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateCall`] if `call_id` is already active.
    pub async fn start(
        &self,
        call_id: impl Into<String>,
        stream_sid: impl Into<String>,
        telephony: Connection,
        session: SessionConfig,
    ) -> Result<SessionHandle> {
        let call_id = call_id.into();
        let mut sessions = self.inner.sessions.write().await;
        if sessions.contains_key(&call_id) {
            tracing::warn!(%call_id, "Rejecting duplicate call");
            return Err(Error::DuplicateCall(call_id));
        }

        let (session, handle, reporter) = Session::new(
            call_id.clone(),
            stream_sid.into(),
            telephony,
            session,
            &self.inner.config,
            Arc::clone(&self.inner.connector),
            Arc::clone(&self.inner.observer),
        );
        sessions.insert(call_id.clone(), handle.clone());
        drop(sessions);

        let registry = self.clone();
        tokio::spawn(async move {
            let report = session.run().await;
            registry.inner.sessions.write().await.remove(&call_id);
            reporter.publish(report);
        });
        Ok(handle)
    }

    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.inner.sessions.read().await.get(call_id).cloned()
    }

    pub async fn active_calls(&self) -> Vec<String> {
        self.inner.sessions.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.read().await.is_empty()
    }

    /// Close one call. Returns `false` if no such call is active.
    pub async fn close(&self, call_id: &str) -> bool {
        let Some(handle) = self.get(call_id).await else {
            return false;
        };
        handle.close().await;
        true
    }

    /// Close every active session and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self.inner.sessions.read().await.values().cloned().collect();
        tracing::info!(sessions = handles.len(), "Shutting down relay sessions");
        for handle in &handles {
            handle.close().await;
        }
        for handle in &handles {
            handle.wait().await;
        }
    }

    /// Accept telephony media streams on `listener` until it fails.
    ///
    /// # Errors
    /// Returns an error if accepting a TCP connection fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "Relay listening for media streams");
        loop {
            let (stream, peer) = listener.accept().await?;
            let registry = self.clone();
            tokio::spawn(async move {
                let (tx, rx) = match ws::accept(stream).await {
                    Ok(halves) => halves,
                    Err(err) => {
                        tracing::warn!(%peer, error = %err, "WebSocket handshake failed");
                        return;
                    }
                };
                match registry.accept(Connection::new(tx, rx)).await {
                    Ok(handle) => {
                        handle.wait().await;
                    }
                    Err(err) => tracing::warn!(%peer, error = %err, "Could not start relay session"),
                }
            });
        }
    }
}

/// Read a telephony connection until its start event, returning the stream
/// and call ids.
async fn wait_for_start(rx: &mut dyn TransportRx) -> Result<(String, String)> {
    loop {
        let raw = match rx.recv().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(Error::ConnectionClosed),
            Err(Error::Parse(err)) => {
                tracing::warn!(error = %err, "Dropping undecodable message before start");
                continue;
            }
            Err(err) => return Err(err),
        };
        match parse_telephony_event(&raw, 0) {
            Ok(ControlEvent::CallStarted { stream_sid, call_sid }) => {
                tracing::info!(%call_sid, %stream_sid, "Call started");
                return Ok((stream_sid, call_sid));
            }
            Ok(ControlEvent::CallStopped) => return Err(Error::ConnectionClosed),
            Ok(other) => tracing::debug!(kind = other.kind(), "Ignoring event before start"),
            Err(err) => tracing::warn!(error = %err, "Dropping undecodable message before start"),
        }
    }
}
