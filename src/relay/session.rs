use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::Instrument;

use super::observer::SessionObserver;
use super::phase::{CloseReason, Effect, Phase, SessionEvent, Transition, transition};
use super::playback::{Playback, PlaybackQueue};
use super::pump;
use super::stats::{SessionStats, StatsSnapshot};
use crate::config::{RelayConfig, SessionConfig};
use crate::protocol::{ModelCommand, Side};
use crate::transport::{Connection, ModelConnector, TransportTx};

const MAILBOX_CAPACITY: usize = 64;

/// A state machine input plus the channel the applied phase is reported on.
pub(crate) struct Command {
    event: SessionEvent,
    done: oneshot::Sender<Phase>,
}

async fn dispatch(mailbox: &mpsc::Sender<Command>, event: SessionEvent) -> Phase {
    let (done, applied) = oneshot::channel();
    if mailbox.send(Command { event, done }).await.is_err() {
        return Phase::Closed;
    }
    applied.await.unwrap_or(Phase::Closed)
}

/// Resolve once `phase` reaches [`Phase::Closed`] or the actor is gone.
pub(crate) async fn wait_closed(phase: &mut watch::Receiver<Phase>) {
    let _ = phase.wait_for(|p| p.is_closed()).await;
}

/// State shared by the tasks of one session.
pub(crate) struct SessionContext {
    pub(crate) call_id: String,
    pub(crate) stream_sid: String,
    pub(crate) config: SessionConfig,
    pub(crate) max_parse_errors: u32,
    pub(crate) stats: Arc<SessionStats>,
    pub(crate) playback: PlaybackQueue,
    pub(crate) observer: Arc<dyn SessionObserver>,
    mailbox: mpsc::Sender<Command>,
}

impl SessionContext {
    /// Hand `event` to the actor and wait until it has been applied.
    pub(crate) async fn dispatch(&self, event: SessionEvent) -> Phase {
        dispatch(&self.mailbox, event).await
    }
}

/// Serializes every phase change for one session and owns its timers.
struct Actor {
    ctx: Arc<SessionContext>,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    drain_timeout: Duration,
    setup_deadline: Option<Instant>,
    drain_deadline: Option<Instant>,
    /// Labels queued toward telephony whose echo has not come back yet.
    marks_out: HashSet<String>,
    reason: Option<CloseReason>,
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self, mut mailbox: mpsc::Receiver<Command>) -> CloseReason {
        while !self.phase.is_closed() {
            tokio::select! {
                cmd = mailbox.recv() => match cmd {
                    Some(Command { event, done }) => {
                        self.apply(&event);
                        let _ = done.send(self.phase);
                    }
                    None => self.apply(&SessionEvent::Shutdown),
                },
                () = until(self.setup_deadline) => {
                    self.setup_deadline = None;
                    tracing::warn!("Model endpoint did not acknowledge the session in time");
                    self.apply(&SessionEvent::SetupTimeout);
                }
                () = until(self.drain_deadline) => {
                    self.drain_deadline = None;
                    tracing::info!("Drain timeout elapsed");
                    self.apply(&SessionEvent::DrainTimeout);
                }
            }
        }
        self.reason.unwrap_or(CloseReason::Shutdown)
    }

    fn apply(&mut self, event: &SessionEvent) {
        let Transition { next, effects } = transition(self.phase, event);
        for effect in effects {
            self.perform(effect);
        }
        if next == self.phase {
            tracing::debug!(phase = %self.phase, ?event, "Event applied");
            return;
        }

        tracing::info!(from = %self.phase, to = %next, "Session phase changed");
        self.ctx.observer.on_phase_changed(&self.ctx.call_id, self.phase, next);
        self.phase = next;
        if next != Phase::Connecting {
            self.setup_deadline = None;
        }
        self.phase_tx.send_replace(next);
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::ArmDrainTimer => {
                self.drain_deadline = Some(Instant::now() + self.drain_timeout);
            }
            Effect::DiscardPlayback => {
                let dropped = self.ctx.playback.discard_audio();
                self.ctx.playback.push_front(Playback::Clear);
                self.ctx.stats.discarded(dropped);
                tracing::info!(dropped, "Caller barged in, discarding queued model audio");
            }
            Effect::AcknowledgeMark(label) => {
                // The provider echoes every mark once the audio ahead of it
                // has played; that echo is consumed, not acknowledged again.
                if self.marks_out.remove(&label) {
                    tracing::debug!(%label, "Mark played out");
                } else if self.ctx.playback.push(Playback::Mark(label.clone())) {
                    self.marks_out.insert(label);
                }
            }
            Effect::Teardown(reason) => {
                tracing::info!(%reason, "Tearing down session");
                self.ctx.playback.close();
                self.reason = Some(reason);
            }
        }
    }
}

/// Final outcome of a session, published once both legs are closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub call_id: String,
    pub reason: CloseReason,
    pub stats: StatsSnapshot,
}

pub(crate) struct Reporter(watch::Sender<Option<SessionReport>>);

impl Reporter {
    pub(crate) fn publish(self, report: SessionReport) {
        self.0.send_replace(Some(report));
    }
}

/// Cheap, cloneable view of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    call_id: String,
    stream_sid: String,
    mailbox: mpsc::Sender<Command>,
    phase: watch::Receiver<Phase>,
    stats: Arc<SessionStats>,
    report: watch::Receiver<Option<SessionReport>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("call_id", &self.call_id)
            .field("stream_sid", &self.stream_sid)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    #[must_use]
    pub fn stream_sid(&self) -> &str {
        &self.stream_sid
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the session to close both legs. Closing a closed session is a no-op.
    pub async fn close(&self) -> Phase {
        dispatch(&self.mailbox, SessionEvent::Shutdown).await
    }

    /// Wait until the session is in `target`, or closed.
    pub async fn wait_for_phase(&self, target: Phase) -> Phase {
        let mut phase = self.phase.clone();
        phase
            .wait_for(|p| *p == target || p.is_closed())
            .await
            .map_or(Phase::Closed, |p| *p)
    }

    /// Wait for the session to finish and return its report.
    pub async fn wait(&self) -> Option<SessionReport> {
        let mut report = self.report.clone();
        report
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|r| (*r).clone())
    }
}

/// One call: the telephony leg it was accepted on plus everything needed to
/// open the model leg and run the relay.
pub(crate) struct Session {
    ctx: Arc<SessionContext>,
    telephony: Connection,
    connector: Arc<dyn ModelConnector>,
    actor: Actor,
    mailbox: mpsc::Receiver<Command>,
    phase: watch::Receiver<Phase>,
}

impl Session {
    pub(crate) fn new(
        call_id: String,
        stream_sid: String,
        telephony: Connection,
        config: SessionConfig,
        relay: &RelayConfig,
        connector: Arc<dyn ModelConnector>,
        observer: Arc<dyn SessionObserver>,
    ) -> (Self, SessionHandle, Reporter) {
        let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(Phase::Connecting);
        let (report_tx, report_rx) = watch::channel(None);
        let stats = Arc::new(SessionStats::new());

        let ctx = Arc::new(SessionContext {
            call_id,
            stream_sid,
            config,
            max_parse_errors: relay.max_consecutive_parse_errors,
            stats: Arc::clone(&stats),
            playback: PlaybackQueue::new(),
            observer,
            mailbox: mailbox_tx.clone(),
        });

        let actor = Actor {
            ctx: Arc::clone(&ctx),
            phase: Phase::Connecting,
            phase_tx,
            drain_timeout: relay.drain_timeout,
            setup_deadline: Some(Instant::now() + relay.setup_timeout),
            drain_deadline: None,
            marks_out: HashSet::new(),
            reason: None,
        };

        let handle = SessionHandle {
            call_id: ctx.call_id.clone(),
            stream_sid: ctx.stream_sid.clone(),
            mailbox: mailbox_tx,
            phase: phase_rx.clone(),
            stats,
            report: report_rx,
        };

        let session = Self {
            ctx,
            telephony,
            connector,
            actor,
            mailbox: mailbox_rx,
            phase: phase_rx,
        };
        (session, handle, Reporter(report_tx))
    }

    /// Drive the session to completion.
    pub(crate) async fn run(self) -> SessionReport {
        let span = tracing::info_span!(
            "relay_session",
            call_id = %self.ctx.call_id,
            stream_sid = %self.ctx.stream_sid
        );
        self.supervise().instrument(span).await
    }

    async fn supervise(self) -> SessionReport {
        let Self {
            ctx,
            telephony,
            connector,
            actor,
            mailbox,
            mut phase,
        } = self;
        let actor = tokio::spawn(actor.run(mailbox).in_current_span());
        tracing::info!(model = %ctx.config.model, "Session started, connecting to model endpoint");

        let Connection {
            tx: mut telephony_tx,
            rx: telephony_rx,
        } = telephony;

        let connected = tokio::select! {
            biased;
            () = wait_closed(&mut phase) => None,
            result = connector.connect(&ctx.config) => Some(result),
        };

        match connected {
            Some(Ok(model)) => {
                let Connection {
                    tx: mut model_tx,
                    rx: model_rx,
                } = model;
                if let Err(err) = send_session_update(&ctx.config, model_tx.as_mut()).await {
                    tracing::error!(error = %err, "Failed to configure the model session");
                    ctx.dispatch(SessionEvent::TransportError {
                        side: Side::Model,
                        reason: err.to_string(),
                    })
                    .await;
                }

                let upstream = tokio::spawn(
                    pump::telephony_to_model(Arc::clone(&ctx), telephony_rx, model_tx, phase.clone())
                        .in_current_span(),
                );
                let downstream = tokio::spawn(
                    pump::model_to_telephony(Arc::clone(&ctx), model_rx, phase.clone()).in_current_span(),
                );
                let writer = tokio::spawn(
                    pump::telephony_writer(Arc::clone(&ctx), telephony_tx, phase.clone()).in_current_span(),
                );

                let (upstream, downstream, writer) = tokio::join!(upstream, downstream, writer);
                if let Err(err) = downstream {
                    tracing::error!(error = %err, "Model reader task failed");
                }
                match upstream {
                    Ok(mut model_tx) => close_quietly(model_tx.as_mut(), Side::Model).await,
                    Err(err) => tracing::error!(error = %err, "Telephony reader task failed"),
                }
                match writer {
                    Ok(mut telephony_tx) => close_quietly(telephony_tx.as_mut(), Side::Telephony).await,
                    Err(err) => tracing::error!(error = %err, "Telephony writer task failed"),
                }
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "Failed to connect to model endpoint");
                ctx.dispatch(SessionEvent::TransportError {
                    side: Side::Model,
                    reason: err.to_string(),
                })
                .await;
                close_quietly(telephony_tx.as_mut(), Side::Telephony).await;
            }
            None => close_quietly(telephony_tx.as_mut(), Side::Telephony).await,
        }

        // No-op unless a task died before the session closed.
        ctx.dispatch(SessionEvent::Shutdown).await;
        let reason = actor.await.unwrap_or_else(|err| {
            tracing::error!(error = %err, "Session actor failed");
            CloseReason::Shutdown
        });

        let report = SessionReport {
            call_id: ctx.call_id.clone(),
            reason,
            stats: ctx.stats.snapshot(),
        };
        tracing::info!(
            reason = %report.reason,
            telephony_frames_in = report.stats.telephony_frames_in,
            model_frames_in = report.stats.model_frames_in,
            frames_to_model = report.stats.frames_to_model,
            frames_to_telephony = report.stats.frames_to_telephony,
            "Session closed"
        );
        report
    }
}

async fn send_session_update(config: &SessionConfig, model: &mut dyn TransportTx) -> crate::Result<()> {
    let update = ModelCommand::session_update(config).encode()?;
    model.send(update).await
}

pub(crate) async fn close_quietly(tx: &mut dyn TransportTx, side: Side) {
    if let Err(err) = tx.close().await {
        tracing::debug!(%side, error = %err, "Error while closing connection");
    }
}
