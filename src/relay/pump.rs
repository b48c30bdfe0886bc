//! The per-session tasks that move traffic between the two legs.
//!
//! Each reader owns the receiving half of its leg and checks the published
//! phase before forwarding. Anything that is not media goes to the actor.

use std::sync::Arc;

use tokio::sync::watch;

use super::phase::{Phase, SessionEvent};
use super::playback::Playback;
use super::session::{SessionContext, wait_closed};
use crate::codec;
use crate::error::{Error, ParseError};
use crate::protocol::{
    ControlEvent, Frame, ModelCommand, Side, TelephonyCommand, parse_model_event, parse_telephony_event,
};
use crate::transport::{TransportRx, TransportTx};

/// Counts consecutive undecodable messages on one leg.
struct ParseBudget {
    limit: u32,
    consecutive: u32,
}

impl ParseBudget {
    const fn new(limit: u32) -> Self {
        Self { limit, consecutive: 0 }
    }

    const fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure; `true` once the limit is reached.
    const fn exhausted_after_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Record a parse-class failure, escalating to a transport error once the
/// budget is spent.
async fn parse_failure(
    ctx: &SessionContext,
    budget: &mut ParseBudget,
    side: Side,
    err: &ParseError,
) -> Flow {
    ctx.stats.parse_error();
    tracing::warn!(%side, error = %err, "Dropping undecodable message");
    if budget.exhausted_after_failure() {
        let reason = format!("{} consecutive undecodable messages", budget.consecutive);
        tracing::error!(%side, %reason, "Treating connection as broken");
        ctx.dispatch(SessionEvent::TransportError { side, reason }).await;
        return Flow::Stop;
    }
    Flow::Continue
}

async fn source_ended(ctx: &SessionContext, side: Side, result: crate::Result<Option<String>>) {
    match result {
        Ok(_) => {
            tracing::info!(%side, "Connection closed by peer");
            ctx.dispatch(SessionEvent::SourceClosed(side)).await;
        }
        Err(err) => {
            tracing::error!(%side, error = %err, "Receive failed");
            ctx.dispatch(SessionEvent::TransportError {
                side,
                reason: err.to_string(),
            })
            .await;
        }
    }
}

/// Read the telephony leg and forward caller audio to the model.
///
/// Returns the model sender so the session can close it.
pub(crate) async fn telephony_to_model(
    ctx: Arc<SessionContext>,
    mut rx: Box<dyn TransportRx>,
    mut model: Box<dyn TransportTx>,
    mut phase: watch::Receiver<Phase>,
) -> Box<dyn TransportTx> {
    let mut seq = 0_u64;
    let mut budget = ParseBudget::new(ctx.max_parse_errors);

    loop {
        let received = tokio::select! {
            biased;
            () = wait_closed(&mut phase) => break,
            received = rx.recv() => received,
        };
        let raw = match received {
            Ok(Some(raw)) => raw,
            Err(Error::Parse(err)) => match parse_failure(&ctx, &mut budget, Side::Telephony, &err).await {
                Flow::Continue => continue,
                Flow::Stop => break,
            },
            ended => {
                source_ended(&ctx, Side::Telephony, ended).await;
                break;
            }
        };

        let event = match parse_telephony_event(&raw, seq) {
            Ok(event) => event,
            Err(err) => match parse_failure(&ctx, &mut budget, Side::Telephony, &err).await {
                Flow::Continue => continue,
                Flow::Stop => break,
            },
        };
        budget.reset();

        match event {
            ControlEvent::MediaFrame(frame) => {
                seq += 1;
                ctx.stats.telephony_frame_in();
                let current = *phase.borrow();
                if let Flow::Stop = forward_to_model(&ctx, &frame, model.as_mut(), current).await {
                    break;
                }
            }
            ControlEvent::CallStopped => {
                tracing::info!("Caller hung up");
                ctx.dispatch(SessionEvent::CallStopped).await;
            }
            ControlEvent::Mark(label) => {
                tracing::debug!(%label, "Mark received");
                ctx.observer.on_mark(&ctx.call_id, &label);
                ctx.dispatch(SessionEvent::Mark(label)).await;
            }
            ControlEvent::CallStarted { stream_sid, .. } => {
                tracing::warn!(%stream_sid, "Ignoring second start event on an active session");
            }
            other => tracing::trace!(kind = other.kind(), "Ignoring telephony event"),
        }
    }
    model
}

async fn forward_to_model(
    ctx: &SessionContext,
    frame: &Frame,
    model: &mut dyn TransportTx,
    phase: Phase,
) -> Flow {
    if !phase.forwards(Side::Telephony) {
        ctx.stats.dropped();
        if ctx.config.logs_frames() {
            tracing::debug!(seq = frame.seq(), %phase, "Dropping caller audio");
        }
        return Flow::Continue;
    }

    let translated = match codec::to_model_frame(frame) {
        Ok(translated) => translated,
        Err(err) => {
            ctx.stats.codec_error();
            tracing::warn!(seq = frame.seq(), error = %err, "Dropping caller frame");
            return Flow::Continue;
        }
    };
    let message = match ModelCommand::append(&translated).encode() {
        Ok(message) => message,
        Err(err) => {
            ctx.stats.codec_error();
            tracing::warn!(seq = frame.seq(), error = %err, "Dropping caller frame");
            return Flow::Continue;
        }
    };

    if let Err(err) = model.send(message).await {
        tracing::error!(error = %err, "Send to model failed");
        ctx.dispatch(SessionEvent::TransportError {
            side: Side::Model,
            reason: err.to_string(),
        })
        .await;
        return Flow::Stop;
    }

    ctx.stats.sent_to_model(translated.audio_len());
    if ctx.config.logs_frames() {
        tracing::debug!(seq = translated.seq(), bytes = translated.audio_len(), "Forwarded caller audio");
    }
    ctx.observer.on_frame_forwarded(&ctx.call_id, Side::Model, &translated);
    Flow::Continue
}

/// Read the model leg, queueing model audio for the caller.
pub(crate) async fn model_to_telephony(
    ctx: Arc<SessionContext>,
    mut rx: Box<dyn TransportRx>,
    mut phase: watch::Receiver<Phase>,
) {
    let mut seq = 0_u64;
    let mut budget = ParseBudget::new(ctx.max_parse_errors);

    loop {
        let received = tokio::select! {
            biased;
            () = wait_closed(&mut phase) => break,
            received = rx.recv() => received,
        };
        let raw = match received {
            Ok(Some(raw)) => raw,
            Err(Error::Parse(err)) => match parse_failure(&ctx, &mut budget, Side::Model, &err).await {
                Flow::Continue => continue,
                Flow::Stop => break,
            },
            ended => {
                let draining = *phase.borrow() == Phase::Draining;
                if ended.is_ok() && draining {
                    // Let the writer play out what the model already sent.
                    tokio::select! {
                        biased;
                        () = wait_closed(&mut phase) => {}
                        () = ctx.playback.drained() => {}
                    }
                }
                source_ended(&ctx, Side::Model, ended).await;
                break;
            }
        };

        let event = match parse_model_event(&raw, seq) {
            Ok(event) => event,
            Err(err) => match parse_failure(&ctx, &mut budget, Side::Model, &err).await {
                Flow::Continue => continue,
                Flow::Stop => break,
            },
        };

        match event {
            ControlEvent::MediaFrame(frame) => {
                seq += 1;
                ctx.stats.model_frame_in();
                let current = *phase.borrow();
                if current == Phase::Connecting {
                    let err = ParseError::InvalidEnvelope {
                        kind: "response.audio.delta".to_string(),
                        reason: "model audio before session acknowledgement".to_string(),
                    };
                    match parse_failure(&ctx, &mut budget, Side::Model, &err).await {
                        Flow::Continue => continue,
                        Flow::Stop => break,
                    }
                }
                budget.reset();
                queue_for_caller(&ctx, &frame, current);
            }
            ControlEvent::ConfigAck => {
                budget.reset();
                tracing::info!("Model acknowledged session configuration");
                ctx.dispatch(SessionEvent::ConfigAck).await;
            }
            ControlEvent::InterruptSignal => {
                budget.reset();
                ctx.dispatch(SessionEvent::Interrupt).await;
            }
            ControlEvent::ModelError(message) => {
                budget.reset();
                ctx.stats.model_error();
                tracing::warn!(%message, "Model endpoint reported an error");
                ctx.observer.on_model_error(&ctx.call_id, &message);
            }
            ControlEvent::ModelText(delta) => {
                budget.reset();
                if ctx.config.logs_frames() {
                    tracing::debug!(%delta, "Model text");
                }
                ctx.observer.on_model_text(&ctx.call_id, &delta);
            }
            other => {
                budget.reset();
                tracing::trace!(kind = other.kind(), "Ignoring model event");
            }
        }
    }
}

fn queue_for_caller(ctx: &SessionContext, frame: &Frame, phase: Phase) {
    if !phase.forwards(Side::Model) {
        ctx.stats.dropped();
        return;
    }
    match codec::to_telephony_frame(frame) {
        Ok(translated) => {
            if !ctx.playback.push(Playback::Audio(translated)) {
                ctx.stats.dropped();
            }
        }
        Err(err) => {
            ctx.stats.codec_error();
            tracing::warn!(seq = frame.seq(), error = %err, "Dropping model frame");
        }
    }
}

/// Write queued playback to the telephony leg in order.
///
/// Returns the telephony sender so the session can close it.
pub(crate) async fn telephony_writer(
    ctx: Arc<SessionContext>,
    mut telephony: Box<dyn TransportTx>,
    mut phase: watch::Receiver<Phase>,
) -> Box<dyn TransportTx> {
    loop {
        let item = tokio::select! {
            biased;
            () = wait_closed(&mut phase) => break,
            item = ctx.playback.next() => item,
        };
        let Some(item) = item else { break };

        let (command, frame) = match item {
            Playback::Audio(frame) => {
                let current = *phase.borrow();
                if !current.forwards(Side::Model) {
                    ctx.stats.dropped();
                    ctx.playback.complete();
                    continue;
                }
                (TelephonyCommand::media(ctx.stream_sid.as_str(), &frame), Some(frame))
            }
            Playback::Mark(label) => (TelephonyCommand::mark(ctx.stream_sid.as_str(), label), None),
            Playback::Clear => (TelephonyCommand::clear(ctx.stream_sid.as_str()), None),
        };

        let message = match command.encode() {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to encode telephony message");
                ctx.playback.complete();
                continue;
            }
        };

        if let Err(err) = telephony.send(message).await {
            ctx.playback.complete();
            if *phase.borrow() == Phase::Draining {
                tracing::info!(error = %err, "Caller leg gone, ending playback");
            } else {
                tracing::error!(error = %err, "Send to telephony failed");
            }
            ctx.dispatch(SessionEvent::PlaybackFailed {
                reason: err.to_string(),
            })
            .await;
            break;
        }
        ctx.playback.complete();

        if let Some(frame) = frame {
            ctx.stats.sent_to_telephony(frame.audio_len());
            if ctx.config.logs_frames() {
                tracing::debug!(seq = frame.seq(), bytes = frame.audio_len(), "Forwarded model audio");
            }
            ctx.observer.on_frame_forwarded(&ctx.call_id, Side::Telephony, &frame);
        }
    }
    telephony
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_budget_escalates_on_consecutive_failures_only() {
        let mut budget = ParseBudget::new(3);
        assert!(!budget.exhausted_after_failure());
        assert!(!budget.exhausted_after_failure());
        budget.reset();
        assert!(!budget.exhausted_after_failure());
        assert!(!budget.exhausted_after_failure());
        assert!(budget.exhausted_after_failure());
    }
}
