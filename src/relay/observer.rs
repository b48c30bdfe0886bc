use crate::protocol::{Frame, Side};

use super::phase::Phase;

/// Hooks into a running session.
///
/// Every method has a no-op default; implement only what you need. Callbacks
/// run inline on the relay tasks and must not block.
pub trait SessionObserver: Send + Sync {
    fn on_phase_changed(&self, _call_id: &str, _from: Phase, _to: Phase) {}

    /// A media frame was delivered to the `to` leg, already translated.
    fn on_frame_forwarded(&self, _call_id: &str, _to: Side, _frame: &Frame) {}

    fn on_model_text(&self, _call_id: &str, _delta: &str) {}

    fn on_model_error(&self, _call_id: &str, _message: &str) {}

    fn on_mark(&self, _call_id: &str, _label: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
