use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one session, shared by its loops.
#[derive(Debug)]
pub struct SessionStats {
    started: Instant,
    last_activity: Mutex<Instant>,
    telephony_frames_in: AtomicU64,
    model_frames_in: AtomicU64,
    frames_to_model: AtomicU64,
    frames_to_telephony: AtomicU64,
    bytes_to_model: AtomicU64,
    bytes_to_telephony: AtomicU64,
    codec_errors: AtomicU64,
    parse_errors: AtomicU64,
    dropped_frames: AtomicU64,
    discarded_frames: AtomicU64,
    model_errors: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub telephony_frames_in: u64,
    pub model_frames_in: u64,
    pub frames_to_model: u64,
    pub frames_to_telephony: u64,
    /// Decoded PCM16 bytes sent to the model.
    pub bytes_to_model: u64,
    /// Decoded mu-law bytes written to telephony.
    pub bytes_to_telephony: u64,
    pub codec_errors: u64,
    pub parse_errors: u64,
    /// Media received in a phase that does not forward it.
    pub dropped_frames: u64,
    /// Model audio thrown away on barge-in.
    pub discarded_frames: u64,
    pub model_errors: u64,
    pub age: Duration,
    pub idle: Duration,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl SessionStats {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_activity: Mutex::new(now),
            telephony_frames_in: AtomicU64::new(0),
            model_frames_in: AtomicU64::new(0),
            frames_to_model: AtomicU64::new(0),
            frames_to_telephony: AtomicU64::new(0),
            bytes_to_model: AtomicU64::new(0),
            bytes_to_telephony: AtomicU64::new(0),
            codec_errors: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            discarded_frames: AtomicU64::new(0),
            model_errors: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn telephony_frame_in(&self) {
        bump(&self.telephony_frames_in, 1);
        self.touch();
    }

    pub(crate) fn model_frame_in(&self) {
        bump(&self.model_frames_in, 1);
        self.touch();
    }

    pub(crate) fn sent_to_model(&self, bytes: usize) {
        bump(&self.frames_to_model, 1);
        bump(&self.bytes_to_model, bytes as u64);
    }

    pub(crate) fn sent_to_telephony(&self, bytes: usize) {
        bump(&self.frames_to_telephony, 1);
        bump(&self.bytes_to_telephony, bytes as u64);
    }

    pub(crate) fn codec_error(&self) {
        bump(&self.codec_errors, 1);
    }

    pub(crate) fn parse_error(&self) {
        bump(&self.parse_errors, 1);
    }

    pub(crate) fn dropped(&self) {
        bump(&self.dropped_frames, 1);
    }

    pub(crate) fn discarded(&self, frames: usize) {
        bump(&self.discarded_frames, frames as u64);
    }

    pub(crate) fn model_error(&self) {
        bump(&self.model_errors, 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let last = *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot {
            telephony_frames_in: load(&self.telephony_frames_in),
            model_frames_in: load(&self.model_frames_in),
            frames_to_model: load(&self.frames_to_model),
            frames_to_telephony: load(&self.frames_to_telephony),
            bytes_to_model: load(&self.bytes_to_model),
            bytes_to_telephony: load(&self.bytes_to_telephony),
            codec_errors: load(&self.codec_errors),
            parse_errors: load(&self.parse_errors),
            dropped_frames: load(&self.dropped_frames),
            discarded_frames: load(&self.discarded_frames),
            model_errors: load(&self.model_errors),
            age: self.started.elapsed(),
            idle: last.elapsed(),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}
