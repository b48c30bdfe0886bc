use std::collections::VecDeque;
use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::protocol::Frame;

/// An item waiting to be written to the telephony leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Playback {
    Audio(Frame),
    Mark(String),
    Clear,
}

#[derive(Debug, Default)]
struct State {
    items: VecDeque<Playback>,
    /// Taken by the writer but not yet reported as sent.
    in_flight: usize,
    closed: bool,
}

impl State {
    fn is_idle(&self) -> bool {
        self.items.is_empty() && self.in_flight == 0
    }
}

/// Ordered queue of model output headed for the caller.
///
/// A single writer consumes it with [`next`](Self::next) and reports each
/// write with [`complete`](Self::complete). Barge-in removes queued audio
/// while leaving marks in place.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    state: Mutex<State>,
    available: Notify,
    idle: Notify,
}

impl PlaybackQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item; returns `false` once the queue is closed.
    pub fn push(&self, item: Playback) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.items.push_back(item);
        }
        self.available.notify_one();
        true
    }

    /// Put an item ahead of everything already queued.
    pub fn push_front(&self, item: Playback) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.items.push_front(item);
        }
        self.available.notify_one();
        true
    }

    /// Remove all queued audio, returning how many frames were dropped.
    pub fn discard_audio(&self) -> usize {
        let (dropped, idle) = {
            let mut state = self.lock();
            let before = state.items.len();
            state.items.retain(|item| !matches!(item, Playback::Audio(_)));
            (before - state.items.len(), state.is_idle())
        };
        if idle {
            self.idle.notify_waiters();
        }
        dropped
    }

    /// Stop accepting items and wake the writer. Queued items are dropped.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.items.clear();
            state.in_flight = 0;
        }
        self.available.notify_one();
        self.idle.notify_waiters();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Wait for the next item, `None` once the queue is closed.
    pub async fn next(&self) -> Option<Playback> {
        loop {
            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(item) = state.items.pop_front() {
                    state.in_flight += 1;
                    return Some(item);
                }
            }
            self.available.notified().await;
        }
    }

    /// Report that an item returned by [`next`](Self::next) was handled.
    pub fn complete(&self) {
        let idle = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.is_idle()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Wait until everything queued so far has been written, or the queue closed.
    pub async fn drained(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            {
                let state = self.lock();
                if state.closed || state.is_idle() {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Encoding;
    use std::sync::Arc;
    use std::time::Duration;

    fn audio(seq: u64) -> Playback {
        Playback::Audio(Frame::new(Encoding::Mulaw, "//8=", seq))
    }

    #[tokio::test]
    async fn preserves_order() {
        let queue = PlaybackQueue::new();
        for seq in 0..3 {
            assert!(queue.push(audio(seq)));
        }
        for seq in 0..3 {
            assert_eq!(queue.next().await, Some(audio(seq)));
            queue.complete();
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn discard_keeps_marks_and_clear_jumps_the_line() {
        let queue = PlaybackQueue::new();
        queue.push(audio(0));
        queue.push(Playback::Mark("m1".to_string()));
        queue.push(audio(1));
        queue.push(audio(2));

        assert_eq!(queue.discard_audio(), 3);
        queue.push_front(Playback::Clear);
        queue.push(audio(3));

        assert_eq!(queue.next().await, Some(Playback::Clear));
        assert_eq!(queue.next().await, Some(Playback::Mark("m1".to_string())));
        assert_eq!(queue.next().await, Some(audio(3)));
    }

    #[tokio::test]
    async fn next_wakes_on_push_and_close() {
        let queue = Arc::new(PlaybackQueue::new());

        let reader = Arc::clone(&queue);
        let waiting = tokio::spawn(async move { reader.next().await });
        tokio::task::yield_now().await;
        queue.push(audio(7));
        let item = tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        assert_eq!(item, Some(audio(7)));

        let reader = Arc::clone(&queue);
        let waiting = tokio::spawn(async move { reader.next().await });
        tokio::task::yield_now().await;
        queue.close();
        let item = tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        assert_eq!(item, None);
        assert!(!queue.push(audio(8)));
    }

    #[tokio::test]
    async fn drained_waits_for_in_flight_items() {
        let queue = Arc::new(PlaybackQueue::new());
        queue.drained().await;

        queue.push(audio(0));
        let item = queue.next().await;
        assert!(item.is_some());

        let waiter = Arc::clone(&queue);
        let drained = tokio::spawn(async move { waiter.drained().await });
        tokio::task::yield_now().await;
        assert!(!drained.is_finished());

        queue.complete();
        tokio::time::timeout(Duration::from_secs(1), drained).await.unwrap().unwrap();
    }
}
