//! Replay buffer with quiet-period detection.
//!
//! Inbound packets accumulate in arrival order. The buffer remembers when the
//! most recent packet was accepted; once nothing has arrived for longer than
//! the quiet period, a timeout check hands back the whole batch and the buffer
//! returns to idle.
//!
//! The queue and the timestamp live in a single guarded value so that a
//! non-empty queue is always paired with a timestamp and an empty one (after
//! a timeout) never is.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct BufferState {
    packets: Vec<Bytes>,
    last_accepted: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No packets queued and no timestamp.
    Idle,
    /// At least one packet queued since the last timeout.
    Accumulating,
}

/// Result of a single timeout check.
#[derive(Debug)]
pub enum Tick {
    /// Nothing has been accepted since the last timeout.
    Idle,
    /// The quiet period has not elapsed yet.
    Waiting { elapsed: Duration },
    /// The quiet period elapsed. The buffer has been cleared and `batch` holds
    /// everything it contained, oldest first.
    Expired { elapsed: Duration, batch: Vec<Bytes> },
}

pub struct ReplayBuffer {
    state: Mutex<BufferState>,
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Queue a packet that already passed the loop guard and restart the
    /// quiet period. Returns the queue length after the append.
    pub async fn accept(&self, packet: Bytes) -> usize {
        self.accept_at(packet, Instant::now()).await
    }

    pub async fn accept_at(&self, packet: Bytes, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        state.packets.push(packet);
        state.last_accepted = Some(now);
        state.packets.len()
    }

    /// Check whether the quiet period has elapsed as of `now`.
    ///
    /// On expiry the queue is taken and the timestamp cleared in the same
    /// critical section, whether or not the queue held anything. The caller
    /// replays the returned batch after the lock is released.
    pub async fn check_timeout(&self, now: Instant, quiet_period: Duration) -> Tick {
        let mut state = self.state.lock().await;
        let Some(last_accepted) = state.last_accepted else {
            return Tick::Idle;
        };

        let elapsed = now.saturating_duration_since(last_accepted);
        if elapsed <= quiet_period {
            return Tick::Waiting { elapsed };
        }

        let batch = std::mem::take(&mut state.packets);
        state.last_accepted = None;
        Tick::Expired { elapsed, batch }
    }

    /// Empty the buffer without replaying (used on shutdown).
    pub async fn drain(&self) -> Vec<Bytes> {
        let mut state = self.state.lock().await;
        state.last_accepted = None;
        std::mem::take(&mut state.packets)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.packets.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn last_accepted(&self) -> Option<Instant> {
        self.state.lock().await.last_accepted
    }

    pub async fn phase(&self) -> Phase {
        match self.state.lock().await.last_accepted {
            Some(_) => Phase::Accumulating,
            None => Phase::Idle,
        }
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new()
    }
}
