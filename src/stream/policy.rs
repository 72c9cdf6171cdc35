use crate::protocol::{RESPONSE_TIMEOUT, RETRIES_EXHAUSTED, StreamFrame};
use std::time::Duration;
use tokio::time::Instant;

/// Maximum reconnects after the initial connection of one logical send.
pub const MAX_RETRIES: u32 = 3;
/// Fixed delay before each reconnect.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Longest silence since the last parsed frame. A connection silent for longer
/// is treated as stalled, and a transport error after it is not retried.
pub const CHUNK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Streaming,
    Retrying,
    Closed,
}

/// Per-send state. Lives for exactly one logical send and is dropped when the
/// stream closes.
#[derive(Debug)]
pub struct ConnectionAttempt {
    retry_count: u32,
    last_frame_at: Instant,
    buffer: String,
    state: ConnectionState,
}

impl ConnectionAttempt {
    pub fn new(issued_at: Instant) -> Self {
        Self {
            retry_count: 0,
            last_frame_at: issued_at,
            buffer: String::new(),
            state: ConnectionState::Connecting,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_frame_at(&self) -> Instant {
        self.last_frame_at
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn record_frame(&mut self, now: Instant) {
        self.last_frame_at = now;
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Streaming;
        }
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    pub(crate) fn begin_retry(&mut self) {
        self.state = ConnectionState::Retrying;
    }

    pub(crate) fn reconnect(&mut self) {
        self.retry_count += 1;
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

/// What to do after a transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    Retry { delay: Duration },
    GiveUp(StreamFrame),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub chunk_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DELAY,
            chunk_timeout: CHUNK_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of an attempt that just hit a transport error.
    ///
    /// The inactivity check runs first: a stale stream gives up even when
    /// retry budget remains.
    pub fn on_transport_error(&self, attempt: &ConnectionAttempt, now: Instant) -> Recovery {
        let silence = now.saturating_duration_since(attempt.last_frame_at);
        if silence > self.chunk_timeout {
            return Recovery::GiveUp(StreamFrame::failed(RESPONSE_TIMEOUT));
        }

        if attempt.retry_count >= self.max_retries {
            return Recovery::GiveUp(StreamFrame::failed(RETRIES_EXHAUSTED));
        }

        Recovery::Retry {
            delay: self.retry_delay,
        }
    }
}
