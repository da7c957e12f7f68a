//! Cancellable streaming session.
//!
//! ```text
//! idle ──start()──▶ active ──finish()──▶ completed
//!                     │
//!                     └───cancel()────▶ cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. The buffer is only written by
//! the owner through [`StreamSession::append`]; cancellation can come from
//! the owner, a per-chunk callback, or another task holding a
//! [`CancelHandle`]. Cancellation is cooperative: the producer checks
//! [`StreamSession::is_cancelled`] after each append and stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use aegis_core::error::StreamError;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Active,
    Completed,
    Cancelled,
}

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;

fn decode(raw: u8) -> StreamState {
    match raw {
        IDLE => StreamState::Idle,
        ACTIVE => StreamState::Active,
        COMPLETED => StreamState::Completed,
        _ => StreamState::Cancelled,
    }
}

/// Move to `cancelled` unless the stream already reached a terminal state.
/// Returns `true` if this call performed the transition.
fn cancel_state(state: &AtomicU8) -> bool {
    state
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| match s {
            IDLE | ACTIVE => Some(CANCELLED),
            _ => None,
        })
        .is_ok()
}

#[derive(Debug)]
pub struct StreamSession {
    id: String,
    buffer: String,
    state: Arc<AtomicU8>,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            buffer: String::new(),
            state: Arc::new(AtomicU8::new(IDLE)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> StreamState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// `idle → active`. Has no effect in any other state.
    pub fn start(&self) {
        let _ = self
            .state
            .compare_exchange(IDLE, ACTIVE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Grow the buffer. Only valid while active.
    pub fn append(&mut self, delta: &str) -> Result<(), StreamError> {
        if self.state() != StreamState::Active {
            return Err(StreamError::NotActive {
                session_id: self.id.clone(),
            });
        }
        self.buffer.push_str(delta);
        Ok(())
    }

    /// Idempotent. Keeps everything appended so far.
    pub fn cancel(&self) {
        if cancel_state(&self.state) {
            tracing::debug!(session_id = %self.id, chars = self.buffer.chars().count(), "Stream cancelled");
        }
    }

    /// `active → completed`. Returns `false` if the stream was cancelled
    /// (or never started) instead.
    pub fn finish(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Everything appended so far.
    pub fn read(&self) -> &str {
        &self.buffer
    }

    pub fn is_active(&self) -> bool {
        self.state() == StreamState::Active
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == StreamState::Cancelled
    }

    /// A handle that can cancel this session from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<AtomicU8>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        cancel_state(&self.state);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}
