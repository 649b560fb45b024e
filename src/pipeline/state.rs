//! Pipeline state machine.
//!
//! # State Transitions
//! ```text
//! NotInitialized → Initialized:  initial snapshot applied
//! Initialized    → Watching:     producer and consumer started
//! Watching       → Reloading:    consumer took a config event
//! Reloading      → Watching:     reload finished (successfully or not)
//! any            → Cancelled:    cancellation or producer exit (terminal)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a pipeline.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotInitialized = 0,
    Initialized = 1,
    Watching = 2,
    Reloading = 3,
    Cancelled = 4,
}

impl From<u8> for PipelineState {
    fn from(val: u8) -> Self {
        match val {
            1 => PipelineState::Initialized,
            2 => PipelineState::Watching,
            3 => PipelineState::Reloading,
            4 => PipelineState::Cancelled,
            _ => PipelineState::NotInitialized,
        }
    }
}

impl PipelineState {
    /// Whether `self → next` is a legal edge.
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (NotInitialized, Initialized)
                | (Initialized, Watching)
                | (Watching, Reloading)
                | (Reloading, Watching)
                | (NotInitialized | Initialized | Watching | Reloading, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::NotInitialized => "not_initialized",
            PipelineState::Initialized => "initialized",
            PipelineState::Watching => "watching",
            PipelineState::Reloading => "reloading",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder enforcing legal transitions.
#[derive(Debug)]
pub struct StateCell {
    state: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::NotInitialized as u8),
        }
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if the edge is legal. Returns `false` otherwise.
    pub fn transition(&self, next: PipelineState) -> bool {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                PipelineState::from(current)
                    .can_transition(next)
                    .then_some(next as u8)
            });
        match result {
            Ok(previous) => {
                tracing::debug!(
                    from = %PipelineState::from(previous),
                    to = %next,
                    "Pipeline state changed"
                );
                true
            }
            Err(current) => {
                tracing::debug!(
                    current = %PipelineState::from(current),
                    requested = %next,
                    "Pipeline state transition refused"
                );
                false
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
