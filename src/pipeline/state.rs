//! Pipeline state management

use std::time::Instant;

/// Pipeline state machine
///
/// `Idle → Initializing → Streaming → Stopped`. `Stopped` is terminal: a
/// restart goes through a fresh controller starting at `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, no codec session yet
    Idle,

    /// Opening the codec session
    Initializing,

    /// Decoding and presenting packets
    Streaming {
        /// When the session opened
        started_at: Instant,
    },

    /// Resources released, no further packets accepted
    Stopped,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Initializing) => true,
            // Stop before start
            (Idle, Stopped) => true,

            (Initializing, Streaming { .. }) => true,
            // Session failed to open
            (Initializing, Stopped) => true,

            (Streaming { .. }, Stopped) => true,

            // From Stopped - no transitions allowed
            (Stopped, _) => false,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Initializing => "Initializing",
            PipelineState::Streaming { .. } => "Streaming",
            PipelineState::Stopped => "Stopped",
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, PipelineState::Streaming { .. })
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PipelineState::Stopped)
    }

    /// Get the duration since streaming started (if streaming)
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Streaming { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
