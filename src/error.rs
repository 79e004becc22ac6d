use thiserror::Error;

use crate::types::SessionStatus;

/// Error codes recorded on failed sessions
pub mod codes {
    pub const FLOW_LOOP_LIMIT: &str = "FlowLoopLimit";
    pub const FLOW_GONE: &str = "FlowGone";
    pub const EXTERNAL_CALL_ERROR: &str = "ExternalCallError";
    pub const NODE_NOT_FOUND: &str = "NodeNotFound";
    pub const MISSING_EDGE: &str = "MissingEdge";
    pub const CANCELLED: &str = "Cancelled";
    pub const INVALID_CONFIG: &str = "InvalidConfig";
}

/// Errors returned by `Engine::step` and friends.
///
/// Node-local failures never show up here; they fail the session and are
/// reported through `StepOutcome::error`. What remains is trigger rejection
/// and storage trouble the caller should retry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Trigger does not fit the session's state; drop it
    #[error("stale {trigger} trigger for session {session_id} in state {status}")]
    StaleTrigger {
        session_id: String,
        trigger: &'static str,
        status: SessionStatus,
    },

    /// Same inbound event already processed; drop it
    #[error("duplicate trigger for session {session_id}")]
    DuplicateTrigger { session_id: String },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Another caller holds the session lease
    #[error("session {0} is busy")]
    SessionBusy(String),

    /// The session row changed underneath us
    #[error("session {0} was modified concurrently")]
    Conflict(String),

    /// Flow was never published, is paused, or was deleted
    #[error("flow {flow_id} is not available: {reason}")]
    FlowNotFound { flow_id: String, reason: String },

    /// The contact already has a non-terminal session on that channel
    #[error("contact already has active session {0}")]
    ActiveSessionExists(String),

    #[error("no entry flow configured for channel {0}")]
    NoEntryFlow(String),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    /// Triggers rejected for these reasons are discarded, never retried
    pub fn is_discardable(&self) -> bool {
        matches!(
            self,
            EngineError::StaleTrigger { .. }
                | EngineError::DuplicateTrigger { .. }
                | EngineError::SessionNotFound(_)
        )
    }

    /// The caller should redeliver the trigger later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SessionBusy(_) | EngineError::Conflict(_) | EngineError::Storage(_)
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
