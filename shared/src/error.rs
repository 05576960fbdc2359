use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every way a synchronization request can fail.
///
/// Travels on the wire inside `Response::Error`, so variants carry only plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum SyncError {
    #[error("invalid move ({dx}, {dy}): expected a single unit step")]
    InvalidMove { dx: i32, dy: i32 },

    #[error("invalid color {rgb:?}: components must be in 0..=255")]
    InvalidColor { rgb: [i32; 3] },

    #[error("unknown or expired session")]
    UnknownSession,

    #[error("id {id:?} is already joined")]
    AlreadyJoined { id: String },

    #[error("stale move sequence {got}, expected {expected}")]
    StaleMove { expected: u32, got: u32 },

    #[error("invalid id {id:?}")]
    InvalidId { id: String },

    #[error("server is full ({max_sessions} sessions)")]
    ServerFull { max_sessions: usize },

    /// Produced client-side when a request outlives its deadline.
    #[error("request timed out")]
    Timeout,
}

impl SyncError {
    /// Transient failures are retried on a later tick instead of surfacing to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout)
    }
}
