//! Error types for the IP-T session layer (spec §7).
//!
//! One enum covering the taxonomy kinds a session itself can raise
//! (`AuthError`, `ProtocolViolation`, `FrameError`, plus the watchdog
//! timeout that stands in for the teacher's idle timeout); codec-level
//! `ChecksumError`/`DecryptError` surface from `smf-proto`/`smf-crypto`
//! and are folded in via `From`.

use std::time::Duration;

use smf_proto::ProtocolError;
use thiserror::Error;

use crate::session::SessionState;

/// Errors raised while driving an [`crate::session::IptSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation attempted from a state that does not permit it.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred.
        state: SessionState,
        /// Operation that was attempted.
        operation: String,
    },

    /// Login was refused by the peer, or a login request failed local
    /// validation (spec §7 `AuthError`). Always fatal: the session moves
    /// to `Shutdown`.
    #[error("login refused: {0}")]
    AuthError(String),

    /// A command arrived that is not valid for the current state (spec
    /// §7 `ProtocolViolation`). Always fatal.
    #[error("protocol violation: unexpected command {command:#06x} in state {state:?}")]
    ProtocolViolation {
        /// Current state when the frame was received.
        state: SessionState,
        /// Command code of the unexpected frame.
        command: u16,
    },

    /// Malformed frame surfaced from the wire codec (spec §7
    /// `FrameError`). Always fatal: the line is torn down.
    #[error("frame error: {0}")]
    FrameError(#[from] ProtocolError),

    /// No activity within the watchdog window.
    #[error("watchdog timeout after {elapsed:?}")]
    WatchdogTimeout {
        /// How long the session was idle.
        elapsed: Duration,
    },

    /// Requested target/channel is not known to this session (spec §7
    /// `ResourceNotFound`). Transient from the caller's point of view —
    /// it reflects registry state, not a broken peer.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

impl SessionError {
    /// True if the error reflects transient conditions the caller may
    /// retry against (a fresh attempt could succeed without anything
    /// changing about the peer's behavior).
    ///
    /// Protocol violations and auth failures are never transient — they
    /// indicate a broken or misbehaving peer rather than a timing issue.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::WatchdogTimeout { .. } | Self::ResourceNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_and_resource_errors_are_transient() {
        assert!(SessionError::WatchdogTimeout { elapsed: Duration::from_secs(16) }.is_transient());
        assert!(SessionError::ResourceNotFound("target-a".into()).is_transient());
    }

    #[test]
    fn auth_and_protocol_errors_are_fatal() {
        assert!(!SessionError::AuthError("wrong password".into()).is_transient());
        assert!(
            !SessionError::ProtocolViolation { state: SessionState::Authenticating, command: 0x9000 }
                .is_transient()
        );
        assert!(
            !SessionError::InvalidState {
                state: SessionState::Shutdown,
                operation: "login".to_string()
            }
            .is_transient()
        );
    }
}
