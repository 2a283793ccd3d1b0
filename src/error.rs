//! Error kinds surfaced by the gateway.
//!
//! Connect-phase rejections (auth, permission, resolve) are expected events
//! and log at info; protocol and internal failures carry detail and log at
//! warn/error. Errors never escape the dispatcher: the server front end
//! answers every kind by closing the offending transport.

use crate::protocol::ProtocolError;

/// Everything that can go wrong between a TCP accept and a detached client.
#[derive(Debug, Clone)]
pub enum GatewayError {
    /// Missing/invalid cookie, unknown browser session, or unknown user.
    AuthRejected(String),
    /// The user exists but may not read the note.
    PermissionDenied { user: String, note: String },
    /// The request path does not resolve to a note.
    ResolveFailed(String),
    /// Malformed frame or CRDT payload. Fatal for the offending connection
    /// only; the session survives.
    Protocol(ProtocolError),
    /// Underlying socket failure. Handled like a clean disconnect.
    Transport(String),
    /// Unexpected failure (service outage mid-fetch, observer registration).
    Internal(String),
    /// The target session emptied and closed while this attach was in
    /// flight. Internal retry signal; never surfaced to a peer.
    SessionClosed,
}

impl GatewayError {
    /// Connect-phase rejections are routine and log at info.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthRejected(_)
                | GatewayError::PermissionDenied { .. }
                | GatewayError::ResolveFailed(_)
        )
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthRejected(reason) => write!(f, "authentication rejected: {reason}"),
            Self::PermissionDenied { user, note } => {
                write!(f, "user {user} may not read note {note}")
            }
            Self::ResolveFailed(path) => write!(f, "no note for path {path}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
            Self::SessionClosed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ProtocolError> for GatewayError {
    fn from(e: ProtocolError) -> Self {
        GatewayError::Protocol(e)
    }
}
