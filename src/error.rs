//! Error taxonomy for the signaling core.
//!
//! Handler failures ride the ack envelope back to the requester and are
//! counted by metrics; they never terminate the socket unless the socket
//! itself has been invalidated.

use thiserror::Error;

/// Errors produced while handling a signaling request.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Admission, media, or admin capability denied. Recoverable by user
    /// action (ask the host, retry with a code, grant permission).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Socket auth/connect failure. The reconnect engine retries these.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Device-level media failure. Recoverable by re-prompting.
    #[error("media error: {0}")]
    MediaError(String),

    /// A transport transitioned to failed/closed or an SFU operation on it
    /// failed. Triggers ICE restart, then full reconnect.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The request references a room the sender is not in.
    #[error("not in a room")]
    NotInRoom,

    /// Admin-only request from a non-admin session.
    #[error("not an admin")]
    NotAdmin,

    /// Host actions against the requester (kick, room closed) and catch-all.
    #[error("{0}")]
    Unknown(String),
}

impl SignalingError {
    /// Static code for metrics labeling and the ack envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::MediaError(_) => "MEDIA_ERROR",
            Self::TransportError(_) => "TRANSPORT_ERROR",
            Self::NotInRoom => "PERMISSION_DENIED",
            Self::NotAdmin => "PERMISSION_DENIED",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the surface should offer retry instead of a terminal state.
    pub fn recoverable(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// User-displayable message for the ack envelope.
    pub fn display_message(&self) -> String {
        self.to_string()
    }

    /// Rebuilds a typed error from an ack envelope's `(code, error)` pair.
    pub fn from_wire(code: Option<&str>, message: &str) -> Self {
        match code {
            Some("PERMISSION_DENIED") => Self::PermissionDenied(message.to_string()),
            Some("CONNECTION_FAILED") => Self::ConnectionFailed(message.to_string()),
            Some("MEDIA_ERROR") => Self::MediaError(message.to_string()),
            Some("TRANSPORT_ERROR") => Self::TransportError(message.to_string()),
            _ => Self::Unknown(message.to_string()),
        }
    }
}
