// MIT License - Copyright (c) 2026 Peter Wright
// Error types

use std::net::Ipv4Addr;

/// All errors that can occur in the airtub-udp library.
#[derive(Debug, thiserror::Error)]
pub enum AirtubError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind UDP port {port}: {reason}")]
    BindFailed { port: u16, reason: String },

    #[error("Failed to join multicast group {group}: {reason}")]
    JoinFailed { group: Ipv4Addr, reason: String },

    #[error("Payload too large: {len} bytes (max: {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid command: {details}")]
    InvalidCommand { details: String },

    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("Engine shut down")]
    Shutdown,
}

impl AirtubError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AirtubError::Io(_) | AirtubError::BindFailed { .. } | AirtubError::JoinFailed { .. }
        )
    }
}

impl From<serde_json::Error> for AirtubError {
    fn from(e: serde_json::Error) -> Self {
        AirtubError::InvalidCommand {
            details: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AirtubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let io = AirtubError::Io(std::io::Error::other("boom"));
        assert!(io.is_retryable());
        let bind = AirtubError::BindFailed {
            port: 4211,
            reason: "in use".into(),
        };
        assert!(bind.is_retryable());
        assert!(!AirtubError::Shutdown.is_retryable());
        assert!(!AirtubError::PayloadTooLarge { len: 200, max: 180 }.is_retryable());
    }

    #[test]
    fn test_json_error_maps_to_invalid_command() {
        let err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let mapped: AirtubError = err.into();
        assert!(matches!(mapped, AirtubError::InvalidCommand { .. }));
    }
}
