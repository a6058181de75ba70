//! Crate-level error type.
//!
//! ERROR HANDLING
//! ==============
//! Session operations absorb these errors into user-state transitions and
//! events instead of returning them. They surface as values only from the
//! building blocks (transport parsing, token retrieval, teardown) and in the
//! `message` of `authentication-error` events.

use crate::bus::BusError;
use crate::config::ConfigError;
use crate::jwt::JwtError;
use crate::transport::TransportError;

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-2xx status (redirects included).
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Jwt(JwtError::Invalid) => "E_INVALID_TOKEN",
            Self::Jwt(JwtError::Factory(_)) => "E_TOKEN_FACTORY",
            Self::Jwt(JwtError::NotConfigured) => "E_TOKEN_NOT_CONFIGURED",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Rejected { .. } => "E_REJECTED",
            Self::InvalidBaseUrl { .. } => "E_INVALID_BASE_URL",
            Self::Config(_) => "E_CONFIG",
            Self::Bus(_) => "E_BUS",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Rejected { status: 401, .. })
    }
}
