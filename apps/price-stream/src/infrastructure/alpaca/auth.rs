//! Alpaca WebSocket Authentication
//!
//! Handles authentication with Alpaca's market-data stream. Alpaca requires
//! authentication within 10 seconds of connection establishment.
//!
//! # Authentication Flow
//!
//! 1. Connect to WebSocket endpoint
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `{"T":"success","msg":"authenticated"}` or an error frame
//!
//! The server also sends `{"T":"success","msg":"connected"}` on accept. The
//! auth request is sent as soon as the socket opens, so that frame is only
//! informational.
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 403: Already authenticated
//! - 404: Authentication timeout (>10 seconds)
//! - 406: Connection limit exceeded
//!
//! # References
//!
//! - [Stock Streaming Auth](https://docs.alpaca.markets/docs/streaming-market-data)

use std::time::Duration;

use thiserror::Error;

use super::messages::{AuthRequest, ErrorMessage, SuccessKind, SuccessMessage};

// =============================================================================
// Constants
// =============================================================================

/// Maximum time allowed for authentication after connection.
/// Alpaca terminates connections that don't authenticate within 10 seconds.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Not authenticated (must authenticate before subscribing).
    #[error("not authenticated: must authenticate before making requests")]
    NotAuthenticated,

    /// Authentication failed (invalid credentials).
    #[error("authentication failed: invalid API key or secret")]
    InvalidCredentials,

    /// Already authenticated (connection was already authenticated).
    #[error("already authenticated: connection is already authenticated")]
    AlreadyAuthenticated,

    /// Authentication timeout (took longer than 10 seconds).
    #[error("authentication timeout: must authenticate within 10 seconds")]
    Timeout,

    /// Connection limit exceeded.
    #[error("connection limit exceeded: too many concurrent connections")]
    ConnectionLimitExceeded,

    /// Invalid credentials or message supplied locally.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Unexpected error from server.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// Error code from server
        code: i32,
        /// Error message from server
        message: String,
    },
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials.
///
/// The `Debug` and `Display` implementations redact the secret.
#[derive(Clone)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        if key.is_empty() {
            return Err(AuthError::InvalidMessage(
                "API key cannot be empty".to_string(),
            ));
        }
        if secret.is_empty() {
            return Err(AuthError::InvalidMessage(
                "API secret cannot be empty".to_string(),
            ));
        }

        Ok(Self { key, secret })
    }

    /// Get the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Build the stream authentication request.
    #[must_use]
    pub fn to_auth_request(&self) -> AuthRequest {
        AuthRequest::new(self.key.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credentials(key={})", self.key)
    }
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Current state of authentication on one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Auth request not sent yet.
    #[default]
    Pending,
    /// Auth request sent, awaiting response.
    Sent,
    /// Successfully authenticated.
    Authenticated,
    /// Server rejected the credentials.
    Failed,
}

/// Per-socket authentication state machine.
///
/// A fresh handler is used for every connection attempt.
#[derive(Debug)]
pub struct AuthHandler {
    credentials: Credentials,
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler for a new socket.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            state: AuthState::Pending,
        }
    }

    /// Get the current authentication state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Check if currently authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    /// Build the auth request and mark it sent.
    #[must_use]
    pub fn create_auth_request(&mut self) -> AuthRequest {
        self.state = AuthState::Sent;
        self.credentials.to_auth_request()
    }

    /// Process a success frame.
    ///
    /// Returns `true` when this frame completed authentication.
    pub const fn on_success(&mut self, msg: &SuccessMessage) -> bool {
        match msg.msg {
            SuccessKind::Authenticated if !self.is_authenticated() => {
                self.state = AuthState::Authenticated;
                true
            }
            _ => false,
        }
    }

    /// Process an error frame received before authentication completed.
    pub fn on_error(&mut self, msg: &ErrorMessage) -> AuthError {
        self.state = AuthState::Failed;
        AuthError::from(msg)
    }
}
