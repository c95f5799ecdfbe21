//! Data Services WebSocket Authentication
//!
//! Data Services streams authenticate during the WebSocket upgrade: the
//! already-issued bearer token travels in the `Sec-WebSocket-Protocol`
//! request header, next to a browser-like `User-Agent`. There is no
//! in-band auth message.
//!
//! # Authentication Flow
//!
//! 1. Build the upgrade request for the resolved endpoint URL
//! 2. Put the token in `Sec-WebSocket-Protocol`
//! 3. The server accepts the upgrade (echoing the protocol) or answers with
//!    HTTP 401/403
//!
//! # Error Mapping
//!
//! - 401, 403: authentication rejected (fatal, never retried)
//! - malformed URL: invalid endpoint (fatal)
//! - anything else: transient, handed to the reconnection policy

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};

use crate::application::ports::ConnectError;

// =============================================================================
// Constants
// =============================================================================

/// `User-Agent` sent with the upgrade request.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token is empty.
    #[error("credential cannot be empty")]
    EmptyCredential,

    /// Token cannot be carried in an HTTP header.
    #[error("credential contains characters not allowed in a header")]
    InvalidCredential,

    /// The server refused the upgrade.
    #[error("server rejected the credential with HTTP {status}")]
    Rejected {
        /// HTTP status returned by the server.
        status: u16,
    },
}

impl From<AuthError> for ConnectError {
    fn from(err: AuthError) -> Self {
        let status = match err {
            AuthError::Rejected { status } => Some(status),
            AuthError::EmptyCredential | AuthError::InvalidCredential => None,
        };
        Self::Auth {
            status,
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// Credential
// =============================================================================

/// Data Services bearer token.
///
/// Issuing the token is out of scope; this only carries it. `Debug` and
/// `Display` redact it for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Create a credential from an issued token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is blank or not a valid header value.
    pub fn new(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into().trim().to_string();

        if token.is_empty() {
            return Err(AuthError::EmptyCredential);
        }
        if HeaderValue::from_str(&token).is_err() {
            return Err(AuthError::InvalidCredential);
        }

        Ok(Self { token })
    }

    /// Get the token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Display for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({} chars)", self.token.len())
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Build the authenticated upgrade request for an endpoint.
///
/// # Errors
///
/// Returns `ConnectError::InvalidEndpoint` for a malformed URL and
/// `ConnectError::Auth` if the token cannot be sent.
pub fn handshake_request(url: &str, credential: &Credential) -> Result<Request, ConnectError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ConnectError::InvalidEndpoint(format!("{url}: {e}")))?;

    let protocol =
        HeaderValue::from_str(credential.token()).map_err(|_| AuthError::InvalidCredential)?;

    let headers = request.headers_mut();
    headers.insert(header::SEC_WEBSOCKET_PROTOCOL, protocol);
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

    Ok(request)
}

/// Classify a failed upgrade.
#[must_use]
pub fn classify_handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                AuthError::Rejected { status }.into()
            } else {
                ConnectError::Transient(format!("upgrade refused with HTTP {status}"))
            }
        }
        tungstenite::Error::Url(e) => ConnectError::InvalidEndpoint(e.to_string()),
        other => ConnectError::Transient(other.to_string()),
    }
}
