use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Credential presented during the authentication handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredential {
    /// Bearer token sent to the server
    pub token: String,
    /// Expiry as unix seconds, `0` means the token never expires
    #[serde(default)]
    pub expiry: u64,
    /// Token used to obtain a fresh credential once this one expires
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl AuthCredential {
    /// Create a credential that never expires
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expiry: 0,
            refresh_token: None,
        }
    }

    /// Set the expiry (unix seconds)
    pub fn with_expiry(mut self, expiry: u64) -> Self {
        self.expiry = expiry;
        self
    }

    /// Set the refresh token
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

/// Trait for exchanging a refresh token for a new credential
///
/// Implement this trait to plug in whatever token service issues your
/// credentials. It is called from the client's I/O worker thread right
/// before the authentication handshake, so it may block.
///
/// # Example
/// ```ignore
/// struct StaticRefresher;
///
/// impl TokenRefresher for StaticRefresher {
///     fn refresh(&self, refresh_token: &str) -> Result<AuthCredential> {
///         Ok(AuthCredential::new(format!("renewed-{}", refresh_token)))
///     }
/// }
/// ```
pub trait TokenRefresher: Send + Sync {
    /// Exchange `refresh_token` for a new credential
    ///
    /// # Returns
    /// * `Ok(credential)` - The replacement credential
    /// * `Err(MeshError)` - Refresh failed, the handshake is aborted
    fn refresh(&self, refresh_token: &str) -> Result<AuthCredential>;
}

/// A refresher that never succeeds
///
/// Used when no token service is configured; an expired token then
/// surfaces as an authentication failure.
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh(&self, _refresh_token: &str) -> Result<AuthCredential> {
        Err(crate::error::MeshError::AuthenticationFailed(
            "token expired and no refresher is configured".into(),
        ))
    }
}
