//! Credential handling for the authentication handshake
//!
//! The manager owns the current [`AuthCredential`] and hands out the
//! `Bearer` header. Expired credentials are exchanged through the
//! configured [`TokenRefresher`] right before the header is produced, so a
//! reconnect after expiry re-authenticates with a fresh token.

use crate::error::{MeshError, Result};
use crate::traits::{AuthCredential, NoRefresh, TokenRefresher};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time before expiry at which a credential counts as expired
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

pub struct AuthManager {
    credential: AuthCredential,
    refresher: Arc<dyn TokenRefresher>,
    refresh_margin: Duration,
}

impl AuthManager {
    pub fn new(credential: AuthCredential) -> Self {
        Self {
            credential,
            refresher: Arc::new(NoRefresh),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = refresher;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn credential(&self) -> &AuthCredential {
        &self.credential
    }

    /// Whether the credential is expired (or within the refresh margin) at `now_secs`
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.credential.expiry != 0
            && now_secs.saturating_add(self.refresh_margin.as_secs()) >= self.credential.expiry
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp().max(0) as u64)
    }

    /// Header value for the handshake, refreshing first if needed
    pub fn auth_header(&mut self) -> Result<String> {
        if self.is_expired() {
            debug!("Credential expired, refreshing before handshake");
            self.refresh()?;
        }
        Ok(format!("Bearer {}", self.credential.token))
    }

    /// Exchange the refresh token for a new credential
    pub fn refresh(&mut self) -> Result<()> {
        let Some(refresh_token) = self.credential.refresh_token.clone() else {
            warn!("Credential needs refreshing but carries no refresh token");
            return Err(MeshError::AuthenticationFailed(
                "credential expired and no refresh token is available".into(),
            ));
        };

        let mut renewed = self.refresher.refresh(&refresh_token)?;
        if renewed.token.is_empty() {
            return Err(MeshError::AuthenticationFailed(
                "refresher returned an empty token".into(),
            ));
        }
        // Keep the old refresh token if the service did not rotate it
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }

        info!("Credential refreshed (expiry: {})", renewed.expiry);
        self.credential = renewed;
        Ok(())
    }
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("expiry", &self.credential.expiry)
            .field("has_refresh_token", &self.credential.refresh_token.is_some())
            .field("refresh_margin", &self.refresh_margin)
            .finish()
    }
}
