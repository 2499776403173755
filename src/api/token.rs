//! Bearer token storage.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use secrecy::SecretString;

/// Tokens are valid for one hour from the moment they are issued.
pub const TOKEN_VALIDITY_SECS: i64 = 3600;

/// Refresh proactively once the token expires within this window.
pub const REFRESH_WINDOW_SECS: i64 = 600;

/// Access token with its computed expiry, persisted as one unit.
#[derive(Clone, Debug)]
pub struct StoredToken {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    /// Token issued now with the fixed validity.
    pub fn issued_now(access_token: SecretString) -> Self {
        Self {
            access_token,
            expires_at: Utc::now() + Duration::seconds(TOKEN_VALIDITY_SECS),
        }
    }

    /// Whether the token is expired or expires within the refresh window.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= Duration::seconds(REFRESH_WINDOW_SECS)
    }
}

/// Persistent storage for the API token.
///
/// The embedding platform owns persistence; the daemon uses
/// [`MemoryTokenStore`].
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Option<StoredToken>;
    fn save(&self, token: StoredToken);
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: StoredToken) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<StoredToken> {
        self.token.read().clone()
    }

    fn save(&self, token: StoredToken) {
        *self.token.write() = Some(token);
    }
}
