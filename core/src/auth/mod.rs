//! Delegated write credential: session-scoped OAuth token with a fixed
//! one-hour lifetime.
//!
//! ```text
//! Absent --authenticate--> Valid(expiry) --now > expiry--> Expired
//! Expired --authenticate--> Valid(expiry)
//! ```
//!
//! Reads never need this token; every write path goes through
//! [`TokenLifecycleManager::ensure_valid`] first.

mod callback_server;
mod credential;
mod loopback;
mod manager;
mod pkce;

pub use callback_server::CallbackServer;
pub use credential::AuthToken;
pub use credential::CredentialProvider;
pub use credential::SessionCredentials;
pub use credential::TokenState;
pub use loopback::LoopbackConsentFlow;
pub use loopback::OAuthSettings;
pub use manager::TOKEN_LIFETIME_MS;
pub use manager::TokenLifecycleManager;

use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;

use crate::error::Result;

/// What an interactive consent flow hands back.
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedGrant {
    pub access_token: String,
    /// Lifetime reported by the identity provider, if any.
    pub expires_in_ms: Option<i64>,
}

impl std::fmt::Debug for DelegatedGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedGrant")
            .field("access_token", &"<redacted>")
            .field("expires_in_ms", &self.expires_in_ms)
            .finish()
    }
}

/// Interactive consent that yields a short-lived access token.
#[async_trait]
pub trait DelegatedAuthFlow: Send + Sync {
    async fn obtain(&self) -> Result<DelegatedGrant>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
