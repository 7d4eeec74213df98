use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthToken {
    /// Valid up to and including the expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenState {
    Absent,
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
}

impl TokenState {
    pub fn of(token: Option<&AuthToken>, now: DateTime<Utc>) -> Self {
        match token {
            None => TokenState::Absent,
            Some(t) if t.is_valid_at(now) => TokenState::Valid {
                expires_at: t.expires_at,
            },
            Some(t) => TokenState::Expired {
                expired_at: t.expires_at,
            },
        }
    }
}

/// Where the session's delegated token lives.
pub trait CredentialProvider: Send + Sync {
    fn get(&self) -> Option<AuthToken>;

    fn set(&self, token: AuthToken);

    fn clear(&self);

    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.get().is_some_and(|t| t.is_valid_at(now))
    }
}

/// In-memory store that lives as long as the process. Nothing is persisted.
#[derive(Debug, Default)]
pub struct SessionCredentials {
    token: Mutex<Option<AuthToken>>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialProvider for SessionCredentials {
    fn get(&self) -> Option<AuthToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, token: AuthToken) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
