use std::sync::Arc;

use chrono::TimeDelta;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::AuthToken;
use super::Clock;
use super::CredentialProvider;
use super::DelegatedAuthFlow;
use super::SystemClock;
use super::TokenState;
use crate::cancel::OrCancelExt;
use crate::error::Result;
use crate::error::SheetsError;

/// Upper bound on a delegated token's lifetime.
pub const TOKEN_LIFETIME_MS: i64 = 3_600_000;

/// Owns the write credential. Concurrent callers that find no valid token
/// share a single consent flow.
pub struct TokenLifecycleManager {
    credentials: Arc<dyn CredentialProvider>,
    flow: Arc<dyn DelegatedAuthFlow>,
    clock: Arc<dyn Clock>,
    consent: Mutex<()>,
}

impl TokenLifecycleManager {
    pub fn new(credentials: Arc<dyn CredentialProvider>, flow: Arc<dyn DelegatedAuthFlow>) -> Self {
        Self::with_clock(credentials, flow, Arc::new(SystemClock))
    }

    pub fn with_clock(
        credentials: Arc<dyn CredentialProvider>,
        flow: Arc<dyn DelegatedAuthFlow>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            flow,
            clock,
            consent: Mutex::new(()),
        }
    }

    pub fn state(&self) -> TokenState {
        TokenState::of(self.credentials.get().as_ref(), self.clock.now())
    }

    /// Run the consent flow unconditionally and store the new token.
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<AuthToken> {
        let _guard = self.consent.lock().or_cancel(cancel).await?;
        self.run_flow(cancel).await
    }

    /// Return a token valid right now, running consent only when needed.
    pub async fn ensure_valid(&self, cancel: &CancellationToken) -> Result<AuthToken> {
        if let Some(token) = self.current() {
            return Ok(token);
        }
        let _guard = self.consent.lock().or_cancel(cancel).await?;
        // Another caller may have finished consent while we waited.
        if let Some(token) = self.current() {
            debug!("reusing token obtained by a concurrent caller");
            return Ok(token);
        }
        self.run_flow(cancel).await
    }

    /// Drop the cached token, e.g. after the upstream rejected it.
    pub fn invalidate(&self) {
        warn!("discarding delegated write token");
        self.credentials.clear();
    }

    fn current(&self) -> Option<AuthToken> {
        self.credentials
            .get()
            .filter(|token| token.is_valid_at(self.clock.now()))
    }

    async fn run_flow(&self, cancel: &CancellationToken) -> Result<AuthToken> {
        let grant = match self.flow.obtain().or_cancel(cancel).await? {
            Ok(grant) => grant,
            Err(SheetsError::Cancelled) => return Err(SheetsError::Cancelled),
            Err(SheetsError::AuthFailed(msg)) => return Err(SheetsError::AuthFailed(msg)),
            Err(other) => return Err(SheetsError::AuthFailed(other.to_string())),
        };

        let lifetime_ms = grant
            .expires_in_ms
            .filter(|ms| *ms > 0)
            .map_or(TOKEN_LIFETIME_MS, |ms| ms.min(TOKEN_LIFETIME_MS));
        let token = AuthToken {
            value: grant.access_token,
            expires_at: self.clock.now() + TimeDelta::milliseconds(lifetime_ms),
        };
        info!(expires_at = %token.expires_at, "obtained delegated write token");
        self.credentials.set(token.clone());
        Ok(token)
    }
}
