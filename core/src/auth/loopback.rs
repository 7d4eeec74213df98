//! Authorization-code + PKCE consent through the user's browser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;
use url::Url;

use super::CallbackServer;
use super::DelegatedAuthFlow;
use super::DelegatedGrant;
use super::pkce;
use crate::config::Secret;
use crate::error::Result;
use crate::error::SheetsError;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub callback_timeout_secs: u64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: vec![SHEETS_SCOPE.to_string()],
            callback_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

type UrlOpener = dyn Fn(&str) -> std::io::Result<()> + Send + Sync;

pub struct LoopbackConsentFlow {
    client: Client,
    settings: OAuthSettings,
    opener: Arc<UrlOpener>,
}

impl LoopbackConsentFlow {
    pub fn new(settings: OAuthSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
            opener: Arc::new(webbrowser::open),
        }
    }

    /// Replace the browser launcher, e.g. to drive the redirect headlessly.
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn authorization_url(&self, redirect_uri: &str, state: &str, verifier: &str) -> Result<String> {
        let challenge = pkce::code_challenge(verifier);
        let scope = self.settings.scopes.join(" ");
        let url = Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| SheetsError::AuthFailed(format!("invalid auth_url: {e}")))?;
        Ok(url.into())
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<DelegatedGrant> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.settings.client_id.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(secret) = &self.settings.client_secret {
            params.push(("client_secret", secret.expose()));
        }

        let response = self
            .client
            .post(&self.settings.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| SheetsError::AuthFailed(format!("token exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::AuthFailed(format!(
                "token exchange rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SheetsError::AuthFailed(format!("unreadable token response: {e}")))?;
        Ok(DelegatedGrant {
            access_token: token.access_token,
            expires_in_ms: token.expires_in.map(|secs| secs.saturating_mul(1000)),
        })
    }
}

#[async_trait]
impl DelegatedAuthFlow for LoopbackConsentFlow {
    async fn obtain(&self) -> Result<DelegatedGrant> {
        if self.settings.client_id.trim().is_empty() {
            return Err(SheetsError::AuthFailed(
                "oauth.client_id is not configured".to_string(),
            ));
        }

        let server = CallbackServer::bind().await?;
        let redirect_uri = server.redirect_uri();
        let verifier = pkce::code_verifier();
        let state = pkce::state_token();
        let url = self.authorization_url(&redirect_uri, &state, &verifier)?;

        info!(port = server.port(), "waiting for sheet write authorization");
        if let Err(err) = (self.opener)(&url) {
            warn!(%err, "could not open a browser; open this URL manually: {url}");
        }

        let timeout = Duration::from_secs(self.settings.callback_timeout_secs);
        let code = server.wait_for_code(&state, timeout).await?;
        self.exchange_code(&code, &verifier, &redirect_uri).await
    }
}
