//! Access token management for the Personalize API.
//!
//! A single token slot is shared by every request. The statically configured
//! access token is used until it is rejected or a refreshed token expires; at
//! that point the refresh token is exchanged for a new one. The slot is
//! guarded by an async mutex held across the refresh call, so concurrent
//! callers wait for the in-flight refresh and then reuse its result.

use crate::config::OAuthCredentials;
use crate::metrics_defs::{TOKEN_REFRESH, TOKEN_REFRESH_FAILURE};
use crate::types::AccessToken;
use crate::upstream::send_json;
use serde::Deserialize;
use shared::counter;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// Used when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

struct CachedToken {
    token: AccessToken,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

struct TokenState {
    cached: Option<CachedToken>,
    // The token endpoint may rotate the refresh token on every exchange.
    refresh_token: Option<String>,
}

pub struct TokenManager {
    client: reqwest::Client,
    token_url: String,
    static_token: AccessToken,
    client_credentials: Option<(String, String)>,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(
        client: reqwest::Client,
        token_url: &url::Url,
        access_token: &str,
        oauth: Option<OAuthCredentials>,
    ) -> Self {
        let (client_credentials, refresh_token) = match oauth {
            Some(oauth) => (
                Some((oauth.client_id, oauth.client_secret)),
                Some(oauth.refresh_token),
            ),
            None => (None, None),
        };

        TokenManager {
            client,
            token_url: token_url.to_string(),
            static_token: AccessToken::new(access_token),
            client_credentials,
            state: Mutex::new(TokenState {
                cached: None,
                refresh_token,
            }),
        }
    }

    /// Returns the token to authorize the next Personalize call with.
    ///
    /// Never fails: when no refreshed token is available the static token is
    /// returned and any rejection surfaces from the downstream call.
    pub async fn access_token(&self) -> AccessToken {
        let mut state = self.state.lock().await;
        match &state.cached {
            None => return self.static_token.clone(),
            Some(cached) if cached.is_valid() => return cached.token.clone(),
            Some(_) => {}
        }
        self.refresh(&mut state).await
    }

    /// Refreshes after `rejected` was refused upstream, unless another caller
    /// already replaced it with a token that is still valid.
    pub async fn force_refresh(&self, rejected: &AccessToken) -> AccessToken {
        let mut state = self.state.lock().await;
        if let Some(cached) = &state.cached
            && cached.token != *rejected
            && cached.is_valid()
        {
            return cached.token.clone();
        }
        self.refresh(&mut state).await
    }

    async fn refresh(&self, state: &mut TokenState) -> AccessToken {
        let (Some((client_id, client_secret)), Some(refresh_token)) =
            (&self.client_credentials, state.refresh_token.as_deref())
        else {
            tracing::debug!("no OAuth credentials configured, using static access token");
            return self.static_token.clone();
        };

        counter!(TOKEN_REFRESH).increment(1);
        let issued_at = Instant::now();
        let request = self.client.post(&self.token_url).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token),
        ]);

        match send_json::<TokenResponse>(request, "oauth token").await {
            Ok(response) => {
                let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
                let token = AccessToken::new(response.access_token);
                state.cached = Some(CachedToken {
                    token: token.clone(),
                    expires_at: issued_at + Duration::from_secs(expires_in),
                });
                if let Some(rotated) = response.refresh_token {
                    state.refresh_token = Some(rotated);
                }
                tracing::info!(expires_in, "refreshed Personalize access token");
                token
            }
            Err(err) => {
                counter!(TOKEN_REFRESH_FAILURE).increment(1);
                tracing::warn!(error = %err, "token refresh failed, falling back to static access token");
                // Drop the expired entry so later calls use the static token
                // instead of hammering the token endpoint.
                state.cached = None;
                self.static_token.clone()
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn seed(&self, token: &str, expires_at: Instant) {
        self.state.lock().await.cached = Some(CachedToken {
            token: AccessToken::new(token),
            expires_at,
        });
    }
}
