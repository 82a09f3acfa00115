// Google OAuth2 infra layer.
// - `installed_flow.rs` runs the one-time browser consent for a user account.
// - `service_account.rs` signs JWT assertions for headless runs.
// - `token_cache.rs` persists the refresh token between runs.

use std::time::{Duration, SystemTime};

use serde::Deserialize;

use crate::core::auth::AuthError;

pub mod installed_flow;
pub mod service_account;
pub mod token_cache;

pub use installed_flow::InstalledFlowProvider;
pub use service_account::ServiceAccountProvider;
pub use token_cache::TokenCache;

/// Scopes the job needs: edit the spreadsheet, read the documents.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/documents.readonly",
];

/// Response from the OAuth2 token endpoint, shared by every grant type we
/// use. `refresh_token` and `scope` only appear on the authorization-code
/// grant.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// In-memory access token with its expiry instant.
pub struct CachedToken {
    pub token: String,
    pub expires_at: SystemTime,
}

impl CachedToken {
    pub fn from_response(response: &TokenResponse) -> Self {
        Self {
            token: response.access_token.clone(),
            // Shave a minute off so a token never expires mid-request.
            expires_at: SystemTime::now()
                + Duration::from_secs(response.expires_in.saturating_sub(60)),
        }
    }

    pub fn is_current(&self) -> bool {
        self.expires_at > SystemTime::now() + Duration::from_secs(60)
    }
}

/// Status check plus JSON decode for a token endpoint reply.
pub async fn read_token_response(response: reqwest::Response) -> Result<TokenResponse, AuthError> {
    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenExchange(format!(
            "token endpoint returned {}: {}",
            status, text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::TokenExchange(e.to_string()))
}
