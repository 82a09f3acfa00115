// Authorization port. The core never sees OAuth flows or key files - it only
// asks "give me a token that is valid right now". Infra providers decide
// whether that means reading a cache, refreshing, or walking the user
// through consent.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while producing an authorized session.
///
/// Every variant is fatal to the run: the job refuses to start row
/// processing without a usable token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials unavailable: {0}")]
    MissingCredentials(String),

    #[error("consent flow failed: {0}")]
    Consent(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("token cache error: {0}")]
    Cache(String),
}

/// A bearer token accepted by the document and spreadsheet services.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

// Debug never prints the raw token; these end up in error chains and logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Capability interface for credential acquisition.
///
/// Implementations persist whatever state they need (cached token file,
/// service-account key) and refresh transparently; callers just get a token
/// that is valid at the time of the call. Tests supply a fake returning a
/// canned token so nothing touches real credential storage.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, AuthError>;
}
