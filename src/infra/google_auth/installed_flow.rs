// One-time interactive consent for a user account, silent refreshes after.
//
// First run: bind an ephemeral loopback port, print the authorization URL,
// and wait for the identity provider to redirect the browser back with an
// authorization code. The code is exchanged for an access token plus a
// refresh token; the refresh token lands in the on-disk cache. Later runs
// exchange the cached refresh token directly, no browser involved.

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::core::auth::{AccessToken, AuthError, SessionProvider};
use crate::infra::google_auth::token_cache::{StoredToken, TokenCache};
use crate::infra::google_auth::{read_token_response, CachedToken, TokenResponse, SCOPES};

const CONSENT_OK_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
    <p>You can close this tab and return to the terminal.</p></body></html>";

const CONSENT_FAILED_PAGE: &str = "<html><body><h3>Authorization failed.</h3>\
    <p>Check the terminal for details.</p></body></html>";

const IGNORED_REQUEST_REPLY: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// The `credentials.json` downloaded from the cloud console. Desktop-app
/// credentials nest everything under an `installed` key.
#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    installed: AppCredentials,
}

#[derive(Debug, Clone, Deserialize)]
struct AppCredentials {
    client_id: String,
    client_secret: String,
    auth_uri: String,
    token_uri: String,
}

/// Session provider backed by a user account's one-time consent.
pub struct InstalledFlowProvider {
    app: AppCredentials,
    cache: TokenCache,
    client: Client,
    scopes: Vec<String>,
    session: RwLock<Option<CachedToken>>,
}

impl InstalledFlowProvider {
    pub async fn from_file(path: &str, cache: TokenCache) -> Result<Self, AuthError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::MissingCredentials(format!("{}: {}", path, e)))?;
        Self::from_json(&content, cache)
    }

    pub fn from_json(json: &str, cache: TokenCache) -> Result<Self, AuthError> {
        let file: CredentialsFile =
            serde_json::from_str(json).map_err(|e| AuthError::MissingCredentials(e.to_string()))?;
        Ok(Self {
            app: file.installed,
            cache,
            client: Client::new(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            session: RwLock::new(None),
        })
    }

    /// Silent refresh when the cache holds a usable refresh token,
    /// interactive consent otherwise.
    async fn authorize(&self) -> Result<TokenResponse, AuthError> {
        if let Some(stored) = self.cache.load().await? {
            if stored.covers(&self.scopes) {
                match self.refresh(&stored.refresh_token).await {
                    Ok(response) => return Ok(response),
                    Err(err) => {
                        warn!("stored refresh token was rejected, re-running consent: {}", err);
                        self.cache.clear().await?;
                    }
                }
            } else {
                info!("cached token is missing a required scope, re-running consent");
                self.cache.clear().await?;
            }
        }

        let response = self.run_consent().await?;

        let refresh_token = response.refresh_token.clone().ok_or_else(|| {
            AuthError::TokenExchange("identity provider granted no refresh token".to_string())
        })?;
        let scopes = match &response.scope {
            Some(granted) => granted.split_whitespace().map(|s| s.to_string()).collect(),
            None => self.scopes.clone(),
        };
        self.cache.save(&StoredToken { refresh_token, scopes }).await?;

        Ok(response)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        debug!("refreshing access token from the cached refresh token");
        let response = self
            .client
            .post(&self.app.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.app.client_id.as_str()),
                ("client_secret", self.app.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        read_token_response(response).await
    }

    /// Walk the user through the browser consent on a loopback redirect.
    /// Blocks until the identity provider redirects back to us.
    async fn run_consent(&self) -> Result<TokenResponse, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AuthError::Consent(format!("failed to bind loopback listener: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| AuthError::Consent(e.to_string()))?;
        let redirect_uri = format!("http://{}", addr);

        let state = consent_state();
        let scope = self.scopes.join(" ");
        let auth_url = Url::parse_with_params(
            &self.app.auth_uri,
            &[
                ("client_id", self.app.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state.as_str()),
                // offline + consent so the response carries a refresh token
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::Consent(e.to_string()))?;

        println!("Open this URL in your browser to authorize access:\n\n  {}\n", auth_url);
        info!("waiting for the authorization redirect on {}", redirect_uri);

        // Browsers also open preconnects that send nothing and request other
        // paths like /favicon.ico; none of those may consume the redirect.
        let (mut stream, request) = loop {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| AuthError::Consent(e.to_string()))?;

            let mut buf = vec![0u8; 8192];
            let read = match stream.read(&mut buf).await {
                Ok(n) => n,
                Err(_) => continue,
            };
            let request = String::from_utf8_lossy(&buf[..read]).into_owned();

            if carries_redirect_params(&request) {
                break (stream, request);
            }
            let _ = stream.write_all(IGNORED_REQUEST_REPLY.as_bytes()).await;
        };

        let outcome = authorization_code(&request, &state);
        let page = if outcome.is_ok() {
            CONSENT_OK_PAGE
        } else {
            CONSENT_FAILED_PAGE
        };
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n{}",
            page
        );
        // Best effort: the exchange below matters, the browser page does not.
        let _ = stream.write_all(reply.as_bytes()).await;

        let code = outcome?;
        info!("authorization code received, exchanging for tokens");
        self.exchange_code(&code, &redirect_uri).await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse, AuthError> {
        let response = self
            .client
            .post(&self.app.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.app.client_id.as_str()),
                ("client_secret", self.app.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        read_token_response(response).await
    }
}

#[async_trait]
impl SessionProvider for InstalledFlowProvider {
    async fn access_token(&self) -> Result<AccessToken, AuthError> {
        // Check if we have a valid cached token
        {
            let session = self.session.read().await;
            if let Some(token) = session.as_ref() {
                if token.is_current() {
                    return Ok(AccessToken::new(token.token.clone()));
                }
            }
        }

        let response = self.authorize().await?;
        let token = AccessToken::new(response.access_token.clone());

        {
            let mut session = self.session.write().await;
            *session = Some(CachedToken::from_response(&response));
        }

        Ok(token)
    }
}

/// Random value tying the redirect back to the URL we printed.
fn consent_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

/// Whether a request carries any of the query parameters the identity
/// provider sends on the redirect (`code`, `state`, or `error`).
fn carries_redirect_params(request: &str) -> bool {
    let target = match request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    {
        Some(target) => target,
        None => return false,
    };

    match Url::parse(&format!("http://localhost{}", target)) {
        Ok(url) => url
            .query_pairs()
            .any(|(key, _)| matches!(key.as_ref(), "code" | "state" | "error")),
        Err(_) => false,
    }
}

/// Pull the authorization code out of the redirect's request line.
///
/// The browser sends something like `GET /?state=..&code=.. HTTP/1.1`. The
/// identity provider percent-encodes the code, so the query goes through a
/// real URL parser rather than string splitting.
fn authorization_code(request: &str, expected_state: &str) -> Result<String, AuthError> {
    let line = request
        .lines()
        .next()
        .ok_or_else(|| AuthError::Consent("empty redirect request".to_string()))?;
    let target = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| AuthError::Consent(format!("malformed redirect request line: {}", line)))?;

    let url = Url::parse(&format!("http://localhost{}", target))
        .map_err(|e| AuthError::Consent(format!("unparseable redirect target: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut denial = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => denial = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(reason) = denial {
        return Err(AuthError::Consent(format!("authorization denied: {}", reason)));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::Consent("state mismatch in redirect".to_string()));
    }
    code.ok_or_else(|| AuthError::Consent("redirect carried no authorization code".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_code_percent_decoding() {
        let request =
            "GET /?state=abc123&code=4%2F0AeaLupN&scope=openid HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n";
        let code = authorization_code(request, "abc123").unwrap();
        assert_eq!(code, "4/0AeaLupN");
    }

    #[test]
    fn test_stray_requests_do_not_consume_the_redirect() {
        assert!(carries_redirect_params(
            "GET /?state=abc&code=4%2F0A HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n"
        ));
        assert!(carries_redirect_params(
            "GET /?error=access_denied&state=abc HTTP/1.1\r\n\r\n"
        ));

        // Preconnects deliver no bytes; favicon requests ask for other paths.
        assert!(!carries_redirect_params(""));
        assert!(!carries_redirect_params("GET /favicon.ico HTTP/1.1\r\n\r\n"));
        assert!(!carries_redirect_params("GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn test_state_mismatch_rejected() {
        let request = "GET /?state=evil&code=abc HTTP/1.1\r\n\r\n";
        let err = authorization_code(request, "expected").unwrap_err();
        assert!(err.to_string().contains("state mismatch"));
    }

    #[test]
    fn test_denial_reports_provider_reason() {
        let request = "GET /?error=access_denied&state=abc HTTP/1.1\r\n\r\n";
        let err = authorization_code(request, "abc").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_redirect_without_code_fails() {
        let request = "GET /?state=abc HTTP/1.1\r\n\r\n";
        assert!(authorization_code(request, "abc").is_err());
    }

    #[test]
    fn test_consent_states_fresh_and_url_safe() {
        let a = consent_state();
        let b = consent_state();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_credentials_file_parsing() {
        let json = serde_json::json!({
            "installed": {
                "client_id": "id.apps.googleusercontent.com",
                "project_id": "demo",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "client_secret": "shhh",
                "redirect_uris": ["http://localhost"]
            }
        });

        let file: CredentialsFile = serde_json::from_value(json).unwrap();
        assert_eq!(file.installed.client_id, "id.apps.googleusercontent.com");
        assert_eq!(file.installed.token_uri, "https://oauth2.googleapis.com/token");
    }
}
