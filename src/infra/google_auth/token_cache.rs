use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::auth::AuthError;

/// Refresh token persisted after the first successful consent, so later
/// runs skip the browser round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub refresh_token: String,

    /// Scopes the token was granted for. A cached token that is missing a
    /// scope we now need forces a fresh consent instead of failing mid-run.
    pub scopes: Vec<String>,
}

impl StoredToken {
    pub fn covers(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Simple JSON file store for the cached refresh token.
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `None` when no token has been cached yet; that is the normal first
    /// run, not an error.
    pub async fn load(&self) -> Result<Option<StoredToken>, AuthError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))?;

        let token: StoredToken =
            serde_json::from_str(&text).map_err(|e| AuthError::Cache(e.to_string()))?;
        Ok(Some(token))
    }

    pub async fn save(&self, token: &StoredToken) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::Cache(e.to_string()))?;
        }

        let text =
            serde_json::to_string_pretty(token).map_err(|e| AuthError::Cache(e.to_string()))?;
        fs::write(&self.path, text)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))
    }

    /// Drop the cached token, forcing the next run through consent. Used
    /// when the identity provider rejects the refresh token.
    pub async fn clear(&self) -> Result<(), AuthError> {
        if !self.path.exists() {
            return Ok(());
        }
        fs::remove_file(&self.path)
            .await
            .map_err(|e| AuthError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_token() -> StoredToken {
        StoredToken {
            refresh_token: "1//refresh-me".to_string(),
            scopes: vec![
                "https://www.googleapis.com/auth/spreadsheets".to_string(),
                "https://www.googleapis.com/auth/documents.readonly".to_string(),
            ],
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));

        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));

        cache.save(&sample_token()).await.unwrap();
        let loaded = cache.load().await.unwrap().unwrap();

        assert_eq!(loaded.refresh_token, "1//refresh-me");
        assert_eq!(loaded.scopes.len(), 2);
    }

    #[tokio::test]
    async fn test_clear_removes_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("token.json"));

        cache.save(&sample_token()).await.unwrap();
        cache.clear().await.unwrap();

        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TokenCache::new(dir.path().join("state").join("token.json"));

        cache.save(&sample_token()).await.unwrap();

        assert!(cache.load().await.unwrap().is_some());
    }

    #[test]
    fn test_scope_coverage() {
        let token = sample_token();
        let both = token.scopes.clone();
        let extra = vec!["https://www.googleapis.com/auth/drive".to_string()];

        assert!(token.covers(&both));
        assert!(token.covers(&both[..1].to_vec()));
        assert!(!token.covers(&extra));
    }
}
