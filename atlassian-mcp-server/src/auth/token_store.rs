//! Persistence of OAuth token state

use crate::auth::oauth::OAuthTokenState;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Storage for OAuth token state, keyed by account
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, account: &str) -> AtlassianMcpResult<Option<OAuthTokenState>>;

    async fn save(&self, account: &str, state: &OAuthTokenState) -> AtlassianMcpResult<()>;
}

/// On-disk record of one account
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    cloud_ids: Vec<String>,
}

impl From<&OAuthTokenState> for StoredTokens {
    fn from(state: &OAuthTokenState) -> Self {
        Self {
            access_token: state.access_token.expose_secret().to_string(),
            refresh_token: state.refresh_token.expose_secret().to_string(),
            expires_at: state.expires_at,
            cloud_ids: state.cloud_ids.clone(),
        }
    }
}

impl From<StoredTokens> for OAuthTokenState {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: SecretString::from(stored.refresh_token),
            expires_at: stored.expires_at,
            cloud_ids: stored.cloud_ids,
        }
    }
}

/// Stores each account as `oauth-<account>.json` in a directory
///
/// Writes go to a temporary file that is renamed over the target, so a
/// reader never sees a partially written record.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, account: &str) -> PathBuf {
        let safe: String = account
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("oauth-{}.json", safe))
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, account: &str) -> AtlassianMcpResult<Option<OAuthTokenState>> {
        let path = self.path_for(account);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AtlassianMcpError::internal(format!(
                    "Failed to read token file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let stored: StoredTokens = serde_json::from_str(&content).map_err(|e| {
            AtlassianMcpError::internal(format!(
                "Token file {} is corrupt: {}",
                path.display(),
                e
            ))
        })?;

        debug!("Loaded OAuth tokens from {}", path.display());
        Ok(Some(stored.into()))
    }

    async fn save(&self, account: &str, state: &OAuthTokenState) -> AtlassianMcpResult<()> {
        let io_error = |e: std::io::Error| {
            AtlassianMcpError::internal(format!("Failed to write OAuth tokens: {}", e))
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;

        let path = self.path_for(account);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(&StoredTokens::from(state))?;

        // Owner-only from creation; a leftover temp file is narrowed too
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await.map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_error)?;
        }
        file.write_all(&body).await.map_err(io_error)?;
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(io_error)?;

        debug!("Saved OAuth tokens to {}", path.display());
        Ok(())
    }
}

/// Process-local store, used when nothing should touch the disk
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: Mutex<HashMap<String, StoredTokens>>,
    saves: AtomicUsize,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self, account: &str) -> AtlassianMcpResult<Option<OAuthTokenState>> {
        let records = self
            .records
            .lock()
            .map_err(|_| AtlassianMcpError::internal("token store lock poisoned"))?;
        Ok(records.get(account).cloned().map(Into::into))
    }

    async fn save(&self, account: &str, state: &OAuthTokenState) -> AtlassianMcpResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AtlassianMcpError::internal("token store lock poisoned"))?;
        records.insert(account.to_string(), StoredTokens::from(state));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
