//! OAuth session management
//!
//! Owns the token state of every configured OAuth account and hands out
//! access tokens that are valid at call time. Refreshes are single-flight per
//! account: concurrent callers join one spawned refresh task and all observe
//! its outcome. The task is detached from any caller, so cancelling the call
//! that started it does not abort a refresh other callers are waiting on.

use crate::auth::token_store::TokenStore;
use crate::error::{AtlassianMcpError, AtlassianMcpResult};
use crate::masking::mask_secret;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::SecretString;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{OnceCell, RwLock as AsyncRwLock};
use tracing::{debug, error, info, instrument};

/// Refresh this long before the recorded expiry
pub const DEFAULT_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 3600;

/// Longest `expires_in` honoured; larger values are clamped
pub const MAX_TOKEN_LIFETIME_SECONDS: u64 = 365 * 24 * 3600;

/// Expiry of a token issued at `issued_at` that lives `expires_in` seconds
pub fn expiry_after(issued_at: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let lifetime = expires_in.min(MAX_TOKEN_LIFETIME_SECONDS) as i64;
    issued_at + Duration::seconds(lifetime)
}

/// Token state of one OAuth account
#[derive(Clone)]
pub struct OAuthTokenState {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    /// Cloud ids of the sites this account may access
    pub cloud_ids: Vec<String>,
}

impl OAuthTokenState {
    /// Whether the access token is expired or about to be
    pub fn needs_refresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at - margin <= now
    }
}

impl fmt::Debug for OAuthTokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokenState")
            .field("access_token", &mask_secret(&self.access_token))
            .field("refresh_token", &mask_secret(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("cloud_ids", &self.cloud_ids)
            .finish()
    }
}

/// Successful answer of the token endpoint
pub struct TokenGrant {
    pub access_token: SecretString,
    /// Rotated refresh token, if the endpoint issued one
    pub refresh_token: Option<SecretString>,
    pub expires_in: u64,
}

/// Why a refresh did not produce a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh token was rejected; terminal until re-authorization
    Rejected(String),
    /// Transport failure or timeout; retryable
    Network(String),
    /// No stored token state for the account
    NotAuthorized,
    /// The refresh task did not complete
    Aborted(String),
}

impl RefreshFailure {
    fn into_error(self, account: &str) -> AtlassianMcpError {
        match self {
            RefreshFailure::Rejected(reason) => {
                AtlassianMcpError::oauth_refresh_failed(account, reason)
            }
            RefreshFailure::Network(message) => AtlassianMcpError::network(format!(
                "OAuth token endpoint unreachable: {}",
                message
            )),
            RefreshFailure::NotAuthorized => AtlassianMcpError::oauth_refresh_failed(
                account,
                "authorization required: no stored OAuth tokens, run the OAuth setup flow",
            ),
            RefreshFailure::Aborted(message) => {
                AtlassianMcpError::internal(format!("OAuth refresh aborted: {}", message))
            }
        }
    }
}

/// The OAuth token endpoint
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant, RefreshFailure>;
}

/// Account status for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub account: String,
    pub authorized: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub cloud_ids: Vec<String>,
    pub revoked_reason: Option<String>,
    /// Set while the latest tokens exist only in memory
    pub persist_error: Option<String>,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<OAuthTokenState>, RefreshFailure>>>;

/// Per-account state
///
/// `generation` changes only under the `state` write lock, when the account
/// is re-authorized. A refresh commits its outcome only if the generation it
/// started from is still current.
struct AccountSession {
    account: String,
    state: AsyncRwLock<Option<Arc<OAuthTokenState>>>,
    generation: AtomicU64,
    loaded: OnceCell<()>,
    inflight: Mutex<Option<SharedRefresh>>,
    revoked: RwLock<Option<String>>,
    persist_error: RwLock<Option<String>>,
}

impl AccountSession {
    fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            state: AsyncRwLock::new(None),
            generation: AtomicU64::new(0),
            loaded: OnceCell::new(),
            inflight: Mutex::new(None),
            revoked: RwLock::new(None),
            persist_error: RwLock::new(None),
        }
    }

    async fn current(&self) -> Option<Arc<OAuthTokenState>> {
        self.state.read().await.clone()
    }

    /// Current state together with the generation it belongs to
    async fn current_with_generation(&self) -> (Option<Arc<OAuthTokenState>>, u64) {
        let state = self.state.read().await;
        (state.clone(), self.generation.load(Ordering::SeqCst))
    }

    fn persist_error(&self) -> Option<String> {
        self.persist_error.read().ok().and_then(|error| error.clone())
    }

    fn set_persist_error(&self, error: Option<String>) {
        if let Ok(mut slot) = self.persist_error.write() {
            *slot = error;
        }
    }

    fn revoked_reason(&self) -> Option<String> {
        self.revoked.read().ok().and_then(|reason| reason.clone())
    }

    fn mark_revoked(&self, reason: &str) {
        if let Ok(mut revoked) = self.revoked.write() {
            *revoked = Some(reason.to_string());
        }
    }

    fn clear_revoked(&self) {
        if let Ok(mut revoked) = self.revoked.write() {
            *revoked = None;
        }
    }

    fn clear_inflight(&self) {
        if let Ok(mut slot) = self.inflight.lock() {
            slot.take();
        }
    }
}

/// Manages OAuth token state for all configured accounts
pub struct OAuthSessionManager {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn TokenStore>,
    margin: Duration,
    sessions: DashMap<String, Arc<AccountSession>>,
}

impl OAuthSessionManager {
    /// Create a manager with the default 60 second refresh margin
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, store: Arc<dyn TokenStore>) -> Self {
        Self::with_margin(
            endpoint,
            store,
            Duration::seconds(DEFAULT_REFRESH_MARGIN_SECONDS),
        )
    }

    /// Create a manager with a custom refresh margin
    pub fn with_margin(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn TokenStore>,
        margin: Duration,
    ) -> Self {
        Self {
            endpoint,
            store,
            margin,
            sessions: DashMap::new(),
        }
    }

    fn session(&self, account: &str) -> Arc<AccountSession> {
        self.sessions
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(AccountSession::new(account)))
            .clone()
    }

    /// Load persisted state the first time an account is used
    async fn ensure_loaded(&self, session: &AccountSession) -> AtlassianMcpResult<()> {
        session
            .loaded
            .get_or_try_init(|| async {
                let stored = self.store.load(&session.account).await?;
                match &stored {
                    Some(state) => debug!(
                        account = session.account.as_str(),
                        expires_at = %state.expires_at,
                        "Loaded stored OAuth tokens"
                    ),
                    None => debug!(
                        account = session.account.as_str(),
                        "No stored OAuth tokens"
                    ),
                }
                let mut current = session.state.write().await;
                if current.is_none() {
                    *current = stored.map(Arc::new);
                }
                Ok::<(), AtlassianMcpError>(())
            })
            .await
            .map(|_| ())
    }

    /// Get an access token that is valid now, refreshing first if needed
    #[instrument(skip(self))]
    pub async fn get_valid_access_token(
        &self,
        account: &str,
    ) -> AtlassianMcpResult<Arc<OAuthTokenState>> {
        let session = self.session(account);
        self.ensure_loaded(&session).await?;

        if let Some(reason) = session.revoked_reason() {
            return Err(AtlassianMcpError::oauth_refresh_failed(account, reason));
        }

        match session.current().await {
            None => Err(RefreshFailure::NotAuthorized.into_error(account)),
            Some(state) if !state.needs_refresh(self.margin, Utc::now()) => Ok(state),
            Some(state) => {
                debug!(
                    account,
                    expires_at = %state.expires_at,
                    "Access token expires within the refresh margin"
                );
                self.refresh_shared(&session, false)
                    .await
                    .map_err(|failure| failure.into_error(account))
            }
        }
    }

    /// Force a refresh of an account's access token
    #[instrument(skip(self))]
    pub async fn refresh(&self, account: &str) -> AtlassianMcpResult<Arc<OAuthTokenState>> {
        let session = self.session(account);
        self.ensure_loaded(&session).await?;
        self.refresh_shared(&session, true)
            .await
            .map_err(|failure| failure.into_error(account))
    }

    /// Install freshly authorized token state for an account
    ///
    /// This is the hand-off from the interactive authorization flow and the
    /// only way to clear a revoked account. A refresh still in flight when
    /// this runs is discarded, whatever its outcome.
    #[instrument(skip(self, state))]
    pub async fn authorize(
        &self,
        account: &str,
        state: OAuthTokenState,
    ) -> AtlassianMcpResult<()> {
        let session = self.session(account);
        {
            let mut current = session.state.write().await;
            self.store.save(account, &state).await?;
            *current = Some(Arc::new(state));
            session.generation.fetch_add(1, Ordering::SeqCst);
            session.clear_revoked();
            session.set_persist_error(None);
        }
        let _ = session.loaded.set(());
        info!(account, "OAuth account authorized");
        Ok(())
    }

    /// Latest committed state of an account, without refreshing
    pub async fn snapshot(&self, account: &str) -> AtlassianMcpResult<Option<Arc<OAuthTokenState>>> {
        let session = self.session(account);
        self.ensure_loaded(&session).await?;
        Ok(session.current().await)
    }

    /// Diagnostic status of an account
    pub async fn account_status(&self, account: &str) -> AtlassianMcpResult<AccountStatus> {
        let session = self.session(account);
        self.ensure_loaded(&session).await?;
        let current = session.current().await;

        Ok(AccountStatus {
            account: account.to_string(),
            authorized: current.is_some(),
            expires_at: current.as_ref().map(|s| s.expires_at),
            cloud_ids: current.map(|s| s.cloud_ids.clone()).unwrap_or_default(),
            revoked_reason: session.revoked_reason(),
            persist_error: session.persist_error(),
        })
    }

    /// Join the in-flight refresh for an account or start one
    async fn refresh_shared(
        &self,
        session: &Arc<AccountSession>,
        force: bool,
    ) -> Result<Arc<OAuthTokenState>, RefreshFailure> {
        let shared = {
            let mut slot = session
                .inflight
                .lock()
                .map_err(|_| RefreshFailure::Aborted("refresh slot poisoned".to_string()))?;

            match slot.as_ref() {
                Some(inflight) => {
                    debug!(
                        account = session.account.as_str(),
                        "Joining in-flight OAuth refresh"
                    );
                    inflight.clone()
                }
                None => {
                    let task = tokio::spawn(run_refresh(
                        Arc::clone(session),
                        Arc::clone(&self.endpoint),
                        Arc::clone(&self.store),
                        self.margin,
                        force,
                    ));
                    let shared = async move {
                        task.await
                            .unwrap_or_else(|e| Err(RefreshFailure::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        shared.await
    }
}

/// Body of the spawned refresh task
async fn run_refresh(
    session: Arc<AccountSession>,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn TokenStore>,
    margin: Duration,
    force: bool,
) -> Result<Arc<OAuthTokenState>, RefreshFailure> {
    let result = perform_refresh(&session, endpoint.as_ref(), store.as_ref(), margin, force).await;
    session.clear_inflight();
    result
}

async fn perform_refresh(
    session: &AccountSession,
    endpoint: &dyn TokenEndpoint,
    store: &dyn TokenStore,
    margin: Duration,
    force: bool,
) -> Result<Arc<OAuthTokenState>, RefreshFailure> {
    if let Some(reason) = session.revoked_reason() {
        return Err(RefreshFailure::Rejected(reason));
    }

    let (current, generation) = session.current_with_generation().await;
    let current = current.ok_or(RefreshFailure::NotAuthorized)?;

    // A refresh that finished just before this task started already did the work
    if !force && !current.needs_refresh(margin, Utc::now()) {
        return Ok(current);
    }

    info!(
        account = session.account.as_str(),
        refresh_token = %mask_secret(&current.refresh_token),
        "Refreshing OAuth access token"
    );

    let outcome = endpoint.refresh(&current.refresh_token).await;

    let mut committed = session.state.write().await;
    if session.generation.load(Ordering::SeqCst) != generation {
        info!(
            account = session.account.as_str(),
            "Account was re-authorized during the refresh; discarding its result"
        );
        return committed.clone().ok_or(RefreshFailure::NotAuthorized);
    }

    let grant = match outcome {
        Ok(grant) => grant,
        Err(RefreshFailure::Rejected(reason)) => {
            error!(
                account = session.account.as_str(),
                reason = reason.as_str(),
                "OAuth refresh token rejected; re-authorization required"
            );
            session.mark_revoked(&reason);
            return Err(RefreshFailure::Rejected(reason));
        }
        Err(failure) => return Err(failure),
    };

    let refreshed = Arc::new(OAuthTokenState {
        access_token: grant.access_token,
        refresh_token: grant
            .refresh_token
            .unwrap_or_else(|| current.refresh_token.clone()),
        expires_at: expiry_after(Utc::now(), grant.expires_in),
        cloud_ids: current.cloud_ids.clone(),
    });

    match store.save(&session.account, &refreshed).await {
        Ok(()) => session.set_persist_error(None),
        Err(e) => {
            error!(
                account = session.account.as_str(),
                "Failed to persist refreshed OAuth tokens; they are held in memory only \
                 and the account must be re-authorized after a restart: {}",
                e
            );
            session.set_persist_error(Some(e.to_string()));
        }
    }

    *committed = Some(Arc::clone(&refreshed));

    info!(
        account = session.account.as_str(),
        expires_at = %refreshed.expires_at,
        "OAuth access token refreshed"
    );

    Ok(refreshed)
}
