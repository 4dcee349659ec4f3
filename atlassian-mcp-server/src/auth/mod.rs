//! Authentication: per-request headers, credential resolution and OAuth
//! session management

pub mod credentials;
pub mod headers;
pub mod oauth;
pub mod token_client;
pub mod token_store;

pub use credentials::{
    resolve, AuthMethod, AuthenticatedCredential, Authorization, CredentialSecret,
    ResolvedCredential,
};
pub use headers::{RequestAuthHeaders, RequestAuthorization, CLOUD_ID_HEADER};
pub use oauth::{
    AccountStatus, OAuthSessionManager, OAuthTokenState, RefreshFailure, TokenEndpoint, TokenGrant,
};
pub use token_client::AtlassianTokenClient;
pub use token_store::{FileTokenStore, InMemoryTokenStore, TokenStore};
