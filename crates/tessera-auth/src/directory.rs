//! Application directory collaborator.
//!
//! The engine never owns application registration data; it resolves it
//! through this narrow contract. A directory yields the application record,
//! its per-type token lifetimes, and the client registration (redirect URIs,
//! grant types, auth methods) needed to rebuild an authorization request.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::config::TokenDefaults;
use crate::session::AuthFlow;

/// A registered application (tenant-scoped OAuth client owner).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    /// Internal id.
    pub id: i32,
    /// Owning organization.
    pub org_id: i32,
    /// OAuth client identifier.
    pub client_id: String,
    /// The flow this application authenticates with.
    pub auth_flow: AuthFlow,
}

/// Per-application token settings.
///
/// Every field is optional; absent values fall back to the engine-wide
/// [`TokenDefaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSettings {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde::option")]
    pub auth_code_lifetime: Option<Duration>,
    /// Access token lifetime.
    #[serde(with = "humantime_serde::option")]
    pub access_token_lifetime: Option<Duration>,
    /// Refresh token lifetime.
    #[serde(with = "humantime_serde::option")]
    pub refresh_token_lifetime: Option<Duration>,
    /// Maximum accepted request transit time.
    #[serde(with = "humantime_serde::option")]
    pub max_request_transit_time: Option<Duration>,
}

impl TokenSettings {
    /// Resolves these settings against engine defaults.
    #[must_use]
    pub fn resolve(&self, defaults: &TokenDefaults) -> ResolvedTokenSettings {
        ResolvedTokenSettings {
            auth_code_lifetime: self.auth_code_lifetime.unwrap_or(defaults.auth_code_lifetime),
            access_token_lifetime: self
                .access_token_lifetime
                .unwrap_or(defaults.access_token_lifetime),
            refresh_token_lifetime: self
                .refresh_token_lifetime
                .unwrap_or(defaults.refresh_token_lifetime),
            max_request_transit_time: self
                .max_request_transit_time
                .unwrap_or(defaults.max_request_transit_time),
        }
    }
}

/// Token settings with every field resolved to a concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTokenSettings {
    /// Authorization code lifetime.
    pub auth_code_lifetime: Duration,
    /// Access token lifetime.
    pub access_token_lifetime: Duration,
    /// Refresh token lifetime.
    pub refresh_token_lifetime: Duration,
    /// Maximum accepted request transit time.
    pub max_request_transit_time: Duration,
}

/// Client authentication methods a registration permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// HTTP Basic with client secret.
    ClientSecretBasic,
    /// Client secret in the request body.
    ClientSecretPost,
    /// No client authentication (public client, PKCE-bound).
    None,
}

/// Grant types a registration permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization-code grant.
    AuthorizationCode,
    /// Client-credentials grant.
    ClientCredentials,
    /// Refresh-token grant.
    RefreshToken,
}

/// The client registration record for an application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    /// OAuth client identifier.
    pub client_id: String,
    /// Registered redirect URIs.
    pub redirect_uris: BTreeSet<String>,
    /// Permitted grant types.
    pub grant_types: BTreeSet<GrantType>,
    /// Permitted client authentication methods.
    pub auth_methods: Vec<AuthMethod>,
}

impl ClientRegistration {
    /// Resolves the registered redirect URI matching the one recorded at
    /// authorization time. Exact match only.
    #[must_use]
    pub fn resolve_redirect_uri(&self, recorded: &str) -> Option<&str> {
        self.redirect_uris
            .iter()
            .find(|uri| uri.as_str() == recorded)
            .map(String::as_str)
    }

    /// Returns `true` if the registration permits unauthenticated (public)
    /// clients.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.auth_methods.contains(&AuthMethod::None)
    }
}

/// Read-only directory of applications and their settings.
#[async_trait]
pub trait ApplicationDirectory: Send + Sync {
    /// Resolves an application by OAuth client id.
    async fn by_client_id(&self, client_id: &str) -> AuthResult<Option<Application>>;

    /// Resolves an application by internal id.
    async fn by_id(&self, id: i32) -> AuthResult<Option<Application>>;

    /// Resolves the token settings configured for an application.
    /// `None` means the application has no settings of its own.
    async fn token_settings(&self, org_id: i32, app_id: i32) -> AuthResult<Option<TokenSettings>>;

    /// Resolves the client registration record for an application.
    async fn client_registration(&self, app_id: i32) -> AuthResult<Option<ClientRegistration>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_resolve_falls_back_to_defaults() {
        let defaults = TokenDefaults::default();
        let settings = TokenSettings {
            access_token_lifetime: Some(Duration::from_secs(120)),
            ..TokenSettings::default()
        };
        let resolved = settings.resolve(&defaults);
        assert_eq!(resolved.access_token_lifetime, Duration::from_secs(120));
        assert_eq!(resolved.auth_code_lifetime, defaults.auth_code_lifetime);
        assert_eq!(
            resolved.max_request_transit_time,
            defaults.max_request_transit_time
        );
    }

    #[test]
    fn test_grant_type_set_membership() {
        let grant_types: BTreeSet<GrantType> = [
            GrantType::RefreshToken,
            GrantType::AuthorizationCode,
            GrantType::RefreshToken,
        ]
        .into_iter()
        .collect();
        assert_eq!(grant_types.len(), 2);
        assert!(grant_types.contains(&GrantType::AuthorizationCode));
        assert!(!grant_types.contains(&GrantType::ClientCredentials));
    }

    #[test]
    fn test_redirect_uri_exact_match_only() {
        let registration = ClientRegistration {
            client_id: "web".into(),
            redirect_uris: ["https://app.example.com/callback".to_string()]
                .into_iter()
                .collect(),
            grant_types: [GrantType::AuthorizationCode].into_iter().collect(),
            auth_methods: vec![AuthMethod::None],
        };

        assert_eq!(
            registration.resolve_redirect_uri("https://app.example.com/callback"),
            Some("https://app.example.com/callback")
        );
        // Substring containment is not good enough.
        assert_eq!(
            registration.resolve_redirect_uri("https://app.example.com"),
            None
        );
        assert_eq!(
            registration.resolve_redirect_uri("https://app.example.com/callback?x=1"),
            None
        );
    }
}
