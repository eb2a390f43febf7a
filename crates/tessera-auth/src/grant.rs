//! Protocol-level grant aggregates.
//!
//! A grant is reconstructed from four loosely related tables. Rather than a
//! builder with nullable fields, the row combinations that can legally exist
//! are expressed as the [`GrantTokens`] tagged union: a refresh token without
//! an access token, or a code stage without its PKCE context, cannot be
//! represented at all.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::directory::GrantType;
use crate::pkce::CodeChallengeMethod;
use crate::session::AuthFlow;

/// An issued access or refresh token with its timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Token value. Secret; never logged.
    pub value: String,
    /// Issuance timestamp.
    pub issued_at: OffsetDateTime,
    /// Expiration timestamp.
    pub expires_at: OffsetDateTime,
}

/// An issued authorization code with its timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCode {
    /// Code value. Secret; never logged.
    pub value: String,
    /// Issuance timestamp.
    pub issued_at: OffsetDateTime,
    /// Expiration timestamp.
    pub expires_at: OffsetDateTime,
}

/// The authorization-request context reconstructed for a code stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequestContext {
    /// OAuth client id the code was issued to.
    pub client_id: String,
    /// PKCE code challenge.
    pub code_challenge: String,
    /// PKCE challenge method.
    pub code_challenge_method: CodeChallengeMethod,
    /// Redirect URI, resolved against the client registration.
    pub redirect_uri: String,
}

/// The token set of a grant, tagged by stage/flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTokens {
    /// Authorization stage: a code has been issued, nothing exchanged yet.
    CodeOnly {
        /// The issued code.
        code: IssuedCode,
        /// The reconstructed authorization-request context.
        request: CodeRequestContext,
    },
    /// Code has been exchanged for tokens.
    Exchanged {
        /// Access token.
        access: IssuedToken,
        /// Refresh token, when the grant included one.
        refresh: Option<IssuedToken>,
    },
    /// Client-credentials grant.
    ClientCredentials {
        /// Access token.
        access: IssuedToken,
        /// Refresh token, when the registration allows one.
        refresh: Option<IssuedToken>,
    },
    /// Refresh-token grant.
    RefreshGrant {
        /// Access token.
        access: IssuedToken,
        /// Rotated refresh token, when issued.
        refresh: Option<IssuedToken>,
    },
}

impl GrantTokens {
    /// The access token, if this stage carries one.
    #[must_use]
    pub fn access_token(&self) -> Option<&IssuedToken> {
        match self {
            Self::CodeOnly { .. } => None,
            Self::Exchanged { access, .. }
            | Self::ClientCredentials { access, .. }
            | Self::RefreshGrant { access, .. } => Some(access),
        }
    }

    /// The refresh token, if this stage carries one.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&IssuedToken> {
        match self {
            Self::CodeOnly { .. } => None,
            Self::Exchanged { refresh, .. }
            | Self::ClientCredentials { refresh, .. }
            | Self::RefreshGrant { refresh, .. } => refresh.as_ref(),
        }
    }

    /// The authorization code, if this is the code stage.
    #[must_use]
    pub fn code(&self) -> Option<&IssuedCode> {
        match self {
            Self::CodeOnly { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// A reconstructed grant, bound to its session's principal and scopes.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Owning session.
    pub session_id: Uuid,
    /// Owning application (internal id).
    pub application_id: i32,
    /// OAuth client id.
    pub client_id: String,
    /// Authenticated principal.
    pub subject_id: String,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// The flow that created the session.
    pub auth_flow: AuthFlow,
    /// The reconstructed token set.
    pub tokens: GrantTokens,
}

// =============================================================================
// Save input
// =============================================================================

/// The code-stage portion of a draft grant.
#[derive(Debug, Clone)]
pub struct CodeDraft {
    /// The issued code value.
    pub value: String,
    /// PKCE code challenge from the authorization request.
    pub code_challenge: String,
    /// PKCE challenge method.
    pub code_challenge_method: CodeChallengeMethod,
    /// Redirect URI from the authorization request.
    pub redirect_uri: String,
}

/// The grant the protocol layer asks the engine to persist.
///
/// Which rows get written depends on [`GrantDraft::stage`].
#[derive(Debug, Clone)]
pub struct GrantDraft {
    /// OAuth client id.
    pub client_id: String,
    /// Grant type being processed.
    pub grant_type: GrantType,
    /// Authenticated principal.
    pub principal: String,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// Code portion, present for authorization-code grants.
    pub code: Option<CodeDraft>,
    /// Access token value, present once tokens are being minted.
    pub access_token: Option<String>,
    /// Refresh token value, when granted.
    pub refresh_token: Option<String>,
    /// Fingerprint of the authenticating client context.
    pub client_fingerprint: Option<Vec<u8>>,
}

/// The save stage a draft falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    /// Code requested, no access token yet.
    Authorization,
    /// Code grant, access token now being minted.
    Exchange,
    /// Client-credentials or refresh-token grant.
    Direct,
}

impl GrantDraft {
    /// Classifies the draft into its save stage.
    #[must_use]
    pub fn stage(&self) -> SaveStage {
        match self.grant_type {
            GrantType::AuthorizationCode if self.access_token.is_none() => SaveStage::Authorization,
            GrantType::AuthorizationCode => SaveStage::Exchange,
            GrantType::ClientCredentials | GrantType::RefreshToken => SaveStage::Direct,
        }
    }
}

/// Generates a fresh opaque credential value: 256 bits of CSPRNG output,
/// base64url-encoded without padding (43 characters).
#[must_use]
pub fn generate_opaque_value() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(grant_type: GrantType, access: Option<&str>) -> GrantDraft {
        GrantDraft {
            client_id: "web".into(),
            grant_type,
            principal: "alice".into(),
            scopes: BTreeSet::new(),
            code: None,
            access_token: access.map(Into::into),
            refresh_token: None,
            client_fingerprint: None,
        }
    }

    #[test]
    fn test_stage_classification() {
        assert_eq!(
            draft(GrantType::AuthorizationCode, None).stage(),
            SaveStage::Authorization
        );
        assert_eq!(
            draft(GrantType::AuthorizationCode, Some("at")).stage(),
            SaveStage::Exchange
        );
        assert_eq!(
            draft(GrantType::ClientCredentials, Some("at")).stage(),
            SaveStage::Direct
        );
        assert_eq!(
            draft(GrantType::RefreshToken, Some("at")).stage(),
            SaveStage::Direct
        );
    }

    #[test]
    fn test_generate_opaque_value() {
        let value = generate_opaque_value();
        assert_eq!(value.len(), 43);
        assert!(
            value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(value, generate_opaque_value());
    }

    #[test]
    fn test_grant_tokens_accessors() {
        let access = IssuedToken {
            value: "at".into(),
            issued_at: OffsetDateTime::now_utc(),
            expires_at: OffsetDateTime::now_utc(),
        };
        let tokens = GrantTokens::Exchanged {
            access: access.clone(),
            refresh: None,
        };
        assert_eq!(tokens.access_token(), Some(&access));
        assert!(tokens.refresh_token().is_none());
        assert!(tokens.code().is_none());
    }
}
