//! Client fingerprinting.
//!
//! A fingerprint is a SHA-256 digest over four request attributes the
//! legitimate client presents consistently across a session: the timezone
//! offset of its request datetime, its `Accept-Language`, its `User-Agent`,
//! and the host of its `Referer`. The digest is bound into the session at
//! token issuance and re-derived on later requests; a mismatch is a
//! security signal.

use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tracing::warn;
use url::Url;

use crate::AuthResult;
use crate::config::FingerprintConfig;
use crate::error::AuthError;

/// The request attributes a fingerprint is derived from.
///
/// Absent attributes contribute an empty string, so a client that never
/// sends `Referer` still fingerprints stably.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// Timezone offset of the declared request datetime.
    pub zone_offset: Option<UtcOffset>,
    /// `Accept-Language` header value.
    pub accept_language: Option<String>,
    /// `User-Agent` header value.
    pub user_agent: Option<String>,
    /// Host of the `Referer` header.
    pub referer_domain: Option<String>,
}

impl ClientFingerprint {
    /// Computes the SHA-256 digest of the canonical pre-image
    /// `"{zone_offset}:{accept_language}:{user_agent}:{referer_domain}"`.
    #[must_use]
    pub fn digest(&self) -> Vec<u8> {
        let zone = self
            .zone_offset
            .map(|offset| offset.to_string())
            .unwrap_or_default();
        let preimage = format!(
            "{}:{}:{}:{}",
            zone,
            self.accept_language.as_deref().unwrap_or_default(),
            self.user_agent.as_deref().unwrap_or_default(),
            self.referer_domain.as_deref().unwrap_or_default(),
        );
        Sha256::digest(preimage.as_bytes()).to_vec()
    }
}

/// Extracts the host from a `Referer` header value.
#[must_use]
pub fn parse_referer_host(referer: &str) -> Option<String> {
    Url::parse(referer)
        .ok()
        .and_then(|url| url.host_str().map(ToOwned::to_owned))
}

/// Extracts the timezone offset from an RFC 3339 request datetime.
#[must_use]
pub fn parse_zone_offset(datetime: &str) -> Option<UtcOffset> {
    OffsetDateTime::parse(datetime, &Rfc3339)
        .ok()
        .map(OffsetDateTime::offset)
}

/// Re-derives fingerprints from request context and compares them against
/// the digest bound at issuance.
#[derive(Debug, Clone)]
pub struct ClientFingerprintValidator {
    config: FingerprintConfig,
}

impl ClientFingerprintValidator {
    /// Creates a validator with the given configuration.
    #[must_use]
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Returns `true` when fingerprint binding is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns `true` for paths exempt from fingerprint checks. The token
    /// issuance namespace must stay reachable for a client that has no
    /// bound fingerprint yet.
    #[must_use]
    pub fn is_exempt_path(path: &str) -> bool {
        path == "/oauth2" || path.starts_with("/oauth2/")
    }

    /// Derives the effective fingerprint for a request, honoring the
    /// referer toggle.
    #[must_use]
    pub fn derive(&self, mut fingerprint: ClientFingerprint) -> Vec<u8> {
        if self.config.referer_disabled {
            fingerprint.referer_domain = None;
        }
        fingerprint.digest()
    }

    /// Compares a request's fingerprint against the digest bound at
    /// issuance. A session with no bound digest passes.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::FingerprintMismatch`] when the digests differ.
    pub fn verify(
        &self,
        bound: Option<&[u8]>,
        presented: ClientFingerprint,
    ) -> AuthResult<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(bound) = bound else {
            return Ok(());
        };
        if self.derive(presented) == bound {
            Ok(())
        } else {
            warn!("client fingerprint mismatch");
            Err(AuthError::FingerprintMismatch)
        }
    }
}
