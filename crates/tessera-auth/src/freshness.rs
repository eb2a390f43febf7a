//! Request freshness validation.
//!
//! Guarded requests carry their creation time in the `x-request-datetime`
//! header (RFC 3339). A request is fresh when the distance between server
//! time and the declared time is within the application's transit-time
//! tolerance, in either direction. The boundary is inclusive.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::AuthResult;
use crate::directory::ResolvedTokenSettings;
use crate::error::AuthError;

/// Header carrying the request creation datetime.
pub const REQUEST_DATETIME_HEADER: &str = "x-request-datetime";

/// Source of the current time. Injected so tests can pin the clock.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Validates request datetimes against the transit-time tolerance.
pub struct RequestFreshnessValidator<C = SystemClock> {
    clock: C,
}

impl RequestFreshnessValidator<SystemClock> {
    /// Creates a validator on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl Default for RequestFreshnessValidator<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RequestFreshnessValidator<C> {
    /// Creates a validator on an explicit clock.
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Parses the declared datetime and checks it against the tolerance.
    ///
    /// # Errors
    ///
    /// - [`AuthError::FreshnessMissing`] when no datetime is declared.
    /// - [`AuthError::FreshnessStale`] when it is malformed or outside the
    ///   window. Malformed and stale collapse deliberately: the response
    ///   must not reveal which.
    pub fn validate(
        &self,
        declared: Option<&str>,
        settings: &ResolvedTokenSettings,
    ) -> AuthResult<OffsetDateTime> {
        let declared = declared.ok_or(AuthError::FreshnessMissing)?;
        let request_time = OffsetDateTime::parse(declared, &Rfc3339)
            .map_err(|_| AuthError::FreshnessStale)?;

        let distance = (self.clock.now() - request_time).abs();
        if distance <= settings.max_request_transit_time {
            Ok(request_time)
        } else {
            Err(AuthError::FreshnessStale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FixedClock(OffsetDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    fn settings() -> ResolvedTokenSettings {
        ResolvedTokenSettings {
            auth_code_lifetime: Duration::from_secs(600),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(86400),
            max_request_transit_time: Duration::from_secs(30),
        }
    }

    fn validator_at(now: &str) -> RequestFreshnessValidator<FixedClock> {
        let now = OffsetDateTime::parse(now, &Rfc3339).unwrap();
        RequestFreshnessValidator::with_clock(FixedClock(now))
    }

    #[test]
    fn test_missing_datetime() {
        let validator = validator_at("2026-08-26T12:00:00Z");
        assert!(matches!(
            validator.validate(None, &settings()),
            Err(AuthError::FreshnessMissing)
        ));
    }

    #[test]
    fn test_within_window_both_directions() {
        let validator = validator_at("2026-08-26T12:00:00Z");
        assert!(
            validator
                .validate(Some("2026-08-26T11:59:45Z"), &settings())
                .is_ok()
        );
        // Client clock slightly ahead of the server is fine too.
        assert!(
            validator
                .validate(Some("2026-08-26T12:00:10Z"), &settings())
                .is_ok()
        );
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let validator = validator_at("2026-08-26T12:00:00Z");
        assert!(
            validator
                .validate(Some("2026-08-26T11:59:30Z"), &settings())
                .is_ok()
        );
        assert!(matches!(
            validator.validate(Some("2026-08-26T11:59:29Z"), &settings()),
            Err(AuthError::FreshnessStale)
        ));
    }

    #[test]
    fn test_malformed_reads_as_stale() {
        let validator = validator_at("2026-08-26T12:00:00Z");
        assert!(matches!(
            validator.validate(Some("yesterday"), &settings()),
            Err(AuthError::FreshnessStale)
        ));
    }

    #[test]
    fn test_offset_datetimes_are_normalized() {
        let validator = validator_at("2026-08-26T12:00:00Z");
        assert!(
            validator
                .validate(Some("2026-08-26T14:00:10+02:00"), &settings())
                .is_ok()
        );
    }
}
