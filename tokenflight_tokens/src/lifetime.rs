use tokenflight_clock::{Clock, DurationSecs, UnixTime};

use crate::{codec, AccessTokenRef, TokenClaims};

/// How long before expiry a token becomes due for renewal by default
pub const DEFAULT_SKEW: DurationSecs = DurationSecs(300);

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is valid and not yet due for renewal
    Fresh,
    /// The token is still valid, but should be renewed now
    RefreshSoon,
    /// The token is no longer valid, or could not be decoded
    Expired,
}

/// Lifetime arithmetic for tokens against a fixed renewal skew
///
/// All operations are pure functions of the claims and the provided time.
/// The `*_token` variants decode the token first and fail closed: a token
/// that cannot be decoded is expired, due for refresh, and has no time
/// remaining.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenClock {
    skew: DurationSecs,
}

impl Default for TokenClock {
    /// Uses a renewal skew of five minutes
    fn default() -> Self {
        Self::new(DEFAULT_SKEW)
    }
}

impl TokenClock {
    /// Constructs a token clock that renews tokens `skew` before they expire
    pub const fn new(skew: DurationSecs) -> Self {
        Self { skew }
    }

    /// The renewal skew
    #[inline]
    pub fn skew(&self) -> DurationSecs {
        self.skew
    }

    /// Whether the token has expired as of `now`
    ///
    /// Claims without an expiry are considered expired.
    #[inline]
    pub fn is_expired(&self, claims: &TokenClaims, now: UnixTime) -> bool {
        claims.expiry().map_or(true, |exp| exp <= now)
    }

    /// How much longer the token will be valid as of `now`
    #[inline]
    pub fn time_remaining(&self, claims: &TokenClaims, now: UnixTime) -> DurationSecs {
        claims.expiry().map_or(DurationSecs::ZERO, |exp| exp - now)
    }

    /// Whether the token is within the renewal skew of its expiry as of `now`
    #[inline]
    pub fn should_refresh_soon(&self, claims: &TokenClaims, now: UnixTime) -> bool {
        claims.expiry().map_or(true, |exp| exp < now + self.skew)
    }

    /// The time at which the token becomes due for renewal
    #[inline]
    pub fn refresh_at(&self, claims: &TokenClaims) -> Option<UnixTime> {
        claims.expiry().map(|exp| exp - self.skew)
    }

    /// Gets the token's lifecycle status as of `now`
    pub fn status(&self, claims: &TokenClaims, now: UnixTime) -> TokenStatus {
        if self.is_expired(claims, now) {
            TokenStatus::Expired
        } else if self.should_refresh_soon(claims, now) {
            TokenStatus::RefreshSoon
        } else {
            TokenStatus::Fresh
        }
    }

    /// Gets the token's lifecycle status as reported by the provided clock
    #[inline]
    pub fn status_with_clock<C: Clock + ?Sized>(
        &self,
        claims: &TokenClaims,
        clock: &C,
    ) -> TokenStatus {
        self.status(claims, clock.now())
    }

    /// Decodes the token and gets its lifecycle status as of `now`
    pub fn token_status(&self, token: &AccessTokenRef, now: UnixTime) -> TokenStatus {
        match codec::decode(token) {
            Ok(claims) => self.status(&claims, now),
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "unable to decode token, treating as expired"
                );
                TokenStatus::Expired
            }
        }
    }

    /// Decodes the token and checks whether it has expired as of `now`
    pub fn token_is_expired(&self, token: &AccessTokenRef, now: UnixTime) -> bool {
        codec::decode(token).map_or(true, |claims| self.is_expired(&claims, now))
    }

    /// Decodes the token and checks whether it is due for renewal as of `now`
    pub fn token_should_refresh_soon(&self, token: &AccessTokenRef, now: UnixTime) -> bool {
        codec::decode(token).map_or(true, |claims| self.should_refresh_soon(&claims, now))
    }

    /// Decodes the token and gets how much longer it will be valid as of `now`
    pub fn token_time_remaining(&self, token: &AccessTokenRef, now: UnixTime) -> DurationSecs {
        codec::decode(token).map_or(DurationSecs::ZERO, |claims| {
            self.time_remaining(&claims, now)
        })
    }
}
