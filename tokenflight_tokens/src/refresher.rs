//! Obtaining new access tokens
//!
//! A [`TokenRefresher`] knows how to trade the current session for a fresh
//! access token. It does not store the token; the
//! [`TokenManager`][crate::TokenManager] does that once the refresh settles.

use std::{error, fmt, future::Future};

use async_trait::async_trait;

use crate::{
    backoff::{ErrorBackoffConfig, ErrorBackoffHandler, WithBackoff},
    AccessToken, AccessTokenRef, RefreshFailure,
};

#[cfg(feature = "endpoint")]
pub mod endpoint;

#[cfg(feature = "endpoint")]
pub use endpoint::EndpointRefresher;

/// A type-erased error reported by a refresher
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// A source of new access tokens
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Obtains a new access token
    ///
    /// `current` is the token held when the refresh started, if any.
    async fn refresh(&self, current: Option<&AccessTokenRef>) -> Result<AccessToken, BoxError>;
}

/// A refresher backed by an asynchronous closure
///
/// Constructed with [`refresher_fn()`].
pub struct FnRefresher<F> {
    f: F,
}

impl<F> fmt::Debug for FnRefresher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRefresher").finish_non_exhaustive()
    }
}

/// Uses an asynchronous closure as a [`TokenRefresher`]
///
/// ```
/// use tokenflight_tokens::{refresher::refresher_fn, AccessToken};
///
/// let refresher = refresher_fn(|| async {
///     Ok::<_, std::io::Error>(AccessToken::from_static("a.b.c"))
/// });
/// # drop(refresher);
/// ```
pub fn refresher_fn<F, Fut, E>(f: F) -> FnRefresher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AccessToken, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    FnRefresher { f }
}

#[async_trait]
impl<F, Fut, E> TokenRefresher for FnRefresher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<AccessToken, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    async fn refresh(&self, _current: Option<&AccessTokenRef>) -> Result<AccessToken, BoxError> {
        (self.f)().await.map_err(Into::into)
    }
}

/// A callback notified when a refresh fails definitively
///
/// Invoked exactly once per failed refresh operation, after the token has
/// been cleared, no matter how many callers were waiting on it. This is the
/// place to route the user back to a sign-in screen.
pub trait RefreshFailedHook: Send + Sync {
    /// Handles a failed refresh
    fn on_refresh_failed(&self, failure: &RefreshFailure);
}

impl<F> RefreshFailedHook for F
where
    F: Fn(&RefreshFailure) + Send + Sync,
{
    fn on_refresh_failed(&self, failure: &RefreshFailure) {
        self(failure)
    }
}

/// Retries a refresher with backoff before giving up
///
/// The refresh coordinator never retries on its own; wrap the refresher in
/// this type to make transient failures less likely to end the session.
#[derive(Debug)]
pub struct RetryingRefresher<R> {
    inner: R,
    backoff: ErrorBackoffConfig,
}

impl<R> RetryingRefresher<R> {
    /// Wraps `inner`, retrying according to `backoff`
    pub fn new(inner: R, backoff: ErrorBackoffConfig) -> Self {
        Self { inner, backoff }
    }
}

#[async_trait]
impl<R: TokenRefresher> TokenRefresher for RetryingRefresher<R> {
    async fn refresh(&self, current: Option<&AccessTokenRef>) -> Result<AccessToken, BoxError> {
        let mut handler = ErrorBackoffHandler::new(self.backoff);
        let mut attempt = 1u32;

        loop {
            match self.inner.refresh(current).await.with_backoff(&mut handler) {
                Ok(token) => return Ok(token),
                Err((error, Some(delay))) => {
                    tracing::warn!(
                        error = (error.as_ref() as &dyn error::Error),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "error refreshing token, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err((error, None)) => {
                    tracing::warn!(
                        error = (error.as_ref() as &dyn error::Error),
                        attempt,
                        "error refreshing token, giving up"
                    );
                    return Err(error);
                }
            }
        }
    }
}
