use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokenflight_clock::{Clock, DurationSecs, System};

use crate::{
    codec,
    coordinator::{Flight, RefreshCoordinator, Settler},
    jitter::{JitterSource, NullJitter},
    refresher::{RefreshFailedHook, TokenRefresher},
    scheduler::ProactiveScheduler,
    slots::{MemorySlot, TokenSlot},
    store::TokenStore,
    AccessToken, AccessTokenRef, RefreshFailure, TokenClaims, TokenClock, TokenStatus,
    DEFAULT_SKEW,
};

/// Timing configuration for token refreshes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshConfig {
    skew: DurationSecs,
    heartbeat: DurationSecs,
}

impl Default for RefreshConfig {
    /// Refreshes five minutes before expiry, re-checking the clock at least
    /// every 30 seconds while waiting
    fn default() -> Self {
        Self {
            skew: DEFAULT_SKEW,
            heartbeat: DurationSecs(30),
        }
    }
}

impl RefreshConfig {
    /// Refreshes tokens `skew` before they expire
    pub fn new(skew: DurationSecs) -> Self {
        Self {
            skew,
            ..Self::default()
        }
    }

    /// Re-checks the clock at least this often while waiting to refresh
    ///
    /// Values below one second are raised to one second.
    pub fn with_heartbeat(mut self, heartbeat: DurationSecs) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// How long before expiry a token is refreshed
    pub fn skew(&self) -> DurationSecs {
        self.skew
    }

    /// The longest single sleep while waiting to refresh
    pub fn heartbeat(&self) -> DurationSecs {
        self.heartbeat
    }
}

/// Owns the access token and everything that keeps it fresh
///
/// The manager bundles the [`TokenStore`], the single-flight refresh
/// coordinator, and the proactive scheduler. Clones share the same state;
/// independent managers never interact.
///
/// A Tokio runtime is required: refreshes and timers run as spawned tasks.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: TokenStore,
    coordinator: RefreshCoordinator,
    scheduler: ProactiveScheduler,
    lifetime: TokenClock,
    clock: Arc<dyn Clock + Send + Sync>,
    refresher: Arc<dyn TokenRefresher>,
    on_failure: Option<Box<dyn RefreshFailedHook>>,
    /// Bumped whenever a session starts or ends
    session: AtomicU64,
    /// Held while the session changes or a refresh result is stored
    transition: tokio::sync::Mutex<()>,
}

impl Inner {
    fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    fn begin_session(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.inner.store)
            .field("coordinator", &self.inner.coordinator)
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Starts building a manager that obtains new tokens from `refresher`
    pub fn builder(refresher: impl TokenRefresher + 'static) -> TokenManagerBuilder {
        TokenManagerBuilder::new(refresher)
    }

    /// The current access token, if any
    pub fn token(&self) -> Option<AccessToken> {
        self.inner.store.get()
    }

    /// The token store
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    /// The refresh coordinator, for diagnostics
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    /// The proactive scheduler, for diagnostics
    pub fn scheduler(&self) -> &ProactiveScheduler {
        &self.inner.scheduler
    }

    /// The lifetime arithmetic in use
    pub fn lifetime(&self) -> TokenClock {
        self.inner.lifetime
    }

    /// The advisory claims of the current token
    ///
    /// Returns `None` when there is no token or it cannot be decoded.
    pub fn claims(&self) -> Option<TokenClaims> {
        codec::decode(&self.token()?).ok()
    }

    /// The lifecycle status of the current token, if there is one
    pub fn status(&self) -> Option<TokenStatus> {
        self.token().map(|t| self.status_of(&t))
    }

    fn status_of(&self, token: &AccessTokenRef) -> TokenStatus {
        self.inner
            .lifetime
            .token_status(token, self.inner.clock.now())
    }

    /// Starts a session with a freshly issued token
    ///
    /// Stores the token and schedules its proactive refresh.
    pub async fn sign_in(&self, token: AccessToken) {
        let _transition = self.inner.transition.lock().await;
        self.inner.begin_session();
        self.inner.store.set(token.clone()).await;
        arm(&self.inner, &token);
        tracing::info!("signed in");
    }

    /// Ends the session
    ///
    /// Cancels any scheduled refresh and clears the token. A refresh already
    /// in flight still runs to completion and its waiters see the outcome,
    /// but the token it obtains is not stored.
    pub async fn sign_out(&self) {
        let _transition = self.inner.transition.lock().await;
        self.inner.begin_session();
        self.inner.scheduler.disarm();
        self.inner.store.clear().await;
        tracing::info!("signed out");
    }

    /// Resumes a session persisted by a previous run
    ///
    /// Returns the restored token, if there was one.
    pub async fn restore(&self) -> Option<AccessToken> {
        let _transition = self.inner.transition.lock().await;
        let token = self.inner.store.hydrate().await?;
        self.inner.begin_session();
        arm(&self.inner, &token);
        tracing::info!("restored persisted session");
        Some(token)
    }

    /// Obtains a new token, sharing any refresh already in flight
    ///
    /// Only one refresh runs at a time: callers arriving while one is
    /// outstanding wait for it and receive the same outcome. The refresh
    /// runs on its own task, so it completes even if every caller gives up
    /// waiting.
    pub async fn request_refresh(&self) -> Result<AccessToken, RefreshFailure> {
        let waiter = match self.inner.coordinator.join_or_lead() {
            Flight::Leader(settler, waiter) => {
                let session = self.inner.session();
                tokio::spawn(run_refresh(Arc::clone(&self.inner), settler, session));
                waiter
            }
            Flight::Follower(waiter) => {
                tracing::trace!("joining token refresh already in flight");
                waiter
            }
        };

        waiter.outcome().await
    }

    /// Gets a token fit to send with a request
    ///
    /// A token that has expired or is about to is refreshed first. Returns
    /// `None` when not signed in.
    pub async fn preflight(&self) -> Result<Option<AccessToken>, RefreshFailure> {
        let Some(token) = self.token() else {
            return Ok(None);
        };

        match self.status_of(&token) {
            TokenStatus::Fresh => Ok(Some(token)),
            status => {
                tracing::debug!(?status, "refreshing token before sending request");
                self.request_refresh().await.map(Some)
            }
        }
    }
}

async fn run_refresh(inner: Arc<Inner>, settler: Settler, session: u64) {
    let current = inner.store.get();
    tracing::debug!(has_token = current.is_some(), "refreshing access token");

    let result = inner.refresher.refresh(current.as_deref()).await;

    let transition = inner.transition.lock().await;
    if inner.session() != session {
        drop(transition);
        tracing::debug!("session changed while refreshing, discarding the result");
        let outcome = result.map_err(RefreshFailure::from_refresher);
        inner.coordinator.settle(settler, outcome);
        return;
    }

    let outcome = match result {
        Ok(token) => {
            inner.store.set(token.clone()).await;
            arm(&inner, &token);
            drop(transition);
            tracing::info!(
                token.expiry = codec::decode(&token)
                    .ok()
                    .and_then(|c| c.expiry())
                    .map(|e| e.0),
                "access token refreshed"
            );
            Ok(token)
        }
        Err(error) => {
            let failure = RefreshFailure::from_refresher(error);
            tracing::warn!(
                error = (&failure as &dyn std::error::Error),
                "token refresh failed, ending session"
            );
            inner.scheduler.disarm();
            inner.store.clear().await;
            drop(transition);
            if let Some(hook) = &inner.on_failure {
                hook.on_refresh_failed(&failure);
            }
            Err(failure)
        }
    };

    inner.coordinator.settle(settler, outcome);
}

fn arm(inner: &Arc<Inner>, token: &AccessTokenRef) {
    let weak = Arc::downgrade(inner);
    inner.scheduler.arm(token, async move {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        if let Err(failure) = (TokenManager { inner }).request_refresh().await {
            tracing::debug!(
                error = (&failure as &dyn std::error::Error),
                "proactive token refresh failed"
            );
        }
    });
}

/// Builds a [`TokenManager`]
pub struct TokenManagerBuilder {
    refresher: Arc<dyn TokenRefresher>,
    on_failure: Option<Box<dyn RefreshFailedHook>>,
    slot: Box<dyn TokenSlot>,
    clock: Arc<dyn Clock + Send + Sync>,
    config: RefreshConfig,
    jitter: Box<dyn JitterSource + Send>,
}

impl fmt::Debug for TokenManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManagerBuilder")
            .field("config", &self.config)
            .field("has_failure_hook", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

impl TokenManagerBuilder {
    fn new(refresher: impl TokenRefresher + 'static) -> Self {
        Self {
            refresher: Arc::new(refresher),
            on_failure: None,
            slot: Box::new(MemorySlot::new()),
            clock: Arc::new(System),
            config: RefreshConfig::default(),
            jitter: Box::new(NullJitter),
        }
    }

    /// Calls `hook` once for every refresh that fails definitively
    pub fn on_refresh_failed(mut self, hook: impl RefreshFailedHook + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    /// Persists the token to `slot` instead of keeping it only in memory
    pub fn with_slot(mut self, slot: impl TokenSlot + 'static) -> Self {
        self.slot = Box::new(slot);
        self
    }

    /// Tells time with `clock` instead of the system clock
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Uses the given refresh timing
    pub fn with_config(mut self, config: RefreshConfig) -> Self {
        self.config = config;
        self
    }

    /// Pulls scheduled refreshes earlier using `jitter`
    pub fn with_jitter(mut self, jitter: impl JitterSource + Send + 'static) -> Self {
        self.jitter = Box::new(jitter);
        self
    }

    /// Builds the manager
    ///
    /// Nothing is spawned until a token is signed in or restored.
    pub fn build(self) -> TokenManager {
        let lifetime = TokenClock::new(self.config.skew);
        TokenManager {
            inner: Arc::new(Inner {
                store: TokenStore::with_boxed_slot(self.slot),
                coordinator: RefreshCoordinator::new(),
                scheduler: ProactiveScheduler::new(
                    lifetime,
                    self.config.heartbeat,
                    Arc::clone(&self.clock),
                    self.jitter,
                ),
                lifetime,
                clock: self.clock,
                refresher: self.refresher,
                on_failure: self.on_failure,
                session: AtomicU64::new(0),
                transition: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use color_eyre::Result;
    use tokenflight_clock::{TokioClock, UnixTime};

    use super::*;
    use crate::{codec::encode_unsigned, refresher::refresher_fn};

    const T0: UnixTime = UnixTime(1_700_000_000);

    fn token_expiring_at(exp: UnixTime, jti: &str) -> AccessToken {
        encode_unsigned(
            &TokenClaims::new()
                .with_subject("user-1")
                .with_token_id(jti)
                .with_issued_at(exp - DurationSecs(3_600))
                .with_expiration(exp),
        )
        .unwrap()
    }

    /// A backend that issues tokens valid for an hour from the tokio clock
    #[derive(Clone)]
    struct Backend {
        clock: TokioClock,
        calls: Arc<AtomicUsize>,
        fail: bool,
        latency: Duration,
    }

    impl Backend {
        fn new() -> Self {
            Self {
                clock: TokioClock::starting_at(T0),
                calls: Arc::new(AtomicUsize::new(0)),
                fail: false,
                latency: Duration::from_millis(100),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn manager(&self) -> TokenManagerBuilder {
            let backend = self.clone();
            let refresher = refresher_fn(move || {
                let backend = backend.clone();
                async move {
                    let n = backend.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(backend.latency).await;
                    if backend.fail {
                        Err(io::Error::new(io::ErrorKind::PermissionDenied, "revoked"))
                    } else {
                        Ok(token_expiring_at(
                            backend.clock.now() + DurationSecs(3_600),
                            &format!("issued-{}", n),
                        ))
                    }
                }
            });

            TokenManager::builder(refresher).with_clock(self.clock)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_refresh() -> Result<()> {
        let backend = Backend::new();
        let manager = backend.manager().build();
        manager
            .sign_in(token_expiring_at(T0 + DurationSecs(200), "old"))
            .await;

        let tokens = futures_join_all((0..5).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.preflight().await })
        }))
        .await?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        assert_eq!(backend.calls(), 1);
        assert_eq!(manager.coordinator().refresh_count(), 1);
        let first = tokens[0].clone();
        assert!(first.is_some());
        assert!(tokens.iter().all(|t| *t == first));
        assert_eq!(manager.token(), first);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_refreshes_each_call_the_backend() -> Result<()> {
        let backend = Backend::new();
        let manager = backend.manager().build();

        let first = manager.request_refresh().await?;
        let second = manager.request_refresh().await?;

        assert_eq!(backend.calls(), 2);
        assert_ne!(first, second);
        assert_eq!(manager.token(), Some(second));
        assert!(!manager.coordinator().is_refreshing());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_tokens_skip_the_refresh() -> Result<()> {
        let backend = Backend::new();
        let manager = backend.manager().build();
        let token = token_expiring_at(T0 + DurationSecs(3_600), "fresh");
        manager.sign_in(token.clone()).await;

        assert_eq!(manager.status(), Some(TokenStatus::Fresh));
        assert_eq!(manager.preflight().await?, Some(token));
        assert_eq!(backend.calls(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn signed_out_preflight_has_no_token() -> Result<()> {
        let backend = Backend::new();
        let manager = backend.manager().build();

        assert_eq!(manager.preflight().await?, None);
        assert_eq!(backend.calls(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn claims_describe_the_current_token() {
        let backend = Backend::new();
        let manager = backend.manager().build();
        assert_eq!(manager.claims(), None);

        manager
            .sign_in(token_expiring_at(T0 + DurationSecs(3_600), "abc"))
            .await;

        let claims = manager.claims().unwrap();
        assert_eq!(claims.token_id().map(|j| j.as_str()), Some("abc"));
        assert_eq!(claims.expiry(), Some(T0 + DurationSecs(3_600)));
    }

    mod when_refresh_fails {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn every_waiter_sees_the_same_failure_and_the_hook_fires_once() -> Result<()> {
            let backend = Backend::failing();
            let hook_calls = Arc::new(AtomicUsize::new(0));
            let manager = backend
                .manager()
                .on_refresh_failed({
                    let hook_calls = Arc::clone(&hook_calls);
                    move |_: &RefreshFailure| {
                        hook_calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(3_600), "doomed"))
                .await;

            let outcomes = futures_join_all((0..5).map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.request_refresh().await })
            }))
            .await?;

            let failures: Vec<_> = outcomes.into_iter().map(|o| o.unwrap_err()).collect();
            assert!(failures.iter().all(|f| f.same_attempt(&failures[0])));
            assert_eq!(backend.calls(), 1);
            assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
            assert_eq!(manager.token(), None);
            assert_eq!(manager.scheduler().next_fire_at(), None);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn preflight_reports_the_failure() {
            let backend = Backend::failing();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(10), "stale"))
                .await;

            let failure = manager.preflight().await.unwrap_err();
            assert!(!failure.is_abandoned());
            assert_eq!(
                failure.refresher_error().map(ToString::to_string).as_deref(),
                Some("revoked")
            );
        }

        #[tokio::test(start_paused = true)]
        async fn a_panicking_refresher_releases_waiters() -> Result<()> {
            let manager = TokenManager::builder(refresher_fn(|| async {
                if true {
                    panic!("refresher blew up");
                }
                Ok::<_, io::Error>(AccessToken::from_static("unreachable"))
            }))
            .with_clock(TokioClock::starting_at(T0))
            .build();

            let failure = manager.request_refresh().await.unwrap_err();
            assert!(failure.is_abandoned());
            assert!(!manager.coordinator().is_refreshing());
            Ok(())
        }
    }

    mod when_scheduled {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn proactive_refresh_fires_skew_before_expiry() {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(600), "old"))
                .await;
            assert_eq!(
                manager.scheduler().next_fire_at(),
                Some(T0 + DurationSecs(300))
            );

            tokio::time::sleep(Duration::from_secs(299)).await;
            assert_eq!(backend.calls(), 0);

            tokio::time::sleep(Duration::from_secs(2)).await;
            assert_eq!(backend.calls(), 1);
            assert_eq!(
                manager
                    .claims()
                    .and_then(|c| c.token_id().map(|j| j.as_str().to_owned())),
                Some("issued-1".to_owned())
            );
        }

        #[tokio::test(start_paused = true)]
        async fn success_rearms_for_the_new_token() -> Result<()> {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(600), "old"))
                .await;

            tokio::time::sleep(Duration::from_secs(60)).await;
            let renewed = manager.request_refresh().await?;
            let new_exp = codec::decode(&renewed)?.expiry().unwrap();
            assert_eq!(
                manager.scheduler().next_fire_at(),
                Some(new_exp - DurationSecs(300))
            );

            // Well past the old timer, which must never fire
            tokio::time::sleep(Duration::from_secs(600)).await;
            assert_eq!(backend.calls(), 1);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn expired_token_refreshes_immediately() {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 - DurationSecs(5), "expired"))
                .await;

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(backend.calls(), 1);
            assert_eq!(manager.status(), Some(TokenStatus::Fresh));
        }

        #[tokio::test(start_paused = true)]
        async fn sign_out_cancels_the_timer() {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(600), "old"))
                .await;

            manager.sign_out().await;
            assert_eq!(manager.token(), None);
            assert_eq!(manager.scheduler().next_fire_at(), None);

            tokio::time::sleep(Duration::from_secs(1_000)).await;
            assert_eq!(backend.calls(), 0);
        }
        #[tokio::test(start_paused = true)]
        async fn fractional_expiry_is_scheduled_not_refreshed() {
            use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

            let backend = Backend::new();
            let manager = backend.manager().build();
            let payload = format!(r#"{{"sub":"u","exp":{}.0}}"#, (T0 + DurationSecs(3_600)).0);
            let token = AccessToken::new(format!("e30.{}.x", URL_SAFE_NO_PAD.encode(payload)));

            manager.sign_in(token).await;
            assert_eq!(manager.status(), Some(TokenStatus::Fresh));
            assert_eq!(
                manager.scheduler().next_fire_at(),
                Some(T0 + DurationSecs(3_300))
            );

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(backend.calls(), 0);
        }
    }

    mod when_session_changes_during_refresh {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn sign_out_discards_the_refreshed_token() -> Result<()> {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(3_600), "old"))
                .await;

            let refresh = tokio::spawn({
                let manager = manager.clone();
                async move { manager.request_refresh().await }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.sign_out().await;

            assert!(refresh.await?.is_ok());
            assert_eq!(backend.calls(), 1);
            assert_eq!(manager.token(), None);
            assert_eq!(manager.scheduler().next_fire_at(), None);

            tokio::time::sleep(Duration::from_secs(7_200)).await;
            assert_eq!(backend.calls(), 1);
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn newer_sign_in_is_not_overwritten() -> Result<()> {
            let backend = Backend::new();
            let manager = backend.manager().build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(3_600), "old"))
                .await;

            let refresh = tokio::spawn({
                let manager = manager.clone();
                async move { manager.request_refresh().await }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            let newer = token_expiring_at(T0 + DurationSecs(7_200), "newer");
            manager.sign_in(newer.clone()).await;

            assert!(refresh.await?.is_ok());
            assert_eq!(manager.token(), Some(newer));
            assert_eq!(
                manager.scheduler().next_fire_at(),
                Some(T0 + DurationSecs(6_900))
            );
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn failure_after_sign_out_skips_the_hook() -> Result<()> {
            let backend = Backend::failing();
            let hook_calls = Arc::new(AtomicUsize::new(0));
            let manager = backend
                .manager()
                .on_refresh_failed({
                    let hook_calls = Arc::clone(&hook_calls);
                    move |_: &RefreshFailure| {
                        hook_calls.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .build();
            manager
                .sign_in(token_expiring_at(T0 + DurationSecs(3_600), "old"))
                .await;

            let refresh = tokio::spawn({
                let manager = manager.clone();
                async move { manager.request_refresh().await }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.sign_out().await;

            assert!(refresh.await?.is_err());
            assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
            Ok(())
        }
    }

    mod when_persisted {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn restore_resumes_the_session() {
            let backend = Backend::new();
            let persisted = token_expiring_at(T0 + DurationSecs(1_200), "saved");
            let manager = backend
                .manager()
                .with_slot(MemorySlot::with_token(persisted.clone()))
                .build();

            assert_eq!(manager.token(), None);
            assert_eq!(manager.restore().await, Some(persisted.clone()));
            assert_eq!(manager.token(), Some(persisted));
            assert_eq!(
                manager.scheduler().next_fire_at(),
                Some(T0 + DurationSecs(900))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hook_sees_failures_in_order() -> Result<()> {
        let backend = Backend::failing();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = backend
            .manager()
            .on_refresh_failed({
                let seen = Arc::clone(&seen);
                move |f: &RefreshFailure| seen.lock().unwrap().push(f.clone())
            })
            .build();

        let a = manager.request_refresh().await.unwrap_err();
        let b = manager.request_refresh().await.unwrap_err();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].same_attempt(&a));
        assert!(seen[1].same_attempt(&b));
        assert!(!a.same_attempt(&b));
        Ok(())
    }

    async fn futures_join_all<T: Send + 'static>(
        handles: impl IntoIterator<Item = tokio::task::JoinHandle<T>>,
    ) -> Result<Vec<T>> {
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await?);
        }
        Ok(results)
    }
}
