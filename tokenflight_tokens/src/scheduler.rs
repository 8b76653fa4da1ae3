use std::{fmt, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokenflight_clock::{Clock, DurationSecs, UnixTime};
use tokio::task::JoinHandle;

use crate::{codec, jitter::JitterSource, AccessTokenRef, TokenClock};

/// How a token was armed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Arming {
    /// A timer will fire at the given time
    Scheduled(UnixTime),
    /// The token was unusable, so the refresh was triggered right away
    Immediate,
}

#[derive(Debug)]
struct Armed {
    fire_at: UnixTime,
    handle: JoinHandle<()>,
}

/// A one-shot timer that refreshes the token shortly before it expires
///
/// At most one timer is armed at a time. Arming always replaces the previous
/// timer, and dropping the scheduler cancels whatever is armed.
pub struct ProactiveScheduler {
    lifetime: TokenClock,
    heartbeat: DurationSecs,
    clock: Arc<dyn Clock + Send + Sync>,
    jitter: Mutex<Box<dyn JitterSource + Send>>,
    armed: Mutex<Option<Armed>>,
}

impl fmt::Debug for ProactiveScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProactiveScheduler")
            .field("lifetime", &self.lifetime)
            .field("heartbeat", &self.heartbeat)
            .field("next_fire_at", &self.next_fire_at())
            .finish_non_exhaustive()
    }
}

impl ProactiveScheduler {
    pub(crate) fn new(
        lifetime: TokenClock,
        heartbeat: DurationSecs,
        clock: Arc<dyn Clock + Send + Sync>,
        jitter: Box<dyn JitterSource + Send>,
    ) -> Self {
        Self {
            lifetime,
            heartbeat: heartbeat.max(DurationSecs(1)),
            clock,
            jitter: Mutex::new(jitter),
            armed: Mutex::new(None),
        }
    }

    /// Arms a timer that runs `fire` when `token` becomes due for renewal
    ///
    /// Any previously armed timer is cancelled first. A token that cannot be
    /// decoded or has already expired runs `fire` right away instead.
    pub(crate) fn arm<F>(&self, token: &AccessTokenRef, fire: F) -> Arming
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut armed = self.armed.lock();
        if let Some(previous) = armed.take() {
            previous.handle.abort();
        }

        let now = self.clock.now();
        let refresh_at = match codec::decode(token) {
            Ok(claims) if !self.lifetime.is_expired(&claims, now) => {
                self.lifetime.refresh_at(&claims)
            }
            Ok(_) => None,
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "unable to decode token for scheduling"
                );
                None
            }
        };

        let Some(refresh_at) = refresh_at else {
            tracing::debug!("token unusable, refreshing immediately");
            tokio::spawn(fire);
            return Arming::Immediate;
        };

        let fire_at = self.jitter.lock().jitter(refresh_at);
        tracing::debug!(
            fire_at = fire_at.0,
            delay = (fire_at - now).0,
            "scheduled proactive token refresh"
        );

        let clock = Arc::clone(&self.clock);
        let heartbeat = self.heartbeat;
        let handle = tokio::spawn(async move {
            sleep_until(clock.as_ref(), fire_at, heartbeat).await;
            tracing::debug!("proactive token refresh due");
            fire.await;
        });

        *armed = Some(Armed { fire_at, handle });
        Arming::Scheduled(fire_at)
    }

    /// Cancels the armed timer, if any
    pub(crate) fn disarm(&self) {
        if let Some(previous) = self.armed.lock().take() {
            tracing::trace!(fire_at = previous.fire_at.0, "disarming proactive refresh");
            previous.handle.abort();
        }
    }

    /// When the armed timer will fire, if one is pending
    pub fn next_fire_at(&self) -> Option<UnixTime> {
        self.armed
            .lock()
            .as_ref()
            .filter(|armed| !armed.handle.is_finished())
            .map(|armed| armed.fire_at)
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        if let Some(armed) = self.armed.get_mut().take() {
            armed.handle.abort();
        }
    }
}

/// Sleeps until the clock reads `until`
///
/// Timers do not advance while a host is suspended, so the sleep is taken in
/// slices of at most `heartbeat`, re-reading the clock after each one.
async fn sleep_until(clock: &(dyn Clock + Send + Sync), until: UnixTime, heartbeat: DurationSecs) {
    loop {
        let now = clock.now();
        if now >= until {
            break;
        }

        let remaining = until - now;
        let delay = remaining.min(heartbeat);
        tracing::trace!(
            delay = delay.0,
            remaining = remaining.0,
            "proactive refresh not yet due, sleeping…"
        );
        tokio::time::sleep(delay.into()).await;
    }
}
