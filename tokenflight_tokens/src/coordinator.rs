//! Single-flight coordination of token refreshes
//!
//! At most one refresh operation is outstanding at a time. The first caller
//! to ask for a refresh while the coordinator is idle becomes the _leader_
//! and is responsible for running the refresh and settling it. Anyone asking
//! while a refresh is outstanding becomes a _follower_ and waits on the same
//! outcome. Settling returns the coordinator to idle before the outcome is
//! published, so the next request always starts a fresh operation.

use std::{
    error,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

use crate::{refresher::BoxError, AccessToken};

/// The settled result of a refresh operation
pub type RefreshOutcome = Result<AccessToken, RefreshFailure>;

/// A refresh operation failed definitively
///
/// Every caller waiting on the same operation receives a clone of the same
/// failure; [`same_attempt()`][Self::same_attempt] can tell them apart from
/// failures of other operations.
#[derive(Clone, Debug, Error)]
#[error(transparent)]
pub struct RefreshFailure(Arc<FailureCause>);

#[derive(Debug, Error)]
enum FailureCause {
    #[error("token refresh failed")]
    Refresher(#[source] BoxError),
    #[error("token refresh was abandoned before it settled")]
    Abandoned,
}

impl RefreshFailure {
    pub(crate) fn from_refresher(error: BoxError) -> Self {
        Self(Arc::new(FailureCause::Refresher(error)))
    }

    pub(crate) fn abandoned() -> Self {
        Self(Arc::new(FailureCause::Abandoned))
    }

    /// Whether the refresh ended without ever reporting a result
    ///
    /// This happens when the task running the refresher panics or is
    /// torn down with the runtime.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.0, FailureCause::Abandoned)
    }

    /// Whether both failures came from the same refresh operation
    pub fn same_attempt(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The error reported by the refresher, if any
    pub fn refresher_error(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        match &*self.0 {
            FailureCause::Refresher(error) => Some(error.as_ref()),
            FailureCause::Abandoned => None,
        }
    }
}

type Outcome = watch::Receiver<Option<RefreshOutcome>>;

#[derive(Debug)]
enum RefreshState {
    Idle,
    Refreshing(Outcome),
}

/// How a caller takes part in a refresh
#[derive(Debug)]
pub(crate) enum Flight {
    /// No refresh was outstanding. The caller must run one and settle it.
    Leader(Settler, Waiter),
    /// A refresh is already outstanding
    Follower(Waiter),
}

/// The right, and obligation, to settle the outstanding refresh
///
/// Dropping a settler without settling releases every waiter with an
/// abandoned failure.
#[derive(Debug)]
pub(crate) struct Settler {
    tx: watch::Sender<Option<RefreshOutcome>>,
}

/// A handle on the outcome of an outstanding refresh
#[derive(Debug)]
pub(crate) struct Waiter {
    rx: Outcome,
}

impl Waiter {
    pub(crate) async fn outcome(mut self) -> RefreshOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(RefreshFailure::abandoned())),
            Err(_) => Err(RefreshFailure::abandoned()),
        }
    }
}

/// The refresh state machine: `Idle → Refreshing → Idle`
#[derive(Debug)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    started: AtomicU64,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    /// Constructs an idle coordinator
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            started: AtomicU64::new(0),
        }
    }

    /// Joins the outstanding refresh, or starts one if there is none
    pub(crate) fn join_or_lead(&self) -> Flight {
        let mut state = self.state.lock();

        if let RefreshState::Refreshing(rx) = &*state {
            // A leader that went away without settling leaves a closed
            // channel behind; treat it as idle
            if rx.has_changed().is_ok() {
                return Flight::Follower(Waiter { rx: rx.clone() });
            }

            tracing::debug!("previous refresh was abandoned, starting a new one");
        }

        let (tx, rx) = watch::channel(None);
        *state = RefreshState::Refreshing(rx.clone());
        let count = self.started.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(refresh.count = count, "starting token refresh");

        Flight::Leader(Settler { tx }, Waiter { rx })
    }

    /// Returns to idle, then publishes the outcome to every waiter
    pub(crate) fn settle(&self, settler: Settler, outcome: RefreshOutcome) {
        *self.state.lock() = RefreshState::Idle;
        settler.tx.send_replace(Some(outcome));
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        match &*self.state.lock() {
            RefreshState::Idle => false,
            RefreshState::Refreshing(rx) => rx.has_changed().is_ok(),
        }
    }

    /// The number of refresh operations started so far
    pub fn refresh_count(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }
}
