use std::{fmt, sync::Arc};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;

use crate::{
    slots::{MemorySlot, TokenSlot},
    AccessToken,
};

/// The single source of truth for the current access token
///
/// Reads never block and may happen from anywhere. Writes are serialized
/// and written through to a persistence [`TokenSlot`]; only the
/// [`TokenManager`][crate::TokenManager] writes to the store.
pub struct TokenStore {
    current: ArcSwapOption<AccessToken>,
    writes: Mutex<()>,
    slot: Box<dyn TokenSlot>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("current", &self.get())
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Constructs an empty store that only keeps the token in memory
    pub fn new() -> Self {
        Self::with_slot(MemorySlot::new())
    }

    /// Constructs an empty store that persists the token to `slot`
    pub fn with_slot(slot: impl TokenSlot + 'static) -> Self {
        Self::with_boxed_slot(Box::new(slot))
    }

    pub(crate) fn with_boxed_slot(slot: Box<dyn TokenSlot>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            writes: Mutex::new(()),
            slot,
        }
    }

    /// The current access token, if any
    pub fn get(&self) -> Option<AccessToken> {
        self.current.load_full().map(|t| (*t).clone())
    }

    /// Whether a token is currently held
    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }

    /// Replaces the current token and writes it through to the slot
    ///
    /// A slot failure is logged; the in-memory token is updated regardless.
    pub(crate) async fn set(&self, token: AccessToken) {
        let _guard = self.writes.lock().await;
        self.current.store(Some(Arc::new(token.clone())));

        if let Err(error) = self.slot.save(&token).await {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to persist access token"
            );
        }
    }

    /// Removes the current token from memory and from the slot
    pub(crate) async fn clear(&self) {
        let _guard = self.writes.lock().await;
        self.current.store(None);

        if let Err(error) = self.slot.remove().await {
            tracing::warn!(
                error = (&error as &dyn std::error::Error),
                "unable to remove persisted access token"
            );
        }
    }

    /// Loads a previously persisted token into memory
    ///
    /// Returns the loaded token. When the slot is empty or cannot be read,
    /// the in-memory token is left untouched.
    pub(crate) async fn hydrate(&self) -> Option<AccessToken> {
        let _guard = self.writes.lock().await;

        match self.slot.load().await {
            Ok(Some(token)) => {
                tracing::debug!("loaded persisted access token");
                self.current.store(Some(Arc::new(token.clone())));
                Some(token)
            }
            Ok(None) => {
                tracing::debug!("no persisted access token");
                None
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to load persisted access token"
                );
                None
            }
        }
    }
}
