//! An in-memory token slot

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{SlotError, TokenSlot};
use crate::{AccessToken, AccessTokenRef};

/// An in-memory token slot
///
/// Nothing survives the process. This is the default slot of a
/// [`TokenStore`][crate::TokenStore].
#[derive(Default, Debug)]
pub struct MemorySlot {
    token: Mutex<Option<AccessToken>>,
}

impl MemorySlot {
    /// Constructs a new, empty in-memory slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an in-memory slot already holding `token`
    pub fn with_token(token: AccessToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

#[async_trait]
impl TokenSlot for MemorySlot {
    async fn load(&self) -> Result<Option<AccessToken>, SlotError> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &AccessTokenRef) -> Result<(), SlotError> {
        *self.token.lock().await = Some(token.to_owned());
        Ok(())
    }

    async fn remove(&self) -> Result<(), SlotError> {
        self.token.lock().await.take();
        Ok(())
    }
}
