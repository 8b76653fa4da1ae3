//! Persistence slots for the current access token
//!
//! A slot holds exactly one value: the bearer token, stored under a fixed
//! key so that it survives restarts of the application.

use async_trait::async_trait;
use std::io;
use thiserror::Error;

use crate::{AccessToken, AccessTokenRef};

#[cfg(feature = "file")]
pub mod file;
pub mod memory;

#[cfg(feature = "file")]
pub use file::FileSlot;
pub use memory::MemorySlot;

/// The key under which the access token is persisted
pub const TOKEN_STORAGE_KEY: &str = "auth_token";

/// An error while reading or writing a persistence slot
#[derive(Debug, Error)]
pub enum SlotError {
    /// The underlying storage could not be accessed
    #[error("unable to access token slot")]
    Io(#[from] io::Error),
    /// The stored data is not in the expected format
    #[error("token slot contents are malformed")]
    Format(#[from] serde_json::Error),
}

/// An asynchronous persistence slot for a single access token
#[async_trait]
pub trait TokenSlot: Send + Sync {
    /// Loads the persisted token, if any
    async fn load(&self) -> Result<Option<AccessToken>, SlotError>;

    /// Persists a token, replacing any previous value
    async fn save(&self, token: &AccessTokenRef) -> Result<(), SlotError>;

    /// Removes the persisted token
    async fn remove(&self) -> Result<(), SlotError>;
}
