//! A file-backed token slot

use std::{collections::BTreeMap, io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{SlotError, TokenSlot, TOKEN_STORAGE_KEY};
use crate::{AccessToken, AccessTokenRef};

/// A token slot that uses a local JSON file
///
/// The file holds a JSON object mapping keys to stored strings. The token is
/// kept under a single key ([`TOKEN_STORAGE_KEY`] unless overridden), and
/// any other keys in the file are preserved on write.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
    key: String,
}

type Entries = BTreeMap<String, String>;

impl FileSlot {
    /// Constructs a new file slot
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            key: TOKEN_STORAGE_KEY.to_owned(),
        }
    }

    /// Stores the token under `key` instead of the default key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    async fn read_entries(&self) -> Result<Entries, SlotError> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(error) => return Err(error.into()),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        if data.trim().is_empty() {
            return Ok(Entries::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), SlotError> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(entries)?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenSlot for FileSlot {
    async fn load(&self) -> Result<Option<AccessToken>, SlotError> {
        let mut entries = self.read_entries().await?;
        Ok(entries.remove(&self.key).map(AccessToken::new))
    }

    async fn save(&self, token: &AccessTokenRef) -> Result<(), SlotError> {
        let mut entries = self.read_entries().await?;
        entries.insert(self.key.clone(), token.as_str().to_owned());
        self.write_entries(&entries).await
    }

    async fn remove(&self) -> Result<(), SlotError> {
        let mut entries = self.read_entries().await?;
        if entries.remove(&self.key).is_some() {
            self.write_entries(&entries).await?;
        }
        Ok(())
    }
}
