use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Backend, BackendError};
use crate::paste::{Millis, Paste};

/// In-memory [`Backend`] backed by a [`DashMap`].
///
/// Pastes are lost on restart. The shard write lock held by `get_mut` makes
/// the liveness check and the decrement a single step.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: DashMap<String, Paste>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn stored(&self, id: &str) -> Option<Paste> {
        self.data.get(id).map(|paste| paste.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn insert(&self, paste: &Paste) -> Result<(), BackendError> {
        match self.data.entry(paste.id.clone()) {
            Entry::Occupied(_) => Err(BackendError::DuplicateKey(paste.id.clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(paste.clone());
                Ok(())
            }
        }
    }

    async fn consume_view(&self, id: &str, now: Millis) -> Result<Option<Paste>, BackendError> {
        let Some(mut paste) = self.data.get_mut(id) else {
            return Ok(None);
        };

        if !paste.is_alive(now) {
            return Ok(None);
        }

        let before = paste.clone();
        *paste = before.after_read();
        Ok(Some(before))
    }

    async fn sweep(&self, now: Millis) -> Result<u64, BackendError> {
        let before = self.data.len();
        self.data.retain(|_, paste| paste.is_alive(now));
        Ok(before.saturating_sub(self.data.len()) as u64)
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
