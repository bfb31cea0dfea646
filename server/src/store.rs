use std::sync::Arc;

use fleeting_common::CreatePaste;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::backend::{Backend, BackendError};
use crate::paste::{Millis, NewPaste, Paste, ValidationError};
use crate::short_code::{Generator, ShortCode, SHORT_CODE_SIZE};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The paste never existed, ran out of views, or expired. Callers cannot
    /// tell these apart.
    #[error("paste not found or expired")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] BackendError),
}

/// The only path by which pastes are created or read.
///
/// Holds no state of its own beyond the shared backend handle; all
/// synchronization between concurrent readers happens inside the backend.
#[derive(Clone)]
pub struct PasteStore {
    backend: Arc<dyn Backend>,
}

impl PasteStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Validates and stores a new paste created at `now`.
    ///
    /// A freshly generated id that is already taken is an internal error; it
    /// is not retried.
    #[instrument(skip(self, request))]
    pub async fn create(&self, request: CreatePaste, now: Millis) -> Result<Paste, StoreError> {
        let draft = NewPaste::try_from(request)?;
        let code: ShortCode<SHORT_CODE_SIZE> = rand::thread_rng().sample(Generator);
        let paste = Paste::new(code.to_string(), draft, now)?;

        self.backend.insert(&paste).await?;
        debug!(id = %paste.id, "created paste");
        Ok(paste)
    }

    /// Reads a paste if it is alive at `now`, spending one view of its budget.
    ///
    /// The returned paste is the state this read was served from, before its
    /// own decrement.
    #[instrument(skip(self))]
    pub async fn read_and_expire(&self, id: &str, now: Millis) -> Result<Paste, StoreError> {
        // Nothing we hand out looks like this, so don't bother the backend.
        if id.parse::<ShortCode<SHORT_CODE_SIZE>>().is_err() {
            return Err(StoreError::NotFound);
        }

        self.backend
            .consume_view(id, now)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Physically deletes pastes that are dead at `now`.
    pub async fn sweep(&self, now: Millis) -> Result<u64, StoreError> {
        Ok(self.backend.sweep(now).await?)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.backend.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::MemoryBackend;

    const NOW: Millis = 1_700_000_000_000;

    fn store() -> (PasteStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (PasteStore::new(backend.clone()), backend)
    }

    fn request(body: serde_json::Value) -> CreatePaste {
        serde_json::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn round_trip() {
        let (store, backend) = store();
        let created = store
            .create(CreatePaste::new("hello").max_views(1), NOW)
            .await
            .unwrap();

        let read = store.read_and_expire(&created.id, NOW).await.unwrap();
        assert_eq!(read.content, "hello");
        assert_eq!(read.remaining_views, Some(1));
        assert_eq!(backend.stored(&created.id).unwrap().remaining_views, Some(0));
    }

    #[tokio::test]
    async fn death_is_permanent() {
        let (store, backend) = store();
        let created = store
            .create(CreatePaste::new("once").max_views(1), NOW)
            .await
            .unwrap();

        store.read_and_expire(&created.id, NOW).await.unwrap();
        for offset in 0..10 {
            assert!(matches!(
                store.read_and_expire(&created.id, NOW + offset).await,
                Err(StoreError::NotFound)
            ));
        }
        // Failed reads must not push the budget below zero.
        assert_eq!(backend.stored(&created.id).unwrap().remaining_views, Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn view_budget_is_conserved_under_concurrency() {
        let (store, _) = store();
        let created = store
            .create(CreatePaste::new("shared").max_views(2), NOW)
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let store = store.clone();
            let id = created.id.clone();
            tasks.spawn(async move { store.read_and_expire(&id, NOW).await });
        }

        let (mut served, mut missing) = (0, 0);
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(paste) => {
                    assert_eq!(paste.content, "shared");
                    served += 1;
                }
                Err(StoreError::NotFound) => missing += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((served, missing), (2, 3));
    }

    #[tokio::test]
    async fn expires_by_time() {
        let (store, _) = store();
        let created = store
            .create(CreatePaste::new("brief").ttl_seconds(1), NOW)
            .await
            .unwrap();
        assert_eq!(created.expires_at, Some(NOW + 1_000));

        assert!(store.read_and_expire(&created.id, NOW + 500).await.is_ok());
        assert!(matches!(
            store.read_and_expire(&created.id, NOW + 1_000).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.read_and_expire(&created.id, NOW + 1_500).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn unlimited_paste_survives_many_reads() {
        let (store, backend) = store();
        let created = store.create(CreatePaste::new("forever"), NOW).await.unwrap();
        assert_eq!(created.expires_at, None);
        assert_eq!(created.remaining_views, None);

        for i in 0..1000 {
            let read = store.read_and_expire(&created.id, NOW + i).await.unwrap();
            assert_eq!(read.content, "forever");
            assert_eq!(read.remaining_views, None);
        }
        assert_eq!(backend.stored(&created.id).unwrap(), created);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_backend() {
        let (store, backend) = store();
        let bad = [
            json!({ "content": "" }),
            json!({ "content": "x", "ttl_seconds": 0 }),
            json!({ "content": "x", "ttl_seconds": -1 }),
            json!({ "content": "x", "max_views": 1.5 }),
            json!({ "content": "x", "ttl_seconds": 9_000_000_000_000_000_u64 }),
        ];

        for body in bad {
            assert!(matches!(
                store.create(request(body), NOW).await,
                Err(StoreError::Validation(_))
            ));
        }
        assert_eq!(backend.sweep(i64::MAX).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids_are_not_found() {
        let (store, _) = store();
        for id in ["23456789CF", "short", "../../etc/passwd", ""] {
            assert!(matches!(
                store.read_and_expire(id, NOW).await,
                Err(StoreError::NotFound)
            ));
        }
    }

    #[tokio::test]
    async fn sweep_keeps_live_pastes_readable() {
        let (store, _) = store();
        let brief = store
            .create(CreatePaste::new("brief").ttl_seconds(1), NOW)
            .await
            .unwrap();
        let lasting = store
            .create(CreatePaste::new("lasting").ttl_seconds(60), NOW)
            .await
            .unwrap();

        assert_eq!(store.sweep(NOW + 2_000).await.unwrap(), 1);
        assert!(store.read_and_expire(&lasting.id, NOW + 2_000).await.is_ok());
        assert!(store.read_and_expire(&brief.id, NOW + 500).await.is_err());
    }
}
