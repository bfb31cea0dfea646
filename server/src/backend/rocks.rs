use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{IteratorMode, SingleThreaded, TransactionDB, WriteBatchWithTransaction};
use tokio::task;
use tracing::{debug, warn};

use super::{Backend, BackendError};
use crate::paste::{Millis, Paste};

/// Embedded [`Backend`] storing bincode-encoded pastes keyed by id.
///
/// Uses a pessimistic [`TransactionDB`]: `get_for_update` takes an exclusive
/// row lock, so the liveness check and the write back commit as one step and
/// concurrent readers of the same paste queue behind each other.
pub struct RocksBackend {
    db: Arc<TransactionDB>,
}

impl RocksBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();
        let db =
            task::spawn_blocking(move || TransactionDB::<SingleThreaded>::open_default(path))
                .await??;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Backend for RocksBackend {
    async fn insert(&self, paste: &Paste) -> Result<(), BackendError> {
        let db = Arc::clone(&self.db);
        let id = paste.id.clone();
        let value = bincode::serialize(paste)?;

        task::spawn_blocking(move || -> Result<(), BackendError> {
            let txn = db.transaction();
            if txn.get_for_update(&id, true)?.is_some() {
                return Err(BackendError::DuplicateKey(id));
            }
            txn.put(&id, value)?;
            txn.commit()?;
            Ok(())
        })
        .await?
    }

    async fn consume_view(&self, id: &str, now: Millis) -> Result<Option<Paste>, BackendError> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> Result<Option<Paste>, BackendError> {
            let txn = db.transaction();
            let Some(data) = txn.get_for_update(&id, true)? else {
                return Ok(None);
            };

            let paste: Paste = bincode::deserialize(&data)?;
            if !paste.is_alive(now) {
                // Dropping the transaction releases the lock without writing.
                return Ok(None);
            }

            if paste.remaining_views.is_some() {
                txn.put(&id, bincode::serialize(&paste.after_read())?)?;
            }
            txn.commit()?;
            Ok(Some(paste))
        })
        .await?
    }

    async fn sweep(&self, now: Millis) -> Result<u64, BackendError> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> Result<u64, BackendError> {
            let mut batch = WriteBatchWithTransaction::<true>::default();
            let mut deleted = 0;

            for item in db.iterator(IteratorMode::Start) {
                let (key, value) = item?;
                // Dead pastes never come back to life, so a blind delete
                // cannot race with a reader.
                match bincode::deserialize::<Paste>(&value) {
                    Ok(paste) if !paste.is_alive(now) => {
                        batch.delete(key);
                        deleted += 1;
                    }
                    Ok(_) => (),
                    Err(e) => warn!("Skipping undecodable paste during sweep: {}", e),
                }
            }

            if deleted > 0 {
                db.write(batch)?;
                debug!(deleted, "swept dead pastes from rocksdb");
            }
            Ok(deleted)
        })
        .await?
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || db.get(b"")).await??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paste(id: &str, expires_at: Option<Millis>, views: Option<u32>) -> Paste {
        Paste {
            id: id.to_string(),
            content: "hello".to_string(),
            created_at: 0,
            expires_at,
            remaining_views: views,
            max_views: views,
        }
    }

    fn stored(backend: &RocksBackend, id: &str) -> Option<Paste> {
        backend
            .db
            .get(id)
            .unwrap()
            .map(|data| bincode::deserialize(&data).unwrap())
    }

    #[tokio::test]
    async fn consumes_views_until_spent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).await.unwrap();
        backend.insert(&paste("a", None, Some(2))).await.unwrap();

        let first = backend.consume_view("a", 0).await.unwrap().unwrap();
        assert_eq!(first.remaining_views, Some(2));
        let second = backend.consume_view("a", 0).await.unwrap().unwrap();
        assert_eq!(second.remaining_views, Some(1));
        assert!(backend.consume_view("a", 0).await.unwrap().is_none());
        assert_eq!(stored(&backend, "a").unwrap().remaining_views, Some(0));
    }

    #[tokio::test]
    async fn rejects_duplicates_and_respects_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).await.unwrap();
        backend.insert(&paste("a", Some(1_000), None)).await.unwrap();

        assert!(matches!(
            backend.insert(&paste("a", None, None)).await,
            Err(BackendError::DuplicateKey(_))
        ));
        assert!(backend.consume_view("a", 999).await.unwrap().is_some());
        assert!(backend.consume_view("a", 1_000).await.unwrap().is_none());
        assert!(backend.consume_view("missing", 0).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_share_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(RocksBackend::open(dir.path()).await.unwrap());
        backend.insert(&paste("a", None, Some(3))).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { backend.consume_view("a", 0).await.unwrap() })
            })
            .collect();

        let mut served = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                served += 1;
            }
        }
        assert_eq!(served, 3);
        assert_eq!(stored(&backend, "a").unwrap().remaining_views, Some(0));
    }

    #[tokio::test]
    async fn sweep_deletes_dead_rows() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RocksBackend::open(dir.path()).await.unwrap();
        backend.insert(&paste("dead", Some(10), None)).await.unwrap();
        backend.insert(&paste("alive", None, Some(1))).await.unwrap();

        assert_eq!(backend.sweep(20).await.unwrap(), 1);
        assert!(stored(&backend, "dead").is_none());
        assert!(stored(&backend, "alive").is_some());
        backend.ping().await.unwrap();
    }
}
