//! Durable homes for pastes.
//!
//! Every backend provides the same atomic "consume a view" primitive; it is
//! the only place where paste state is mutated after creation.

use std::sync::Arc;

use async_trait::async_trait;
use fleeting_common::Url;
use thiserror::Error;
use tracing::info;

use crate::paste::{Millis, Paste};

pub mod memory;
pub mod postgres;
pub mod rocks;
mod row;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;
pub use rocks::RocksBackend;
pub use sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("a paste with id {0} already exists")]
    DuplicateKey(String),
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("failed to encode paste: {0}")]
    Codec(#[from] bincode::Error),
    #[error("failed to join blocking task: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Stores a new paste. Fails with [`BackendError::DuplicateKey`] if the id
    /// is taken, dead or alive.
    async fn insert(&self, paste: &Paste) -> Result<(), BackendError>;

    /// Atomically checks that the paste is alive at `now` and, if so, takes
    /// one view from its budget.
    ///
    /// Returns the paste as it was before the read, or `None` without side
    /// effects if it is missing or dead. Implementations must not split the
    /// check and the write into separately observable steps.
    async fn consume_view(&self, id: &str, now: Millis) -> Result<Option<Paste>, BackendError>;

    /// Deletes pastes that are dead at `now`, returning how many were removed.
    async fn sweep(&self, now: Millis) -> Result<u64, BackendError>;

    /// Cheap round trip to check the backend is reachable.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Opens the backend named by a database url.
///
/// Accepted forms are `memory:`, `rocksdb:<path>`, `sqlite:<path>` and
/// `postgres://...`.
pub async fn open(url: &str, pool_size: u32) -> Result<Arc<dyn Backend>, BackendError> {
    let backend: Arc<dyn Backend> = if url == "memory:" {
        Arc::new(MemoryBackend::new())
    } else if let Some(path) = url.strip_prefix("rocksdb:") {
        Arc::new(RocksBackend::open(path).await?)
    } else if url.starts_with("sqlite:") {
        Arc::new(SqliteBackend::connect(url, pool_size).await?)
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Arc::new(PostgresBackend::connect(url, pool_size).await?)
    } else {
        return Err(BackendError::UnsupportedUrl(url.to_string()));
    };

    info!(url = %redact(url), "opened paste backend");
    Ok(backend)
}

/// Masks the password in a database url before it is logged.
fn redact(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    if url.password().is_none() || url.set_password(Some("***")).is_err() {
        return raw.to_string();
    }
    url.to_string()
}
