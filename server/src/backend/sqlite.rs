use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use super::row::{insert_error, PasteRow};
use super::{Backend, BackendError};
use crate::paste::{Millis, Paste};

/// SQLite-backed [`Backend`].
///
/// Reads are one `UPDATE ... RETURNING` statement: the `WHERE` clause is the
/// liveness check and the `SET` clause the decrement, so SQLite's write lock
/// covers both.
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, BackendError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        // Every connection to an in-memory database gets its own database, so
        // keep exactly one and never let it be recycled.
        let pool_options = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(pool_size)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pastes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER,
                remaining_views INTEGER CHECK (remaining_views >= 0),
                max_views INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn insert(&self, paste: &Paste) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO pastes (id, content, created_at, expires_at, remaining_views, max_views)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&paste.id)
        .bind(&paste.content)
        .bind(paste.created_at)
        .bind(paste.expires_at)
        .bind(paste.remaining_views.map(i64::from))
        .bind(paste.max_views.map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(&paste.id, e))?;

        Ok(())
    }

    async fn consume_view(&self, id: &str, now: Millis) -> Result<Option<Paste>, BackendError> {
        // RETURNING sees the updated row; add the view back to report the
        // budget this read was served from.
        let row = sqlx::query_as::<_, PasteRow>(
            r#"
            UPDATE pastes
            SET remaining_views = remaining_views - 1
            WHERE id = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
              AND (remaining_views IS NULL OR remaining_views > 0)
            RETURNING id, content, created_at, expires_at,
                      remaining_views + 1 AS remaining_views, max_views
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Paste::try_from).transpose()?)
    }

    async fn sweep(&self, now: Millis) -> Result<u64, BackendError> {
        let result = sqlx::query(
            r#"
            DELETE FROM pastes
            WHERE (expires_at IS NOT NULL AND expires_at <= ?1)
               OR (remaining_views IS NOT NULL AND remaining_views <= 0)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

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

    async fn backend() -> SqliteBackend {
        SqliteBackend::connect("sqlite::memory:", 4).await.unwrap()
    }

    async fn stored_views(backend: &SqliteBackend, id: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT remaining_views FROM pastes WHERE id = ?1")
            .bind(id)
            .fetch_one(&backend.pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn read_returns_budget_before_decrement() {
        let backend = backend().await;
        backend.insert(&paste("a", None, Some(1))).await.unwrap();

        let seen = backend.consume_view("a", 0).await.unwrap().unwrap();
        assert_eq!(seen, paste("a", None, Some(1)));
        assert_eq!(stored_views(&backend, "a").await, Some(0));

        assert!(backend.consume_view("a", 0).await.unwrap().is_none());
        assert_eq!(stored_views(&backend, "a").await, Some(0));
    }

    #[tokio::test]
    async fn unlimited_rows_stay_null() {
        let backend = backend().await;
        backend.insert(&paste("a", Some(1_000), None)).await.unwrap();

        for _ in 0..5 {
            let seen = backend.consume_view("a", 10).await.unwrap().unwrap();
            assert_eq!(seen.remaining_views, None);
        }
        assert_eq!(stored_views(&backend, "a").await, None);
        assert!(backend.consume_view("a", 1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_reported() {
        let backend = backend().await;
        backend.insert(&paste("a", None, None)).await.unwrap();
        assert!(matches!(
            backend.insert(&paste("a", None, None)).await,
            Err(BackendError::DuplicateKey(id)) if id == "a"
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reads_share_the_budget() {
        let backend = Arc::new(backend().await);
        backend.insert(&paste("a", None, Some(2))).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let backend = Arc::clone(&backend);
            tasks.spawn(async move { backend.consume_view("a", 0).await.unwrap() });
        }

        let mut served = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap().is_some() {
                served += 1;
            }
        }
        assert_eq!(served, 2);
        assert_eq!(stored_views(&backend, "a").await, Some(0));
    }

    #[tokio::test]
    async fn sweep_and_ping() {
        let backend = backend().await;
        backend.insert(&paste("expired", Some(5), None)).await.unwrap();
        backend.insert(&paste("spent", None, Some(0))).await.unwrap();
        backend.insert(&paste("alive", Some(50), Some(2))).await.unwrap();

        assert_eq!(backend.sweep(10).await.unwrap(), 2);
        assert_eq!(stored_views(&backend, "alive").await, Some(2));
        backend.ping().await.unwrap();
    }
}
