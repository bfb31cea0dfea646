use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::row::{insert_error, PasteRow};
use super::{Backend, BackendError};
use crate::paste::{Millis, Paste};

/// PostgreSQL-backed [`Backend`].
///
/// The read path is a single `UPDATE ... RETURNING`; Postgres re-evaluates
/// the `WHERE` clause against the latest row version after waiting on a
/// concurrent writer's row lock, so two readers can never spend the same
/// view.
pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, BackendError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the `pastes` table if needed.
    pub async fn from_pool(pool: PgPool) -> Result<Self, BackendError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pastes (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                expires_at BIGINT,
                remaining_views BIGINT CHECK (remaining_views >= 0),
                max_views BIGINT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    async fn insert(&self, paste: &Paste) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO pastes (id, content, created_at, expires_at, remaining_views, max_views)
            VALUES ($1, $2, $3, $4, $5, $6)
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
            WHERE id = $1
              AND (expires_at IS NULL OR expires_at > $2)
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
            WHERE (expires_at IS NOT NULL AND expires_at <= $1)
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
