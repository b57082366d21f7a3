//! SQLite storage backend for link-relay.

use super::{InsertedLink, LinkStore, StoreLinkRequest};
use crate::error::StorageError;
use async_trait::async_trait;
use link_types::{Link, LinkId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

/// SQLite-based link storage.
///
/// Uses WAL mode. Every operation additionally runs under one coarse lock so
/// that inserts, deletes and queries are serialized process-wide; message
/// rates are bounded by human typing speed, so throughput is not a concern.
pub struct SqliteLinkStore {
    pool: SqlitePool,
    lock: Mutex<()>,
}

impl std::fmt::Debug for SqliteLinkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLinkStore").finish_non_exhaustive()
    }
}

impl SqliteLinkStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;

        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StorageError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self {
            pool,
            lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection, otherwise each pooled connection sees its own
        // empty in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self {
            pool,
            lock: Mutex::new(()),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                message TEXT NOT NULL,
                session_tag TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_receiver ON links(receiver)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl LinkStore for SqliteLinkStore {
    async fn insert(&self, req: StoreLinkRequest) -> Result<InsertedLink, StorageError> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query(
            r#"
            INSERT INTO links (sender, receiver, message, session_tag)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&req.sender)
        .bind(&req.receiver)
        .bind(&req.message)
        .bind(&req.session_tag)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(InsertedLink {
            id: LinkId::new(result.last_insert_rowid()),
            rows_affected: result.rows_affected(),
        })
    }

    async fn delete(&self, id: LinkId) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query("DELETE FROM links WHERE id = ?1")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_for_receiver(&self, id: LinkId, receiver: &str) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query("DELETE FROM links WHERE id = ?1 AND receiver = ?2")
            .bind(id.value())
            .bind(receiver)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn delete_all_for_receiver(&self, receiver: &str) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;

        let result = sqlx::query("DELETE FROM links WHERE receiver = ?1")
            .bind(receiver)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        receiver: &str,
        exclude_session_tag: &str,
    ) -> Result<Vec<Link>, StorageError> {
        let _guard = self.lock.lock().await;

        let rows = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, sender, receiver, message, session_tag
            FROM links
            WHERE receiver = ?1 AND session_tag != ?2
            ORDER BY id ASC
            "#,
        )
        .bind(receiver)
        .bind(exclude_session_tag)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(Link::from).collect())
    }

    async fn get(&self, id: LinkId) -> Result<Option<Link>, StorageError> {
        let _guard = self.lock.lock().await;

        let row = sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT id, sender, receiver, message, session_tag
            FROM links
            WHERE id = ?1
            "#,
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(row.map(Link::from))
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let _guard = self.lock.lock().await;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM links")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(count as u64)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct LinkRow {
    id: i64,
    sender: String,
    receiver: String,
    message: String,
    session_tag: String,
}

impl From<LinkRow> for Link {
    fn from(row: LinkRow) -> Self {
        Link {
            id: LinkId::new(row.id),
            sender: row.sender,
            receiver: row.receiver,
            message: row.message,
            session_tag: row.session_tag,
        }
    }
}
