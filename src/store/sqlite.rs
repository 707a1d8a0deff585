// src/store/sqlite.rs

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::{StoreError, StoreResult};
use crate::store::retry::RetryPolicy;
use crate::store::{ProgressPoint, Store};
use crate::types::{TriggerType, UploadStatus};
use crate::upload::record::{NewUpload, ProtocolData, UploadPatch, UploadRecord};

const UPLOAD_COLUMNS: &str = "id, node_name, protocol, node_type, started_at, completed_at, \
     status, trigger_type, protocol_data, progress_percent, chunks_completed, chunks_total, \
     last_progress_check, total_chunks, completion_message, error_message";

/// SQLite-backed [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl SqliteStore {
    /// Open (or create) a file-backed database.
    pub async fn open<P: AsRef<Path>>(path: P, retry: RetryPolicy) -> StoreResult<Self> {
        let url = format!("sqlite://{}", path.as_ref().to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool, retry };
        store.bootstrap().await?;
        Ok(store)
    }

    /// In-memory database on a single pinned connection.
    pub async fn open_memory() -> StoreResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        let store = Self {
            pool,
            retry: RetryPolicy::default(),
        };
        store.bootstrap().await?;
        Ok(store)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn bootstrap(&self) -> StoreResult<()> {
        // Improves concurrency for file databases; a no-op in memory.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_uploads_table().await?;
        self.ensure_progress_table().await?;
        Ok(())
    }

    async fn ensure_uploads_table(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              node_name TEXT NOT NULL,
              protocol TEXT NOT NULL,
              node_type TEXT NOT NULL,
              started_at TEXT NOT NULL,
              completed_at TEXT,
              status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
              trigger_type TEXT NOT NULL CHECK (trigger_type IN ('scheduled', 'manual', 'discovered')),
              protocol_data TEXT NOT NULL DEFAULT '{}',
              progress_percent REAL CHECK (progress_percent IS NULL OR (progress_percent >= 0 AND progress_percent <= 100)),
              chunks_completed INTEGER,
              chunks_total INTEGER,
              last_progress_check TEXT,
              total_chunks INTEGER,
              completion_message TEXT,
              error_message TEXT,
              CHECK ((status = 'running') = (completed_at IS NULL)),
              CHECK (chunks_completed IS NULL OR chunks_total IS NULL OR chunks_completed <= chunks_total)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        for stmt in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_uploads_one_running \
             ON uploads(node_name) WHERE status = 'running';",
            "CREATE INDEX IF NOT EXISTS idx_uploads_node_status ON uploads(node_name, status);",
            "CREATE INDEX IF NOT EXISTS idx_uploads_started_at ON uploads(started_at DESC);",
            "CREATE INDEX IF NOT EXISTS idx_uploads_node_completed \
             ON uploads(node_name, completed_at DESC) WHERE completed_at IS NOT NULL;",
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn ensure_progress_table(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_progress (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              upload_id INTEGER NOT NULL REFERENCES uploads(id) ON DELETE CASCADE,
              checked_at TEXT NOT NULL,
              progress_percent REAL,
              chunks_completed INTEGER,
              chunks_total INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_progress_upload \
             ON upload_progress(upload_id, checked_at);",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_upload(&self, upload: &NewUpload, protocol_data: &str) -> StoreResult<i64> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO uploads(
              node_name, protocol, node_type, started_at, status, trigger_type,
              protocol_data, progress_percent, chunks_completed, chunks_total,
              last_progress_check
            )
            VALUES (?1, ?2, ?3, ?4, 'running', ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING id;
            "#,
        )
        .bind(&upload.node_name)
        .bind(&upload.protocol)
        .bind(&upload.node_type)
        .bind(upload.started_at)
        .bind(upload.trigger_type.as_str())
        .bind(protocol_data)
        .bind(upload.progress_percent)
        .bind(upload.chunks_completed)
        .bind(upload.chunks_total)
        .bind(upload.last_progress_check)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| map_insert_error(err, &upload.node_name))?;
        let id = row.try_get::<i64, _>("id")?;

        let has_progress = upload.progress_percent.is_some()
            || upload.chunks_completed.is_some()
            || upload.chunks_total.is_some();
        if has_progress {
            append_progress(
                &mut tx,
                id,
                upload.last_progress_check.unwrap_or(upload.started_at),
                upload.progress_percent,
                upload.chunks_completed,
                upload.chunks_total,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn apply_patch(&self, patch: &UploadPatch) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE uploads SET
              status = COALESCE(?2, status),
              completed_at = COALESCE(?3, completed_at),
              progress_percent = COALESCE(?4, progress_percent),
              chunks_completed = COALESCE(?5, chunks_completed),
              chunks_total = COALESCE(?6, chunks_total),
              last_progress_check = COALESCE(?7, last_progress_check),
              total_chunks = COALESCE(?8, total_chunks),
              completion_message = COALESCE(?9, completion_message),
              error_message = COALESCE(?10, error_message)
            WHERE id = ?1 AND status = 'running';
            "#,
        )
        .bind(patch.id)
        .bind(patch.status.map(UploadStatus::as_str))
        .bind(patch.completed_at)
        .bind(patch.progress_percent)
        .bind(patch.chunks_completed)
        .bind(patch.chunks_total)
        .bind(patch.last_progress_check)
        .bind(patch.total_chunks)
        .bind(patch.completion_message.as_deref())
        .bind(patch.error_message.as_deref())
        .execute(&mut *tx)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied && patch.has_progress() {
            append_progress(
                &mut tx,
                patch.id,
                patch
                    .last_progress_check
                    .or(patch.completed_at)
                    .unwrap_or_else(Utc::now),
                patch.progress_percent,
                patch.chunks_completed,
                patch.chunks_total,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(applied)
    }
}

async fn append_progress(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    upload_id: i64,
    checked_at: DateTime<Utc>,
    progress_percent: Option<f64>,
    chunks_completed: Option<i64>,
    chunks_total: Option<i64>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_progress(upload_id, checked_at, progress_percent, chunks_completed, chunks_total)
        VALUES (?1, ?2, ?3, ?4, ?5);
        "#,
    )
    .bind(upload_id)
    .bind(checked_at)
    .bind(progress_percent)
    .bind(chunks_completed)
    .bind(chunks_total)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn map_insert_error(err: sqlx::Error, node_name: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            node_name: node_name.to_string(),
        },
        _ => StoreError::Database(err),
    }
}

fn row_to_upload(row: &SqliteRow) -> StoreResult<UploadRecord> {
    let status: String = row.try_get("status")?;
    let trigger: String = row.try_get("trigger_type")?;
    let protocol_data: String = row.try_get("protocol_data")?;

    Ok(UploadRecord {
        id: row.try_get("id")?,
        node_name: row.try_get("node_name")?,
        protocol: row.try_get("protocol")?,
        node_type: row.try_get("node_type")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        status: UploadStatus::from_str(&status).map_err(StoreError::Corrupt)?,
        trigger_type: TriggerType::from_str(&trigger).map_err(StoreError::Corrupt)?,
        protocol_data: serde_json::from_str::<ProtocolData>(&protocol_data)?,
        progress_percent: row.try_get("progress_percent")?,
        chunks_completed: row.try_get("chunks_completed")?,
        chunks_total: row.try_get("chunks_total")?,
        last_progress_check: row.try_get("last_progress_check")?,
        total_chunks: row.try_get("total_chunks")?,
        completion_message: row.try_get("completion_message")?,
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<i64> {
        let protocol_data =
            serde_json::to_string(&serde_json::Value::Object(upload.protocol_data.clone()))?;
        let id = self
            .retry
            .run("create_upload", || self.insert_upload(upload, &protocol_data))
            .await?;
        debug!(upload_id = id, node = %upload.node_name, trigger = %upload.trigger_type, "upload row created");
        Ok(id)
    }

    async fn update_upload(&self, patch: &UploadPatch) -> StoreResult<bool> {
        patch.validate().map_err(StoreError::InvalidPatch)?;
        self.retry
            .run("update_upload", || self.apply_patch(patch))
            .await
    }

    async fn get_upload(&self, id: i64) -> StoreResult<Option<UploadRecord>> {
        let sql = format!("SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1");
        let row = self
            .retry
            .run("get_upload", || async {
                sqlx::query(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        row.as_ref().map(row_to_upload).transpose()
    }

    async fn get_running_for_node(&self, node_name: &str) -> StoreResult<Option<UploadRecord>> {
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE node_name = ?1 AND status = 'running' LIMIT 1"
        );
        let row = self
            .retry
            .run("get_running_for_node", || async {
                sqlx::query(&sql)
                    .bind(node_name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        row.as_ref().map(row_to_upload).transpose()
    }

    async fn get_all_running(&self) -> StoreResult<Vec<UploadRecord>> {
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE status = 'running' ORDER BY started_at ASC, id ASC"
        );
        let rows = self
            .retry
            .run("get_all_running", || async {
                sqlx::query(&sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        rows.iter().map(row_to_upload).collect()
    }

    async fn get_latest_completed_for_node(
        &self,
        node_name: &str,
    ) -> StoreResult<Option<UploadRecord>> {
        let sql = format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads \
             WHERE node_name = ?1 AND status = 'completed' AND completed_at IS NOT NULL \
             ORDER BY completed_at DESC, id DESC LIMIT 1"
        );
        let row = self
            .retry
            .run("get_latest_completed_for_node", || async {
                sqlx::query(&sql)
                    .bind(node_name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            })
            .await?;
        row.as_ref().map(row_to_upload).transpose()
    }

    async fn progress_history(&self, upload_id: i64) -> StoreResult<Vec<ProgressPoint>> {
        let rows = self
            .retry
            .run("progress_history", || async {
                sqlx::query(
                    r#"
                    SELECT upload_id, checked_at, progress_percent, chunks_completed, chunks_total
                    FROM upload_progress
                    WHERE upload_id = ?1
                    ORDER BY id ASC
                    "#,
                )
                .bind(upload_id)
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from)
            })
            .await?;

        rows.iter()
            .map(|row| -> StoreResult<ProgressPoint> {
                Ok(ProgressPoint {
                    upload_id: row.try_get("upload_id")?,
                    checked_at: row.try_get("checked_at")?,
                    progress_percent: row.try_get("progress_percent")?,
                    chunks_completed: row.try_get("chunks_completed")?,
                    chunks_total: row.try_get("chunks_total")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_upload(node: &str) -> NewUpload {
        NewUpload {
            node_name: node.to_string(),
            protocol: "ethereum".to_string(),
            node_type: "archive".to_string(),
            started_at: Utc::now(),
            trigger_type: TriggerType::Scheduled,
            protocol_data: ProtocolData::new(),
            progress_percent: None,
            chunks_completed: None,
            chunks_total: None,
            last_progress_check: None,
        }
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = SqliteStore::open_memory().await.expect("open");
        store.bootstrap().await.expect("second bootstrap");
        assert!(store.get_all_running().await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn second_running_row_conflicts() {
        let store = SqliteStore::open_memory().await.expect("open");
        store.create_upload(&new_upload("a")).await.expect("first");
        let err = store.create_upload(&new_upload("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref node_name } if node_name == "a"));
        store.create_upload(&new_upload("b")).await.expect("other node");
    }

    #[tokio::test]
    async fn unknown_id_update_is_not_applied() {
        let store = SqliteStore::open_memory().await.expect("open");
        let applied = store
            .update_upload(&UploadPatch {
                id: 42,
                progress_percent: Some(1.0),
                ..UploadPatch::default()
            })
            .await
            .expect("update");
        assert!(!applied);
    }
}
