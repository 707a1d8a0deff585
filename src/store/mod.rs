// src/store/mod.rs

//! Persistence for upload rows.
//!
//! - [`Store`] is the contract the upload manager and jobs depend on.
//! - [`sqlite`] provides the production implementation on `sqlx` + SQLite.
//! - [`retry`] holds the backoff policy for transient driver failures.
//!
//! The store is the backstop for "at most one running upload per node": a
//! second `running` insert for the same node fails with
//! [`StoreError::Conflict`](crate::errors::StoreError::Conflict).

pub mod retry;
pub mod sqlite;

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::{SnapdError, StoreResult};
use crate::upload::record::{NewUpload, UploadPatch, UploadRecord};

pub use retry::RetryPolicy;
pub use sqlite::SqliteStore;

/// One entry of the append-only progress history.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressPoint {
    pub upload_id: i64,
    pub checked_at: DateTime<Utc>,
    pub progress_percent: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub chunks_total: Option<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new `running` row and return its id.
    async fn create_upload(&self, upload: &NewUpload) -> StoreResult<i64>;

    /// Apply `patch` to its row if that row is still `running`.
    ///
    /// Returns `false` when the row is missing or already terminal.
    async fn update_upload(&self, patch: &UploadPatch) -> StoreResult<bool>;

    async fn get_upload(&self, id: i64) -> StoreResult<Option<UploadRecord>>;

    async fn get_running_for_node(&self, node_name: &str) -> StoreResult<Option<UploadRecord>>;

    /// All running rows, oldest first.
    async fn get_all_running(&self) -> StoreResult<Vec<UploadRecord>>;

    async fn get_latest_completed_for_node(
        &self,
        node_name: &str,
    ) -> StoreResult<Option<UploadRecord>>;

    async fn progress_history(&self, upload_id: i64) -> StoreResult<Vec<ProgressPoint>>;
}

/// Await a store call unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> crate::errors::Result<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SnapdError::Cancelled),
        res = fut => Ok(res?),
    }
}
