/*!
 * Repository layer for database operations.
 *
 * This module provides a high-level API for the job table used by the
 * durable queue, and for the resource and translation tables used by the
 * translation service. All SQL lives here.
 */

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{OptionalExtension, params};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::connection::DatabaseConnection;
use super::models::{JobRecord, ResourceRecord, TranslationRecord};
use crate::queue::{Job, JobState};
use crate::resource::{Resource, ResourceStatus, TranslationResult};

/// Reason recorded on jobs whose worker disappeared
const LEASE_EXPIRED: &str = "lease expired";

/// Per-state job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Repository for database operations
#[derive(Clone, Debug)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Open a repository on a database file
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        Ok(Self::new(DatabaseConnection::open(path, busy_timeout)?))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Round-trip a trivial query
    pub async fn ping(&self) -> Result<()> {
        self.db
            .execute_async(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        let record = JobRecord::from_job(job)?;

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO jobs (
                        id, kind, payload, state, attempts, max_attempts, progress,
                        run_at, lease_until, failed_reason, return_value, created_at, finished_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                    params![
                        record.id,
                        record.kind,
                        record.payload,
                        record.state,
                        record.attempts,
                        record.max_attempts,
                        record.progress,
                        record.run_at,
                        record.lease_until,
                        record.failed_reason,
                        record.return_value,
                        record.created_at,
                        record.finished_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Move the oldest due waiting job of `kind` to active in one statement,
    /// so concurrent workers in other processes never claim the same row
    pub async fn claim_next_job(
        &self,
        kind: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<Job>> {
        let kind = kind.to_string();
        let now_ms = now.timestamp_millis();
        let lease_until = now_ms.saturating_add(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));

        let record = self
            .db
            .execute_async(move |conn| {
                let sql = format!(
                    r#"
                    UPDATE jobs
                    SET state = 'active', attempts = attempts + 1, progress = 0, lease_until = ?3
                    WHERE id = (
                        SELECT id FROM jobs
                        WHERE state = 'waiting' AND kind = ?1 AND run_at <= ?2
                        ORDER BY run_at, rowid
                        LIMIT 1
                    )
                    RETURNING {}
                    "#,
                    JobRecord::COLUMNS
                );
                let record = conn
                    .query_row(&sql, params![kind, now_ms, lease_until], JobRecord::from_row)
                    .optional()?;
                Ok(record)
            })
            .await?;

        record.map(JobRecord::into_job).transpose()
    }

    pub async fn extend_lease(&self, id: &str, lease_until: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        let lease_until = lease_until.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET lease_until = ?2 WHERE id = ?1 AND state = 'active'",
                    params![id, lease_until],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_job_progress(&self, id: &str, progress: u8) -> Result<()> {
        let id = id.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE jobs SET progress = ?2 WHERE id = ?1",
                    params![id, progress],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn complete_job(
        &self,
        id: &str,
        return_value: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let id = id.to_string();
        let return_value = return_value.as_ref().map(serde_json::to_string).transpose()?;
        let now = now.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE jobs
                    SET state = 'completed', progress = 100, return_value = ?2,
                        finished_at = ?3, lease_until = NULL
                    WHERE id = ?1
                    "#,
                    params![id, return_value, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn retry_job(&self, id: &str, reason: &str, run_at: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        let reason = reason.to_string();
        let run_at = run_at.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE jobs
                    SET state = 'waiting', failed_reason = ?2, run_at = ?3, lease_until = NULL
                    WHERE id = ?1
                    "#,
                    params![id, reason, run_at],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn fail_job(&self, id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let id = id.to_string();
        let reason = reason.to_string();
        let now = now.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE jobs
                    SET state = 'failed', failed_reason = ?2, finished_at = ?3, lease_until = NULL
                    WHERE id = ?1
                    "#,
                    params![id, reason, now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let id = id.to_string();

        let record = self
            .db
            .execute_async(move |conn| {
                let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JobRecord::COLUMNS);
                Ok(conn.query_row(&sql, [id], JobRecord::from_row).optional()?)
            })
            .await?;

        record.map(JobRecord::into_job).transpose()
    }

    pub async fn job_counts(&self, now: DateTime<Utc>) -> Result<JobCounts> {
        let now = now.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT state, COUNT(*), SUM(CASE WHEN run_at > ?1 THEN 1 ELSE 0 END)
                    FROM jobs
                    GROUP BY state
                    "#,
                )?;
                let rows = stmt.query_map([now], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
                })?;

                let mut counts = JobCounts::default();
                for row in rows {
                    let (state, count, future) = row?;
                    let count = usize::try_from(count).unwrap_or(0);
                    match state.parse::<JobState>()? {
                        JobState::Waiting => {
                            counts.waiting = count;
                            counts.delayed = usize::try_from(future).unwrap_or(0);
                        }
                        JobState::Active => counts.active = count,
                        JobState::Completed => counts.completed = count,
                        JobState::Failed => counts.failed = count,
                    }
                }
                Ok(counts)
            })
            .await
    }

    /// Delete jobs in `state` that finished before `before`
    pub async fn clean_jobs(&self, state: JobState, before: DateTime<Utc>) -> Result<usize> {
        let state = state.to_string();
        let before = before.timestamp_millis();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM jobs WHERE state = ?1 AND finished_at IS NOT NULL AND finished_at < ?2",
                    params![state, before],
                )?;
                if deleted > 0 {
                    debug!("Cleaned {} {} jobs", deleted, state);
                }
                Ok(deleted)
            })
            .await
    }

    pub async fn remove_waiting_job(&self, id: &str) -> Result<bool> {
        let id = id.to_string();

        self.db
            .execute_async(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM jobs WHERE id = ?1 AND state = 'waiting'", [id])?;
                Ok(deleted > 0)
            })
            .await
    }

    /// Remove and return every waiting job, oldest first
    pub async fn take_waiting_jobs(&self) -> Result<Vec<Job>> {
        let records = self
            .db
            .transaction_async(|tx| {
                let sql = format!(
                    "SELECT {} FROM jobs WHERE state = 'waiting' ORDER BY rowid",
                    JobRecord::COLUMNS
                );
                let records = {
                    let mut stmt = tx.prepare(&sql)?;
                    let rows = stmt.query_map([], JobRecord::from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                tx.execute("DELETE FROM jobs WHERE state = 'waiting'", [])?;
                Ok(records)
            })
            .await?;

        records.into_iter().map(JobRecord::into_job).collect()
    }

    /// Release jobs whose worker stopped renewing the lease: back to waiting,
    /// or failed when no attempts remain
    pub async fn recover_stalled_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let now = now.timestamp_millis();

        self.db
            .transaction_async(move |tx| {
                let failed = tx.execute(
                    r#"
                    UPDATE jobs
                    SET state = 'failed', failed_reason = ?2, finished_at = ?1, lease_until = NULL
                    WHERE state = 'active' AND lease_until < ?1 AND attempts >= max_attempts
                    "#,
                    params![now, LEASE_EXPIRED],
                )?;
                let requeued = tx.execute(
                    r#"
                    UPDATE jobs
                    SET state = 'waiting', failed_reason = ?2, run_at = ?1, lease_until = NULL
                    WHERE state = 'active' AND lease_until < ?1
                    "#,
                    params![now, LEASE_EXPIRED],
                )?;
                Ok(failed + requeued)
            })
            .await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn upsert_resource(&self, resource: &Resource) -> Result<()> {
        let record = ResourceRecord::from_resource(resource, Utc::now())?;

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO resources (id, shop_id, resource_type, status, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(id) DO UPDATE SET
                        shop_id = excluded.shop_id,
                        resource_type = excluded.resource_type,
                        status = excluded.status,
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                    params![
                        record.id,
                        record.shop_id,
                        record.resource_type,
                        record.status,
                        record.data,
                        record.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn find_resource(&self, id: &str) -> Result<Option<Resource>> {
        let id = id.to_string();

        let record = self
            .db
            .execute_async(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT id, shop_id, resource_type, status, data, updated_at
                        FROM resources WHERE id = ?1
                        "#,
                        [id],
                        |row| {
                            Ok(ResourceRecord {
                                id: row.get(0)?,
                                shop_id: row.get(1)?,
                                resource_type: row.get(2)?,
                                status: row.get(3)?,
                                data: row.get(4)?,
                                updated_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;

        record.map(ResourceRecord::into_resource).transpose()
    }

    /// Returns false when the resource does not exist
    pub async fn update_resource_status(&self, id: &str, status: ResourceStatus) -> Result<bool> {
        let id = id.to_string();
        let status = status.to_string();
        let now = Utc::now().timestamp_millis();

        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    "UPDATE resources SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, status, now],
                )?;
                Ok(updated > 0)
            })
            .await
    }

    // =========================================================================
    // Translation Operations
    // =========================================================================

    /// Store (or replace) the translation of a resource into one language
    pub async fn save_translation(&self, shop_id: &str, result: &TranslationResult) -> Result<()> {
        let record = TranslationRecord::new(shop_id, result, Utc::now())?;

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    INSERT OR REPLACE INTO translations (
                        resource_id, language, shop_id, fields, needs_review, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        record.resource_id,
                        record.language,
                        record.shop_id,
                        record.fields,
                        record.needs_review,
                        record.created_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_translation(
        &self,
        resource_id: &str,
        language: &str,
    ) -> Result<Option<TranslationResult>> {
        let resource_id = resource_id.to_string();
        let language = language.to_string();

        let record = self
            .db
            .execute_async(move |conn| {
                let record = conn
                    .query_row(
                        r#"
                        SELECT resource_id, language, shop_id, fields, needs_review, created_at
                        FROM translations WHERE resource_id = ?1 AND language = ?2
                        "#,
                        params![resource_id, language],
                        |row| {
                            Ok(TranslationRecord {
                                resource_id: row.get(0)?,
                                language: row.get(1)?,
                                shop_id: row.get(2)?,
                                fields: row.get(3)?,
                                needs_review: row.get(4)?,
                                created_at: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;

        record.map(TranslationRecord::into_result).transpose()
    }
}
