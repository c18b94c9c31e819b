/*!
 * Database entity models.
 *
 * These structures map directly to database rows. Timestamps are stored as
 * unix milliseconds and converted at the edge.
 */

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{Job, JobState};
use crate::resource::{FieldName, FieldTranslation, Resource, ResourceStatus, TranslationResult};
use std::collections::BTreeMap;

/// Convert stored milliseconds back to a timestamp
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("Invalid timestamp: {}", millis))
}

/// Row of the `jobs` table
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    /// JSON text
    pub payload: String,
    pub state: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub progress: i64,
    pub run_at: i64,
    /// Set while a worker holds the job
    pub lease_until: Option<i64>,
    pub failed_reason: Option<String>,
    pub return_value: Option<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

impl JobRecord {
    /// Column list matching `from_row`
    pub const COLUMNS: &'static str = "id, kind, payload, state, attempts, max_attempts, progress, \
         run_at, lease_until, failed_reason, return_value, created_at, finished_at";

    pub fn from_job(job: &Job) -> Result<Self> {
        Ok(Self {
            id: job.id.clone(),
            kind: job.kind.clone(),
            payload: serde_json::to_string(&job.payload)?,
            state: job.state.to_string(),
            attempts: i64::from(job.attempts),
            max_attempts: i64::from(job.max_attempts),
            progress: i64::from(job.progress),
            run_at: job.run_at.timestamp_millis(),
            lease_until: None,
            failed_reason: job.failed_reason.clone(),
            return_value: job.return_value.as_ref().map(serde_json::to_string).transpose()?,
            created_at: job.created_at.timestamp_millis(),
            finished_at: job.finished_at.map(|t| t.timestamp_millis()),
        })
    }

    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            state: row.get(3)?,
            attempts: row.get(4)?,
            max_attempts: row.get(5)?,
            progress: row.get(6)?,
            run_at: row.get(7)?,
            lease_until: row.get(8)?,
            failed_reason: row.get(9)?,
            return_value: row.get(10)?,
            created_at: row.get(11)?,
            finished_at: row.get(12)?,
        })
    }

    pub fn into_job(self) -> Result<Job> {
        let state: JobState = self.state.parse()?;
        Ok(Job {
            payload: serde_json::from_str(&self.payload)
                .with_context(|| format!("Corrupt payload for job {}", self.id))?,
            state,
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(1),
            progress: u8::try_from(self.progress.clamp(0, 100)).unwrap_or(0),
            run_at: from_millis(self.run_at)?,
            failed_reason: self.failed_reason,
            return_value: self
                .return_value
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: from_millis(self.created_at)?,
            finished_at: self.finished_at.map(from_millis).transpose()?,
            kind: self.kind,
            id: self.id,
        })
    }
}

/// Row of the `resources` table; the full snapshot lives in `data`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRecord {
    pub id: String,
    pub shop_id: String,
    pub resource_type: String,
    pub status: String,
    pub data: String,
    pub updated_at: i64,
}

impl ResourceRecord {
    pub fn from_resource(resource: &Resource, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: resource.id.clone(),
            shop_id: resource.shop_id.clone(),
            resource_type: resource.resource_type.as_str().to_string(),
            status: resource.status.to_string(),
            data: serde_json::to_string(resource)?,
            updated_at: now.timestamp_millis(),
        })
    }

    /// The status column wins over the snapshot; it is updated on its own
    pub fn into_resource(self) -> Result<Resource> {
        let mut resource: Resource = serde_json::from_str(&self.data)
            .with_context(|| format!("Corrupt snapshot for resource {}", self.id))?;
        resource.status = self.status.parse::<ResourceStatus>()?;
        Ok(resource)
    }
}

/// Stored translation of one resource into one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub resource_id: String,
    pub language: String,
    pub shop_id: String,
    /// JSON map of field name to field translation
    pub fields: String,
    pub needs_review: bool,
    pub created_at: i64,
}

impl TranslationRecord {
    pub fn new(shop_id: &str, result: &TranslationResult, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            resource_id: result.resource_id.clone(),
            language: result.language.clone(),
            shop_id: shop_id.to_string(),
            fields: serde_json::to_string(&result.fields)?,
            needs_review: result.needs_review(),
            created_at: now.timestamp_millis(),
        })
    }

    pub fn into_result(self) -> Result<TranslationResult> {
        let fields: BTreeMap<FieldName, FieldTranslation> = serde_json::from_str(&self.fields)
            .with_context(|| {
                format!("Corrupt translation for {}/{}", self.resource_id, self.language)
            })?;
        Ok(TranslationResult {
            resource_id: self.resource_id,
            language: self.language,
            fields,
        })
    }
}
