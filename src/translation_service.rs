/*!
 * Translation service: the interface callers use.
 *
 * Binds the supervised job queue, the translation engine and the collaborator
 * stores. Callers admit jobs here; workers run them through the handlers
 * below.
 */

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::app_config::Config;
use crate::errors::{JobFailure, QueueError, TerminalReason};
use crate::providers::Provider;
use crate::queue::{Job, JobContext, JobHandler, JobResult, NewJob, QueueStats, QueueSupervisor};
use crate::resource::{Resource, ResourceStatus, TranslationResult};
use crate::stores::{ResourceStore, TranslationStore};
use crate::translation::{
    CompletenessValidator, RateLimiter, StrategyCascade, TranslationCache, TranslationClient,
    TranslationOrchestrator,
};

/// Job kind of a single resource translation
pub const TRANSLATE_RESOURCE: &str = "translate_resource";

/// Job kind that fans a batch out into single translations
pub const BATCH_TRANSLATE: &str = "batch_translate";

fn require(field: &str, value: &str) -> Result<(), QueueError> {
    if value.trim().is_empty() {
        return Err(QueueError::InvalidPayload(format!("{} is required", field)));
    }
    Ok(())
}

/// Payload of a `translate_resource` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationJobPayload {
    pub resource_id: String,
    pub shop_id: String,
    pub shop_domain: String,
    pub language: String,
}

impl TranslationJobPayload {
    pub fn new(
        resource_id: impl Into<String>,
        shop_id: impl Into<String>,
        shop_domain: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            shop_id: shop_id.into(),
            shop_domain: shop_domain.into(),
            language: language.into(),
        }
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        require("resourceId", &self.resource_id)?;
        require("shopId", &self.shop_id)?;
        require("shopDomain", &self.shop_domain)?;
        require("language", &self.language)
    }
}

/// Payload of a `batch_translate` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTranslationPayload {
    pub resource_ids: Vec<String>,
    pub shop_id: String,
    pub shop_domain: String,
    pub language: String,
}

impl BatchTranslationPayload {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.resource_ids.is_empty() {
            return Err(QueueError::InvalidPayload("resourceIds must not be empty".to_string()));
        }
        if self.resource_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(QueueError::InvalidPayload("resourceIds must not contain blank ids".to_string()));
        }
        require("shopId", &self.shop_id)?;
        require("shopDomain", &self.shop_domain)?;
        require("language", &self.language)
    }

    /// The single-resource payloads, in batch order
    pub fn items(&self) -> impl Iterator<Item = TranslationJobPayload> + '_ {
        self.resource_ids.iter().map(|id| {
            TranslationJobPayload::new(id.clone(), &self.shop_id, &self.shop_domain, &self.language)
        })
    }
}

/// Outcome of admitting one resource of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub resource_id: String,
    pub job_id: Option<String>,
    pub error: Option<String>,
}

impl Admission {
    pub fn accepted(&self) -> bool {
        self.job_id.is_some()
    }
}

/// One admission per resource of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchAdmission {
    pub admissions: Vec<Admission>,
}

impl BatchAdmission {
    pub fn accepted(&self) -> usize {
        self.admissions.iter().filter(|a| a.accepted()).count()
    }
}

/// Build the engine on top of the process-wide limiter and cache
pub fn build_orchestrator(
    config: &Config,
    provider: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    cache: TranslationCache,
) -> TranslationOrchestrator {
    let client = TranslationClient::new(provider, limiter, &config.api, config.translation.brand_terms.clone());
    let validator = CompletenessValidator::new(config.translation.validator.clone());
    let cascade = StrategyCascade::new(client, validator, cache, &config.translation);
    TranslationOrchestrator::new(cascade, &config.translation)
}

/// Submit one single-resource job per batch item, `stagger` apart
async fn fan_out(supervisor: &QueueSupervisor, batch: &BatchTranslationPayload, stagger: Duration) -> BatchAdmission {
    let mut admissions = Vec::with_capacity(batch.resource_ids.len());
    for (index, item) in batch.items().enumerate() {
        let delay = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
        let admitted = match serde_json::to_value(&item) {
            Ok(payload) => supervisor
                .enqueue(NewJob::new(TRANSLATE_RESOURCE, payload).with_delay(delay))
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        admissions.push(match admitted {
            Ok(job) => Admission {
                resource_id: item.resource_id,
                job_id: Some(job.id),
                error: None,
            },
            Err(e) => {
                warn!("Batch item {} was not admitted: {}", item.resource_id, e);
                Admission {
                    resource_id: item.resource_id,
                    job_id: None,
                    error: Some(e),
                }
            }
        });
    }
    BatchAdmission { admissions }
}

/// Runs `translate_resource` jobs
pub struct TranslateResourceHandler {
    orchestrator: Arc<TranslationOrchestrator>,
    resources: Arc<dyn ResourceStore>,
    translations: Arc<dyn TranslationStore>,
}

impl TranslateResourceHandler {
    async fn run(&self, ctx: &JobContext, payload: &TranslationJobPayload) -> JobResult {
        let resource = self
            .resources
            .find_by_id(&payload.resource_id)
            .await?
            .ok_or_else(|| JobFailure::Terminal(TerminalReason::ResourceNotFound(payload.resource_id.clone())))?;
        if resource.shop_id != payload.shop_id {
            return Err(JobFailure::Terminal(TerminalReason::CrossEnvironment {
                resource_id: resource.id.clone(),
                expected: payload.shop_id.clone(),
                actual: resource.shop_id.clone(),
            }));
        }

        self.resources.update_status(&resource.id, ResourceStatus::Processing).await?;
        ctx.report_progress(5);

        let progress = |p: u8| ctx.report_progress(5 + (u16::from(p) * 90 / 100) as u8);
        let result = self
            .orchestrator
            .translate_resource_with_progress(&resource, &payload.language, &progress)
            .await;

        let failed = result.failed_fields();
        if !result.fields.is_empty() && failed.len() == result.fields.len() {
            return Err(JobFailure::Retryable(format!(
                "every field of {} failed to translate into {}",
                resource.id, payload.language
            )));
        }

        self.translations.save(&payload.shop_id, &result).await?;
        let status = result.status();
        self.resources.update_status(&resource.id, status).await?;
        if !failed.is_empty() {
            warn!(
                "Resource {} translated into {} with {} field(s) kept in the source language",
                resource.id,
                payload.language,
                failed.len()
            );
        }

        Ok(Some(json!({
            "resourceId": resource.id,
            "language": payload.language,
            "status": status.to_string(),
            "translated": result.succeeded(),
            "failed": failed.len(),
            "needsReview": result.needs_review(),
        })))
    }
}

#[async_trait]
impl JobHandler for TranslateResourceHandler {
    async fn handle(&self, ctx: JobContext) -> JobResult {
        let payload: TranslationJobPayload = serde_json::from_value(ctx.job.payload.clone())
            .map_err(|e| JobFailure::Terminal(TerminalReason::Other(format!("invalid payload: {}", e))))?;

        let outcome = self.run(&ctx, &payload).await;
        if let Err(failure) = &outcome {
            // give the resource back so it can be picked up again later
            if !failure.is_terminal() && ctx.is_final_attempt() {
                if let Err(e) = self.resources.update_status(&payload.resource_id, ResourceStatus::Pending).await {
                    warn!("Could not reset status of resource {}: {:#}", payload.resource_id, e);
                }
            }
        }
        outcome
    }
}

/// Runs `batch_translate` jobs; never translates anything itself
pub struct BatchTranslateHandler {
    supervisor: Weak<QueueSupervisor>,
    stagger: Duration,
}

#[async_trait]
impl JobHandler for BatchTranslateHandler {
    async fn handle(&self, ctx: JobContext) -> JobResult {
        let batch: BatchTranslationPayload = serde_json::from_value(ctx.job.payload.clone())
            .map_err(|e| JobFailure::Terminal(TerminalReason::Other(format!("invalid payload: {}", e))))?;
        let supervisor = self
            .supervisor
            .upgrade()
            .ok_or_else(|| JobFailure::Retryable("queue supervisor is gone".to_string()))?;

        let admission = fan_out(&supervisor, &batch, self.stagger).await;
        if admission.accepted() == 0 {
            return Err(JobFailure::Retryable("no batch item could be admitted".to_string()));
        }
        info!(
            "Batch job {} fanned out {}/{} resource(s)",
            ctx.job.id,
            admission.accepted(),
            admission.admissions.len()
        );
        serde_json::to_value(&admission)
            .map(Some)
            .map_err(|e| JobFailure::Retryable(e.to_string()))
    }
}

/// Entry point for admitting and running translation jobs
pub struct TranslationService {
    supervisor: Arc<QueueSupervisor>,
    orchestrator: Arc<TranslationOrchestrator>,
    resources: Arc<dyn ResourceStore>,
    translations: Arc<dyn TranslationStore>,
    batch_stagger: Duration,
}

impl TranslationService {
    pub fn new(
        supervisor: Arc<QueueSupervisor>,
        orchestrator: TranslationOrchestrator,
        resources: Arc<dyn ResourceStore>,
        translations: Arc<dyn TranslationStore>,
        batch_stagger: Duration,
    ) -> Self {
        Self {
            supervisor,
            orchestrator: Arc::new(orchestrator),
            resources,
            translations,
            batch_stagger,
        }
    }

    pub fn supervisor(&self) -> &Arc<QueueSupervisor> {
        &self.supervisor
    }

    pub fn orchestrator(&self) -> &TranslationOrchestrator {
        &self.orchestrator
    }

    /// Register the translation and batch processors
    pub async fn start_processors(&self, concurrency: usize) -> Result<(), QueueError> {
        let translate = Arc::new(TranslateResourceHandler {
            orchestrator: self.orchestrator.clone(),
            resources: self.resources.clone(),
            translations: self.translations.clone(),
        });
        self.supervisor
            .register_processor(TRANSLATE_RESOURCE, concurrency, translate)
            .await?;

        let batch = Arc::new(BatchTranslateHandler {
            supervisor: Arc::downgrade(&self.supervisor),
            stagger: self.batch_stagger,
        });
        self.supervisor.register_processor(BATCH_TRANSLATE, 1, batch).await
    }

    pub async fn enqueue_translation_job(&self, payload: TranslationJobPayload) -> Result<Job, QueueError> {
        payload.validate()?;
        let job = self
            .supervisor
            .enqueue(NewJob::new(TRANSLATE_RESOURCE, serde_json::to_value(&payload)?))
            .await?;
        info!(
            "Admitted translation of {} into {} as job {}",
            payload.resource_id, payload.language, job.id
        );
        Ok(job)
    }

    /// Admit every resource of the batch as its own job, staggered; each
    /// resource gets its own admission
    pub async fn enqueue_batch_translation_job(
        &self,
        payload: BatchTranslationPayload,
    ) -> Result<BatchAdmission, QueueError> {
        payload.validate()?;
        let admission = fan_out(&self.supervisor, &payload, self.batch_stagger).await;
        info!(
            "Admitted {}/{} resource(s) into {}",
            admission.accepted(),
            admission.admissions.len(),
            payload.language
        );
        Ok(admission)
    }

    /// Queue the batch itself; a worker fans it out later
    pub async fn enqueue_batch_job(&self, payload: BatchTranslationPayload) -> Result<Job, QueueError> {
        payload.validate()?;
        self.supervisor
            .enqueue(NewJob::new(BATCH_TRANSLATE, serde_json::to_value(&payload)?))
            .await
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        self.supervisor.get_job(job_id).await
    }

    pub async fn get_queue_stats(&self) -> Result<QueueStats, QueueError> {
        self.supervisor.stats().await
    }

    /// Translate a resource directly, without the queue or the stores
    pub async fn translate_resource(&self, resource: &Resource, language: &str) -> TranslationResult {
        self.orchestrator.translate_resource(resource, language).await
    }

    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
